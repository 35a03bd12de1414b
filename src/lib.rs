pub mod capture;
pub mod cidr;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod packet;
pub mod registry;
pub mod replay;
pub mod state;
