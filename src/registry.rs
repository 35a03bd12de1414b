use std::net::Ipv4Addr;

use crate::cidr::{CidrBlock, LocalHostInfo};
use crate::error::NetoflowError;

/// RFC 1918 ranges used when no local networks are configured.
pub const DEFAULT_LOCAL_NETWORKS: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Configured local networks and local host addresses.
///
/// Built once at startup and never mutated, so it is shared between the
/// ingestion and classification threads behind a plain `Arc`.
#[derive(Debug, Clone)]
pub struct LocalNetworks {
    blocks: Vec<CidrBlock>,
    hosts: Vec<LocalHostInfo>,
}

impl LocalNetworks {
    /// An empty `blocks` list falls back to [`DEFAULT_LOCAL_NETWORKS`].
    pub fn new(blocks: Vec<CidrBlock>, hosts: Vec<LocalHostInfo>) -> Self {
        let blocks = if blocks.is_empty() {
            default_blocks()
        } else {
            blocks
        };
        Self { blocks, hosts }
    }

    /// Parse CIDR strings for both lists. Any malformed entry fails the whole load.
    pub fn from_strings<S: AsRef<str>>(
        networks: &[S],
        hosts: &[S],
    ) -> Result<Self, NetoflowError> {
        let blocks = networks
            .iter()
            .map(|s| s.as_ref().parse::<CidrBlock>())
            .collect::<Result<Vec<_>, _>>()?;
        let hosts = hosts
            .iter()
            .map(|s| s.as_ref().parse::<LocalHostInfo>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(blocks, hosts))
    }

    pub fn blocks(&self) -> &[CidrBlock] {
        &self.blocks
    }

    pub fn hosts(&self) -> &[LocalHostInfo] {
        &self.hosts
    }

    /// True if `addr` falls inside any configured block.
    ///
    /// A single any-match answer: overlapping blocks never make an address
    /// "more local".
    pub fn is_local_network(&self, addr: Ipv4Addr) -> bool {
        self.blocks.iter().any(|block| block.contains(addr))
    }

    /// True for a configured host address, loopback, or a derived broadcast address.
    pub fn is_configured_local_host(&self, addr: Ipv4Addr) -> bool {
        if addr == Ipv4Addr::LOCALHOST {
            return true;
        }
        let addr = u32::from(addr);
        self.hosts
            .iter()
            .any(|h| h.address == addr || h.broadcast == addr)
    }
}

impl Default for LocalNetworks {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

fn default_blocks() -> Vec<CidrBlock> {
    DEFAULT_LOCAL_NETWORKS
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}
