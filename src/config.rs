use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::{AccountingArgs, MAX_REFRESH_SECS, MIN_REFRESH_SECS};
use crate::error::NetoflowError;
use crate::registry::{DEFAULT_LOCAL_NETWORKS, LocalNetworks};

pub const DEFAULT_REFRESH_SECS: u64 = 5;

/// Optional JSON config file. Every field may be omitted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub local_networks: Vec<String>,
    pub local_ips: Vec<String>,
    pub refresh_secs: Option<u64>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NetoflowError> {
        let content = fs::read_to_string(path.as_ref()).map_err(NetoflowError::ConfigIo)?;
        serde_json::from_str(&content).map_err(|e| {
            NetoflowError::Config(format!("{}: {e}", path.as_ref().display()))
        })
    }
}

/// Effective settings after merging the config file with command-line flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub local_networks: Vec<String>,
    pub local_ips: Vec<String>,
    pub refresh: Duration,
}

impl Settings {
    /// Load `--config` if given, then apply flag overrides.
    pub fn resolve(args: &AccountingArgs) -> Result<Self, NetoflowError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(file, args)
    }

    /// Flags win over file values; the file wins over built-in defaults.
    pub fn merge(file: FileConfig, args: &AccountingArgs) -> Result<Self, NetoflowError> {
        let refresh_secs = args
            .refresh
            .or(file.refresh_secs)
            .unwrap_or(DEFAULT_REFRESH_SECS);
        if !(MIN_REFRESH_SECS..=MAX_REFRESH_SECS).contains(&refresh_secs) {
            return Err(NetoflowError::Config(format!(
                "refresh_secs must be between {MIN_REFRESH_SECS} and {MAX_REFRESH_SECS}, got {refresh_secs}"
            )));
        }

        let local_networks = match &args.local_networks {
            Some(nets) => nets.clone(),
            None if !file.local_networks.is_empty() => file.local_networks,
            None => DEFAULT_LOCAL_NETWORKS.iter().map(|s| s.to_string()).collect(),
        };
        let local_ips = args.local_ips.clone().unwrap_or(file.local_ips);

        Ok(Self {
            local_networks,
            local_ips,
            refresh: Duration::from_secs(refresh_secs),
        })
    }

    /// Parse the configured CIDRs. Any bad entry is fatal.
    pub fn build_registry(&self) -> Result<LocalNetworks, NetoflowError> {
        LocalNetworks::from_strings(&self.local_networks, &self.local_ips)
    }
}
