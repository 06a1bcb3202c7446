//! Module parameters (carried in genesis) and node runtime configuration.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TssError};
use crate::types::MAX_ADDRESS_LEN;

pub const DEFAULT_TIMEOUT_BLOCKS: u64 = 50;
pub const DEFAULT_BLOCK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Protocol parameters shared by every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Number of blocks a session stays open before the expiry tick closes it.
    pub timeout_blocks: u64,
    /// Sender address lengths (in bytes) accepted by the request gateway.
    pub address_lengths: Vec<usize>,
    /// Upper bound on pending sessions opened by a single sender. `None` admits everything.
    pub max_pending_per_sender: Option<u32>,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            timeout_blocks: DEFAULT_TIMEOUT_BLOCKS,
            address_lengths: vec![20, 32],
            max_pending_per_sender: None,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_blocks == 0 {
            return Err(TssError::Config("timeout_blocks must be positive".into()));
        }
        if self.address_lengths.is_empty() {
            return Err(TssError::Config("address_lengths must not be empty".into()));
        }
        if let Some(len) = self
            .address_lengths
            .iter()
            .find(|len| **len == 0 || **len > MAX_ADDRESS_LEN)
        {
            return Err(TssError::Config(format!(
                "address length {} outside 1..={}",
                len, MAX_ADDRESS_LEN
            )));
        }
        if self.max_pending_per_sender == Some(0) {
            return Err(TssError::Config(
                "max_pending_per_sender must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the `tss-node` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub genesis_path: PathBuf,
    /// Directory of the RocksDB database holding sessions and signatures.
    pub data_dir: PathBuf,
    /// Interval of the local block ticker that drives session expiry.
    pub block_interval_ms: u64,
    /// `tracing_subscriber` filter directive, e.g. `"info"` or `"tss_sessions=debug"`.
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            genesis_path: PathBuf::from("genesis.json"),
            data_dir: PathBuf::from("tss-data"),
            block_interval_ms: DEFAULT_BLOCK_INTERVAL_MS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            TssError::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        let config: NodeConfig = serde_json::from_str(&contents).map_err(|e| {
            TssError::Config(format!("failed to parse config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.genesis_path.as_os_str().is_empty() {
            return Err(TssError::Config("genesis_path must be set".into()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(TssError::Config("data_dir must be set".into()));
        }
        if self.block_interval_ms == 0 {
            return Err(TssError::Config("block_interval_ms must be positive".into()));
        }
        Ok(())
    }
}
