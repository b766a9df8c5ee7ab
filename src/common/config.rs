//! Configuration for ringkv nodes

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID hosted by this process
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Remote nodes reachable over HTTP
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Additional nodes hosted in this process (simulated cluster)
    #[serde(default)]
    pub local_nodes: Vec<String>,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    /// Directory for persistent node stores, one sled database per hosted
    /// node (requires the `sled-backend` feature; in-memory when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "node-1".to_string()
}
fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7000))
}
fn default_log_level() -> String {
    "info".to_string()
}

/// A remote node and the base URL of its HTTP API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub addr: String,
}

impl std::str::FromStr for PeerConfig {
    type Err = crate::Error;

    /// Parses `id=http://host:port`
    fn from_str(s: &str) -> crate::Result<Self> {
        let (id, addr) = s
            .split_once('=')
            .ok_or_else(|| crate::Error::InvalidConfig(format!("invalid peer: {}", s)))?;
        if id.is_empty() || addr.is_empty() {
            return Err(crate::Error::InvalidConfig(format!("invalid peer: {}", s)));
        }
        Ok(Self {
            id: id.to_string(),
            addr: addr.trim_end_matches('/').to_string(),
        })
    }
}

/// Replication and ring parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Replicas per key
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Ring positions per physical node
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes_per_node: usize,

    /// Deadline for replica acknowledgements
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Interval between background sync sweeps
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,

    /// Operation log capacity (records)
    #[serde(default = "default_oplog_capacity")]
    pub oplog_capacity: usize,

    /// Minimum tombstone age before garbage collection
    #[serde(default = "default_tombstone_grace")]
    pub tombstone_grace_secs: u64,
}

fn default_replication_factor() -> usize {
    3
}
fn default_virtual_nodes() -> usize {
    150
}
fn default_operation_timeout() -> u64 {
    3_000
}
fn default_sync_interval() -> u64 {
    5_000
}
fn default_oplog_capacity() -> usize {
    10_000
}
fn default_tombstone_grace() -> u64 {
    3_600
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replication_factor: default_replication_factor(),
            virtual_nodes_per_node: default_virtual_nodes(),
            operation_timeout_ms: default_operation_timeout(),
            sync_interval_ms: default_sync_interval(),
            oplog_capacity: default_oplog_capacity(),
            tombstone_grace_secs: default_tombstone_grace(),
        }
    }
}

impl ClusterConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

/// Snapshot retention and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Directory for persisted snapshots (in-memory only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_retention_days() -> u64 {
    7
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            bind_addr: default_bind_addr(),
            peers: Vec::new(),
            local_nodes: Vec::new(),
            cluster: ClusterConfig::default(),
            backup: BackupConfig::default(),
            data_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `ringkv.toml` (optional) and `RINGKV__*` env vars.
    pub fn load() -> crate::Result<Self> {
        Self::load_from("ringkv")
    }

    /// Load configuration from the given file stem (any format `config` knows).
    pub fn load_from(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RINGKV")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.node_id.is_empty() {
            return Err(crate::Error::InvalidConfig("node_id cannot be empty".into()));
        }
        if self.cluster.replication_factor == 0 {
            return Err(crate::Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        if self.cluster.virtual_nodes_per_node == 0 {
            return Err(crate::Error::InvalidConfig(
                "virtual_nodes_per_node must be at least 1".into(),
            ));
        }
        if self.cluster.operation_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "operation_timeout_ms must be positive".into(),
            ));
        }
        if self.data_dir.is_some() && !cfg!(feature = "sled-backend") {
            return Err(crate::Error::InvalidConfig(
                "data_dir requires the sled-backend feature".into(),
            ));
        }
        if self.peers.iter().any(|p| p.id == self.node_id) {
            return Err(crate::Error::InvalidConfig(format!(
                "peer list contains the local node {}",
                self.node_id
            )));
        }
        Ok(())
    }

    /// Every node id this process knows about at startup, local first
    pub fn initial_members(&self) -> Vec<String> {
        let mut members = vec![self.node_id.clone()];
        for id in self
            .local_nodes
            .iter()
            .chain(self.peers.iter().map(|p| &p.id))
        {
            if !members.contains(id) {
                members.push(id.clone());
            }
        }
        members
    }
}
