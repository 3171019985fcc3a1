//! Configuration for minidfs components
//!
//! Values come from (lowest to highest priority): built-in defaults, an
//! optional TOML file, `MINIDFS__*` environment variables, then CLI flags
//! applied by the binaries.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Master-specific config
    #[serde(default)]
    pub master: Option<MasterConfig>,

    /// Worker-specific config
    #[serde(default)]
    pub worker: Option<WorkerConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file plus `MINIDFS__` env overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("MINIDFS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// A member of the static master cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterNode {
    /// Totally ordered id; the higher id wins elections
    pub id: String,
    /// Base URL, e.g. `http://127.0.0.1:5001`
    pub address: String,
}

impl MasterNode {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Parses `id=url` as accepted by the `--cluster` / `--masters` flags.
impl FromStr for MasterNode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (id, address) = s
            .split_once('=')
            .ok_or_else(|| Error::InvalidConfig(format!("expected id=url, got '{}'", s)))?;
        let (id, address) = (id.trim(), address.trim());
        if id.is_empty() || address.is_empty() {
            return Err(Error::InvalidConfig(format!("expected id=url, got '{}'", s)));
        }
        Ok(Self::new(id, address.trim_end_matches('/')))
    }
}

/// Master configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// This master's id; must appear in `cluster`
    pub node_id: String,

    /// Bind address for the HTTP API
    #[serde(default = "default_master_bind")]
    pub bind_addr: SocketAddr,

    /// RocksDB path for file and worker tables
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Static cluster membership, including this node
    #[serde(default)]
    pub cluster: Vec<MasterNode>,

    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of distinct workers each chunk is copied to
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// How often the worker sweep runs
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Workers silent for longer than this become inactive
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// Leader liveness check period
    #[serde(default = "default_leader_check_interval")]
    pub leader_check_interval_ms: u64,

    /// Metadata retry queue period
    #[serde(default = "default_replication_retry_interval")]
    pub replication_retry_interval_ms: u64,

    /// Timeout for liveness probes and leader queries
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Timeout for metadata and chunk pushes
    #[serde(default = "default_push_timeout")]
    pub push_timeout_ms: u64,

    /// Largest accepted upload body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_master_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5001))
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./master-data")
}
fn default_chunk_size() -> usize {
    4 * 1024 * 1024
}
fn default_replication_factor() -> usize {
    3
}
fn default_heartbeat_interval() -> u64 {
    5_000
}
fn default_heartbeat_timeout() -> u64 {
    15_000
}
fn default_leader_check_interval() -> u64 {
    5_000
}
fn default_replication_retry_interval() -> u64 {
    30_000
}
fn default_probe_timeout() -> u64 {
    2_000
}
fn default_push_timeout() -> u64 {
    5_000
}
fn default_max_upload_bytes() -> usize {
    256 * 1024 * 1024
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            node_id: "master_1".to_string(),
            bind_addr: default_master_bind(),
            db_path: default_db_path(),
            cluster: Vec::new(),
            chunk_size: default_chunk_size(),
            replication_factor: default_replication_factor(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            leader_check_interval_ms: default_leader_check_interval(),
            replication_retry_interval_ms: default_replication_retry_interval(),
            probe_timeout_ms: default_probe_timeout(),
            push_timeout_ms: default_push_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl MasterConfig {
    /// Reject configurations the master cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be > 0".into(),
            ));
        }
        let intervals = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("leader_check_interval_ms", self.leader_check_interval_ms),
            (
                "replication_retry_interval_ms",
                self.replication_retry_interval_ms,
            ),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("push_timeout_ms", self.push_timeout_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(Error::InvalidConfig(format!("{} must be > 0", name)));
        }
        AddressBook::new(&self.node_id, &self.cluster).map(|_| ())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn leader_check_interval(&self) -> Duration {
        Duration::from_millis(self.leader_check_interval_ms)
    }

    pub fn replication_retry_interval(&self) -> Duration {
        Duration::from_millis(self.replication_retry_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

/// Worker (chunk-store) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_id: String,

    /// Bind address for the chunk API
    #[serde(default = "default_worker_bind")]
    pub bind_addr: SocketAddr,

    /// URL masters use to reach this worker
    pub advertise_url: String,

    /// Directory holding chunk files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Masters to send heartbeats to
    #[serde(default)]
    pub masters: Vec<MasterNode>,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_probe_timeout")]
    pub request_timeout_ms: u64,

    /// Largest accepted chunk body
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

fn default_worker_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6001))
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./worker-data")
}
fn default_max_chunk_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker_1".to_string(),
            bind_addr: default_worker_bind(),
            advertise_url: "http://127.0.0.1:6001".to_string(),
            data_dir: default_data_dir(),
            masters: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            request_timeout_ms: default_probe_timeout(),
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        crate::common::validate_id("worker_id", &self.worker_id)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if self.advertise_url.trim().is_empty() {
            return Err(Error::InvalidConfig("advertise_url must be set".into()));
        }
        if self.heartbeat_interval_ms == 0 || self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat_interval_ms and request_timeout_ms must be > 0".into(),
            ));
        }
        if self.max_chunk_bytes == 0 {
            return Err(Error::InvalidConfig("max_chunk_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Master id → address map, resolved once at startup and shared by every
/// component that talks to peers.
#[derive(Debug, Clone)]
pub struct AddressBook {
    local_id: String,
    members: BTreeMap<String, String>,
}

impl AddressBook {
    pub fn new(local_id: &str, members: &[MasterNode]) -> Result<Self> {
        let mut map = BTreeMap::new();
        for node in members {
            if map
                .insert(node.id.clone(), node.address.clone())
                .is_some()
            {
                return Err(Error::InvalidConfig(format!(
                    "duplicate master id '{}'",
                    node.id
                )));
            }
        }
        if !map.contains_key(local_id) {
            return Err(Error::InvalidConfig(format!(
                "node '{}' is not part of the cluster",
                local_id
            )));
        }
        Ok(Self {
            local_id: local_id.to_string(),
            members: map,
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn address(&self, id: &str) -> Option<&str> {
        self.members.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    /// Every other master, ordered by id
    pub fn peers(&self) -> Vec<MasterNode> {
        self.members
            .iter()
            .filter(|(id, _)| id.as_str() != self.local_id)
            .map(|(id, addr)| MasterNode::new(id.clone(), addr.clone()))
            .collect()
    }

    /// Peers that outrank this node in an election
    pub fn higher_peers(&self) -> Vec<MasterNode> {
        self.peers()
            .into_iter()
            .filter(|p| p.id.as_str() > self.local_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Vec<MasterNode> {
        vec![
            MasterNode::new("master_1", "http://127.0.0.1:5001"),
            MasterNode::new("master_2", "http://127.0.0.1:5101"),
            MasterNode::new("master_3", "http://127.0.0.1:5201"),
        ]
    }

    #[test]
    fn test_parse_master_node() {
        let node: MasterNode = "master_2=http://127.0.0.1:5101/".parse().unwrap();
        assert_eq!(node.id, "master_2");
        assert_eq!(node.address, "http://127.0.0.1:5101");

        assert!("no-separator".parse::<MasterNode>().is_err());
        assert!("=http://x".parse::<MasterNode>().is_err());
    }

    #[test]
    fn test_address_book_peers() {
        let book = AddressBook::new("master_2", &cluster()).unwrap();
        let peers: Vec<_> = book.peers().into_iter().map(|p| p.id).collect();
        assert_eq!(peers, vec!["master_1", "master_3"]);

        let higher: Vec<_> = book.higher_peers().into_iter().map(|p| p.id).collect();
        assert_eq!(higher, vec!["master_3"]);
        assert_eq!(book.address("master_3"), Some("http://127.0.0.1:5201"));
    }

    #[test]
    fn test_address_book_rejects_unknown_self_and_duplicates() {
        assert!(AddressBook::new("master_9", &cluster()).is_err());

        let mut dup = cluster();
        dup.push(MasterNode::new("master_1", "http://elsewhere"));
        assert!(AddressBook::new("master_1", &dup).is_err());
    }

    #[test]
    fn test_validate_master_config() {
        let mut config = MasterConfig {
            node_id: "master_1".into(),
            cluster: cluster(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.replication_factor = 0;
        assert!(config.validate().is_err());

        config.replication_factor = 3;
        config.probe_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
