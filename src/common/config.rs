//! Configuration for ringkv nodes

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::{Error, Result};

/// Node role, fixed at startup. A primary originates replication; a replica
/// only applies replication-flagged messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Replica,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// Configuration for one storage node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID (unique identifier)
    pub node_id: String,

    /// Address to listen on for the wire protocol
    pub bind_addr: SocketAddr,

    /// Data directory for the storage engine
    pub data_dir: PathBuf,

    /// Role (primary or replica)
    pub role: NodeRole,

    /// Replica addresses this node fans writes out to (primary only)
    #[serde(default)]
    pub replicas: Vec<String>,

    /// Virtual points per physical node on the hash ring
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,

    /// Membership filter sizing: expected number of keys
    #[serde(default = "default_filter_keys")]
    pub filter_expected_keys: usize,

    /// Membership filter sizing: target false-positive rate
    #[serde(default = "default_filter_fp_rate")]
    pub filter_fp_rate: f64,

    /// Per-replica acknowledgement timeout in milliseconds
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Replica connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_virtual_nodes() -> usize {
    10
}
fn default_filter_keys() -> usize {
    1_000_000
}
fn default_filter_fp_rate() -> f64 {
    0.01
}
fn default_ack_timeout_ms() -> u64 {
    5_000
}
fn default_connect_timeout_ms() -> u64 {
    3_000
}

impl NodeConfig {
    /// Target replication factor: this node plus its replicas.
    pub fn replication_factor(&self) -> usize {
        self.replicas.len() + 1
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::InvalidConfig("node_id cannot be empty".into()));
        }
        if self.virtual_nodes == 0 {
            return Err(Error::InvalidConfig(
                "virtual_nodes must be at least 1".into(),
            ));
        }
        if !(self.filter_fp_rate > 0.0 && self.filter_fp_rate < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "filter_fp_rate must be in (0, 1), got {}",
                self.filter_fp_rate
            )));
        }
        if self.role == NodeRole::Replica && !self.replicas.is_empty() {
            return Err(Error::InvalidConfig(
                "replica nodes do not carry a replica list".into(),
            ));
        }
        for addr in &self.replicas {
            parse_node_addr(addr)?;
        }
        Ok(())
    }
}

/// Parse a `host:port` node address, the identity format used both as ring
/// payload and as the dial target for replication.
pub fn parse_node_addr(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidConfig(format!("invalid node address: {}", addr)))?;
    if host.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "invalid node address: {}",
            addr
        )));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid port in address: {}", addr)))?;
    Ok((host.to_string(), port))
}
