//! Common utilities and types shared across ringkv

pub mod config;
pub mod error;
pub mod hash;

pub use config::{parse_node_addr, NodeConfig, NodeRole};
pub use error::{Error, Result};
pub use hash::{key_digest, ring_position, virtual_node_name};
