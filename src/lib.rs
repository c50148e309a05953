//! # ringkv
//!
//! A clustered key-value store data plane:
//! - Consistent-hash routing with virtual nodes and bounded key movement
//! - Synchronous majority-quorum replication from primary to replicas
//! - Per-node storage engine: persistent map plus a membership filter for
//!   fast negative lookups
//! - A framed binary wire protocol shared by clients and replication
//!
//! ## Architecture
//!
//! ```text
//!                  route(key) via hash ring
//! client ────────────────────────────────────┐
//!                                             │
//!                                      ┌──────▼──────┐
//!                                      │   Primary   │
//!                                      │  (engine)   │
//!                                      └──┬───────┬──┘
//!                      replication (flag) │       │
//!                            ┌────────────┘       └────────────┐
//!                     ┌──────▼──────┐                   ┌──────▼──────┐
//!                     │  Replica 1  │                   │  Replica 2  │
//!                     │  (engine)   │                   │  (engine)   │
//!                     └─────────────┘                   └─────────────┘
//! ```
//!
//! A write is acknowledged as fully replicated once a majority of the
//! replication factor (primary included) has applied it; fewer acks leave
//! the write durable on the primary and reported as partial.
//!
//! ## Usage
//!
//! ### Start a primary with two replicas
//! ```bash
//! ringkv-node --id node-1 --bind 0.0.0.0:7001 --data ./data/node-1 \
//!   --primary --replicas 127.0.0.1:7002,127.0.0.1:7003
//! ringkv-node --id node-2 --bind 0.0.0.0:7002 --data ./data/node-2
//! ringkv-node --id node-3 --bind 0.0.0.0:7003 --data ./data/node-3
//! ```
//!
//! ### Use the CLI
//! ```bash
//! ringkv --nodes 127.0.0.1:7001 put my-key my-value
//! ringkv --nodes 127.0.0.1:7001 get my-key
//! ringkv --nodes 127.0.0.1:7001 delete my-key
//! ```

pub mod common;
pub mod engine;
pub mod node;
pub mod router;

// Re-export commonly used types
pub use common::{Error, NodeConfig, NodeRole, Result};
pub use engine::StorageEngine;
pub use node::{NodeHandle, NodeServer, WireMessage};
pub use router::{HashRing, MembershipEvent, Router};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
