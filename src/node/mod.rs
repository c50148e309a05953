//! Storage node implementation
//!
//! One node owns:
//! - a wire-protocol listener and per-connection tasks
//! - the request handler state machine, keyed by node role
//! - a replication coordinator (primary role only does anything with it)
//! - the storage engine

pub mod client;
pub mod handler;
pub mod replication;
pub mod server;
pub mod wire;

pub use client::NodeClient;
pub use replication::{QuorumResult, ReplicationCoordinator};
pub use server::{ControlCommand, NodeHandle, NodeServer, NodeState, NodeStatus};
pub use wire::{MessageType, OpKind, WireMessage};
