//! Request handler state machine
//!
//! Dispatches one inbound message against the storage engine and, on a
//! primary, the replication coordinator. The decision is a function of
//! `(message type, node role, replication flag)`:
//!
//! - GET reads through the engine on any role.
//! - A replication-flagged PUT/DELETE (or `ReplicationApply`) is applied
//!   locally and never re-replicated, regardless of role. Re-applying the
//!   same flagged PUT is an idempotent overwrite.
//! - An unflagged PUT/DELETE is applied locally; only a primary then drives
//!   the synchronous quorum fan-out. Quorum reached answers 200, quorum
//!   missed answers 202 with the write still durable locally.
//! - Anything else answers 400, and engine failures answer 500; neither
//!   tears down the connection.

use std::sync::Arc;

use crate::common::{Error, NodeRole};
use crate::engine::StorageEngine;
use crate::node::replication::ReplicationCoordinator;
use crate::node::wire::{MessageType, OpKind, WireMessage};

pub async fn handle_message(
    msg: WireMessage,
    role: NodeRole,
    engine: &Arc<StorageEngine>,
    coordinator: &Arc<ReplicationCoordinator>,
) -> WireMessage {
    tracing::debug!(
        msg_type = ?msg.msg_type,
        key = %msg.key,
        replication = msg.replication,
        %role,
        "handling request"
    );

    match msg.msg_type {
        MessageType::Get => handle_get(&msg, engine),
        MessageType::Put => handle_put(&msg, role, engine, coordinator).await,
        MessageType::Delete => handle_delete(&msg, role, engine, coordinator).await,
        // Legacy replication traffic: exactly a flagged PUT.
        MessageType::ReplicationApply => apply_replicated_put(&msg, engine),
        MessageType::Response => {
            WireMessage::response_to(&msg, 400, "unexpected message type: response")
        }
    }
}

fn handle_get(msg: &WireMessage, engine: &StorageEngine) -> WireMessage {
    match engine.get(&msg.key) {
        Ok(Some(value)) => {
            let mut resp = WireMessage::response_to(msg, 200, "get successful");
            resp.value = Some(value);
            resp
        }
        Ok(None) => WireMessage::response_to(msg, 404, "key not found"),
        Err(e) => error_response(msg, e),
    }
}

async fn handle_put(
    msg: &WireMessage,
    role: NodeRole,
    engine: &StorageEngine,
    coordinator: &ReplicationCoordinator,
) -> WireMessage {
    // A flagged message is a forced local apply; re-replicating it would
    // loop writes around the cluster forever.
    if msg.replication {
        return apply_replicated_put(msg, engine);
    }

    let value = match &msg.value {
        Some(value) => value,
        None => return WireMessage::response_to(msg, 400, "put requires a value"),
    };

    if let Err(e) = engine.put(&msg.key, value) {
        return error_response(msg, e);
    }

    match role {
        NodeRole::Primary => {
            let quorum = coordinator
                .sync_replicate(OpKind::Put, &msg.key, Some(value))
                .await;
            if quorum.reached() {
                WireMessage::response_to(msg, 200, "put success (replicated)")
            } else {
                tracing::warn!(key = %msg.key, acks = quorum.acks, "put under-replicated");
                WireMessage::response_to(
                    msg,
                    202,
                    format!(
                        "put success (partial: {} of {} acks)",
                        1 + quorum.acks,
                        quorum.required
                    ),
                )
            }
        }
        NodeRole::Replica => WireMessage::response_to(msg, 200, "put success (local)"),
    }
}

async fn handle_delete(
    msg: &WireMessage,
    role: NodeRole,
    engine: &StorageEngine,
    coordinator: &ReplicationCoordinator,
) -> WireMessage {
    if msg.replication {
        return match engine.delete(&msg.key) {
            Ok(()) => WireMessage::response_to(msg, 200, "replication OK"),
            Err(e) => error_response(msg, e),
        };
    }

    if let Err(e) = engine.delete(&msg.key) {
        return error_response(msg, e);
    }

    // Deletes replicate under the same synchronous quorum policy as puts.
    match role {
        NodeRole::Primary => {
            let quorum = coordinator
                .sync_replicate(OpKind::Delete, &msg.key, None)
                .await;
            if quorum.reached() {
                WireMessage::response_to(msg, 200, "delete success (replicated)")
            } else {
                tracing::warn!(key = %msg.key, acks = quorum.acks, "delete under-replicated");
                WireMessage::response_to(
                    msg,
                    202,
                    format!(
                        "delete success (partial: {} of {} acks)",
                        1 + quorum.acks,
                        quorum.required
                    ),
                )
            }
        }
        NodeRole::Replica => WireMessage::response_to(msg, 200, "delete success (local)"),
    }
}

fn apply_replicated_put(msg: &WireMessage, engine: &StorageEngine) -> WireMessage {
    let value = match &msg.value {
        Some(value) => value,
        None => return WireMessage::response_to(msg, 400, "replicated put requires a value"),
    };
    match engine.put(&msg.key, value) {
        Ok(()) => WireMessage::response_to(msg, 200, "replication OK"),
        Err(e) => error_response(msg, e),
    }
}

fn error_response(msg: &WireMessage, e: Error) -> WireMessage {
    let status = e.status_code();
    if status >= 500 {
        tracing::error!(key = %msg.key, error = %e, "request failed");
    }
    WireMessage::response_to(msg, status, e.to_string())
}
