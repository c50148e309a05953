//! Replication coordinator
//!
//! Fans a primary-side write out to the configured replicas and applies a
//! majority-quorum policy. One attempt per target per call, no retries and
//! no backoff; a failed target simply does not count toward the quorum.

use futures_util::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time;

use crate::common::{Error, Result};
use crate::node::client::NodeClient;
use crate::node::wire::{OpKind, WireMessage};

/// Outcome of one replication call. Partial success is a first-class result,
/// not an error: the caller distinguishes fully-replicated from
/// under-replicated by [`QuorumResult::reached`].
#[derive(Debug, Clone, Copy)]
pub struct QuorumResult {
    /// Replica acknowledgements received in time.
    pub acks: usize,
    /// Replicas the write was dispatched to.
    pub targets: usize,
    /// Majority of the replication factor, counting the primary.
    pub required: usize,
}

impl QuorumResult {
    /// The primary's own write counts as one success, so quorum is reached
    /// when `1 + acks` meets the majority of `targets + 1`.
    pub fn reached(&self) -> bool {
        1 + self.acks >= self.required
    }
}

pub struct ReplicationCoordinator {
    replicas: Vec<String>,
    connect_timeout: Duration,
    ack_timeout: Duration,
    /// Bounded worker pool for fan-out tasks.
    pool: Arc<Semaphore>,
}

impl ReplicationCoordinator {
    pub fn new(replicas: Vec<String>, connect_timeout: Duration, ack_timeout: Duration) -> Self {
        let pool_size = replicas.len().max(2);
        Self {
            replicas,
            connect_timeout,
            ack_timeout,
            pool: Arc::new(Semaphore::new(pool_size)),
        }
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    pub fn replication_factor(&self) -> usize {
        self.replicas.len() + 1
    }

    /// Synchronous replication: dispatch to every replica, block until all
    /// attempts report or the aggregate timeout fires, then count acks
    /// against the majority. Stragglers past the timeout are abandoned, not
    /// cancelled; each task closes its own connection on every exit path.
    pub async fn sync_replicate(
        &self,
        op: OpKind,
        key: &str,
        value: Option<&[u8]>,
    ) -> QuorumResult {
        let required = self.replication_factor().div_ceil(2);
        let targets = self.replicas.len();

        if targets == 0 {
            return QuorumResult {
                acks: 0,
                targets,
                required,
            };
        }

        let msg = WireMessage::replication(op, key, value.map(<[u8]>::to_vec));
        let acks = Arc::new(AtomicUsize::new(0));

        let mut attempts = Vec::with_capacity(targets);
        for addr in &self.replicas {
            attempts.push(self.dispatch_attempt(addr.clone(), msg.clone(), Some(acks.clone())));
        }

        // The aggregate bound covers the slowest well-behaved attempt:
        // connect, send, then one ack wait.
        let aggregate = self.connect_timeout + self.ack_timeout;
        if time::timeout(aggregate, join_all(attempts)).await.is_err() {
            tracing::warn!(
                key,
                acks = acks.load(Ordering::SeqCst),
                "replication aggregate timeout, abandoning stragglers"
            );
        }

        let result = QuorumResult {
            acks: acks.load(Ordering::SeqCst),
            targets,
            required,
        };
        tracing::debug!(
            key,
            acks = result.acks,
            targets = result.targets,
            required = result.required,
            quorum = result.reached(),
            "sync replication finished"
        );
        result
    }

    /// Fire-and-forget replication: dispatch without waiting. Failures are
    /// logged by the attempt tasks and never surfaced to the caller.
    pub fn async_replicate(&self, op: OpKind, key: &str, value: Option<&[u8]>) {
        if self.replicas.is_empty() {
            return;
        }
        let msg = WireMessage::replication(op, key, value.map(<[u8]>::to_vec));
        for addr in &self.replicas {
            let _ = self.dispatch_attempt(addr.clone(), msg.clone(), None);
        }
    }

    /// Spawn one replication attempt. The returned handle may be awaited
    /// (sync path) or dropped (async path); the task runs either way.
    fn dispatch_attempt(
        &self,
        addr: String,
        msg: WireMessage,
        acks: Option<Arc<AtomicUsize>>,
    ) -> tokio::task::JoinHandle<()> {
        let pool = self.pool.clone();
        let connect_timeout = self.connect_timeout;
        let ack_timeout = self.ack_timeout;

        tokio::spawn(async move {
            let _permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            match replicate_once(&addr, &msg, connect_timeout, ack_timeout).await {
                Ok(()) => {
                    if let Some(acks) = acks {
                        acks.fetch_add(1, Ordering::SeqCst);
                    }
                    tracing::debug!(replica = %addr, key = %msg.key, "replication acknowledged");
                }
                Err(e) => {
                    tracing::warn!(replica = %addr, key = %msg.key, error = %e, "replication attempt failed");
                }
            }
        })
    }
}

/// One attempt against one replica: connect, send, await a single ack.
/// The connection is closed when the client drops, on every path.
async fn replicate_once(
    addr: &str,
    msg: &WireMessage,
    connect_timeout: Duration,
    ack_timeout: Duration,
) -> Result<()> {
    let mut client = NodeClient::connect(addr, connect_timeout).await?;
    let response = client.call(msg, ack_timeout).await?;
    if response.is_ok() {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "replica {} answered {}: {}",
            addr, response.status_code, response.message
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::wire::{read_frame, write_frame, MessageType};
    use tokio::net::TcpListener;

    /// A replica stub that acks every frame with the given status.
    async fn spawn_stub_replica(status_code: u16) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    while let Ok(Some(msg)) = read_frame(&mut stream).await {
                        let resp = WireMessage::response_to(&msg, status_code, "stub");
                        if write_frame(&mut stream, &resp).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    /// An address nothing listens on.
    async fn dead_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    fn coordinator(replicas: Vec<String>) -> ReplicationCoordinator {
        ReplicationCoordinator::new(
            replicas,
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_quorum_arithmetic() {
        // Factor 3 (2 replicas): majority is 2, primary counts as 1.
        let one_ack = QuorumResult {
            acks: 1,
            targets: 2,
            required: 2,
        };
        assert!(one_ack.reached());

        let no_acks = QuorumResult {
            acks: 0,
            targets: 2,
            required: 2,
        };
        assert!(!no_acks.reached());

        // Factor 5 (4 replicas): majority is 3, so 2 acks reach it.
        let factor_five = QuorumResult {
            acks: 2,
            targets: 4,
            required: 3,
        };
        assert!(factor_five.reached());
    }

    #[tokio::test]
    async fn test_empty_replica_list_trivially_succeeds() {
        let coord = coordinator(vec![]);
        let result = coord.sync_replicate(OpKind::Put, "k", Some(b"v")).await;
        assert_eq!(result.targets, 0);
        assert!(result.reached());
    }

    #[tokio::test]
    async fn test_both_replicas_ack() {
        let a = spawn_stub_replica(200).await;
        let b = spawn_stub_replica(200).await;
        let coord = coordinator(vec![a, b]);

        let result = coord.sync_replicate(OpKind::Put, "k", Some(b"v")).await;
        assert_eq!(result.acks, 2);
        assert!(result.reached());
    }

    #[tokio::test]
    async fn test_one_ack_reaches_majority_of_three() {
        let alive = spawn_stub_replica(200).await;
        let dead = dead_addr().await;
        let coord = coordinator(vec![alive, dead]);

        let result = coord.sync_replicate(OpKind::Put, "k", Some(b"v")).await;
        assert_eq!(result.acks, 1);
        assert!(result.reached());
    }

    #[tokio::test]
    async fn test_zero_acks_misses_quorum() {
        let coord = coordinator(vec![dead_addr().await, dead_addr().await]);
        let result = coord.sync_replicate(OpKind::Put, "k", Some(b"v")).await;
        assert_eq!(result.acks, 0);
        assert!(!result.reached());
    }

    #[tokio::test]
    async fn test_error_status_is_not_an_ack() {
        let failing = spawn_stub_replica(500).await;
        let coord = coordinator(vec![failing]);
        let result = coord.sync_replicate(OpKind::Delete, "k", None).await;
        assert_eq!(result.acks, 0);
        assert!(!result.reached());
    }

    #[tokio::test]
    async fn test_replication_message_shape() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let received = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let msg = read_frame(&mut stream).await.unwrap().unwrap();
            let resp = WireMessage::response_to(&msg, 200, "ok");
            write_frame(&mut stream, &resp).await.unwrap();
            msg
        });

        let coord = coordinator(vec![addr]);
        let result = coord.sync_replicate(OpKind::Put, "k1", Some(b"v1")).await;
        assert!(result.reached());

        let msg = received.await.unwrap();
        assert_eq!(msg.msg_type, MessageType::Put);
        assert!(msg.replication);
        assert_eq!(msg.key, "k1");
        assert_eq!(msg.value.as_deref(), Some(b"v1".as_slice()));
    }

    #[tokio::test]
    async fn test_async_replicate_returns_immediately() {
        let replica = spawn_stub_replica(200).await;
        let coord = coordinator(vec![replica, dead_addr().await]);
        // Nothing to assert beyond "does not block or panic"; failures are
        // logged inside the attempt tasks.
        coord.async_replicate(OpKind::Put, "k", Some(b"v"));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
