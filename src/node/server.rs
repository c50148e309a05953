//! Node server
//!
//! Owns the storage engine, the replication coordinator, and the TCP accept
//! loop. Each connection runs in its own task and answers its frames in
//! arrival order; connections never block one another.
//!
//! A control handle drives the node through a closed command enum. The
//! reconfiguration sequence is deliberately stop-the-world: stop accepting,
//! force-close existing connections, rebuild the coordinator, rebind. The
//! node is unavailable for that window; an atomic swap of the coordinator
//! reference would avoid it but is not what this server does.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::common::{Error, NodeConfig, NodeRole, Result};
use crate::engine::StorageEngine;
use crate::node::handler::handle_message;
use crate::node::replication::ReplicationCoordinator;
use crate::node::wire::{read_frame, write_frame, WireMessage};

/// Lifecycle state, visible through `Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Ready,
    Reconfiguring,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Ready => write!(f, "ready"),
            NodeState::Reconfiguring => write!(f, "reconfiguring"),
        }
    }
}

/// Point-in-time node introspection.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: String,
    pub role: NodeRole,
    pub state: NodeState,
    pub replicas: Vec<String>,
    pub write_count: u64,
    pub key_count: usize,
}

/// Control-plane commands, dispatched by pattern matching. Deliberately a
/// closed enum rather than stringly-typed actions.
#[derive(Debug)]
pub enum ControlCommand {
    /// Adopt a new replica set; the node is unavailable while it applies.
    Reconfigure {
        replicas: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle for driving a running node.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<ControlCommand>,
}

impl NodeHandle {
    pub async fn reconfigure(&self, replicas: Vec<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::Reconfigure { replicas, reply })
            .await
            .map_err(|_| Error::Internal("node is no longer running".into()))?;
        rx.await
            .map_err(|_| Error::Internal("node dropped the reconfigure request".into()))?
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::Status { reply })
            .await
            .map_err(|_| Error::Internal("node is no longer running".into()))?;
        rx.await
            .map_err(|_| Error::Internal("node dropped the status request".into()))
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::Shutdown { reply })
            .await
            .map_err(|_| Error::Internal("node is no longer running".into()))?;
        let _ = rx.await;
        Ok(())
    }
}

pub struct NodeServer {
    config: NodeConfig,
    engine: Arc<StorageEngine>,
    coordinator: Arc<ReplicationCoordinator>,
    /// `None` only while reconfiguring, when the node accepts nothing.
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    state: NodeState,
    commands: mpsc::Receiver<ControlCommand>,
    /// Force-close signal for connection tasks during reconfigure/shutdown.
    drain: broadcast::Sender<()>,
}

impl NodeServer {
    /// Open the engine, build the coordinator, and bind the listener.
    /// Returns the server plus the handle that controls it.
    pub async fn bind(config: NodeConfig) -> Result<(Self, NodeHandle)> {
        config.validate()?;

        let engine = Arc::new(StorageEngine::open(
            &config.data_dir,
            config.filter_expected_keys,
            config.filter_fp_rate,
        )?);
        let coordinator = Arc::new(ReplicationCoordinator::new(
            config.replicas.clone(),
            config.connect_timeout(),
            config.ack_timeout(),
        ));

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (drain, _) = broadcast::channel(1);

        tracing::info!(
            node_id = %config.node_id,
            addr = %local_addr,
            role = %config.role,
            replicas = ?config.replicas,
            "node bound"
        );

        let server = Self {
            config,
            engine,
            coordinator,
            listener: Some(listener),
            local_addr,
            state: NodeState::Ready,
            commands: commands_rx,
            drain,
        };
        let handle = NodeHandle {
            commands: commands_tx,
        };
        Ok((server, handle))
    }

    /// The address actually bound, useful when the config asked for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drive the node until shutdown. Consumes the server; the engine is
    /// closed last, after the listener is gone and connections are drained.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(node_id = %self.config.node_id, "node serving");

        loop {
            tokio::select! {
                accepted = accept_next(&self.listener) => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(ControlCommand::Reconfigure { replicas, reply }) => {
                            let result = self.reconfigure(replicas).await;
                            let _ = reply.send(result);
                        }
                        Some(ControlCommand::Status { reply }) => {
                            let _ = reply.send(self.status());
                        }
                        Some(ControlCommand::Shutdown { reply }) => {
                            let _ = reply.send(());
                            break;
                        }
                        // Every handle dropped; nothing can drive the node.
                        None => break,
                    }
                }
            }
        }

        // Shutdown order: stop accepting, abandon in-flight work, close the
        // engine last.
        self.listener = None;
        let _ = self.drain.send(());
        self.engine.close()?;
        tracing::info!(node_id = %self.config.node_id, "node stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let engine = self.engine.clone();
        let coordinator = self.coordinator.clone();
        let role = self.config.role;
        let drain = self.drain.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, role, engine, coordinator, drain).await {
                tracing::debug!(peer = %peer, error = %e, "connection ended with error");
            }
        });
    }

    /// Stop-the-world replica-set change: READY -> RECONFIGURING -> READY.
    async fn reconfigure(&mut self, replicas: Vec<String>) -> Result<()> {
        if self.config.role != NodeRole::Primary {
            return Err(Error::InvalidConfig(
                "only a primary carries a replica set".into(),
            ));
        }
        for addr in &replicas {
            crate::common::parse_node_addr(addr)?;
        }

        self.state = NodeState::Reconfiguring;
        tracing::warn!(
            node_id = %self.config.node_id,
            new_replicas = ?replicas,
            "reconfiguring, node unavailable until rebind"
        );

        // 1. Stop accepting new connections.
        self.listener = None;
        // 2. Force-close existing connections.
        let _ = self.drain.send(());
        // 3. Rebuild the coordinator against the new replica set.
        self.coordinator = Arc::new(ReplicationCoordinator::new(
            replicas.clone(),
            self.config.connect_timeout(),
            self.config.ack_timeout(),
        ));
        self.config.replicas = replicas;
        // 4. Resume accepting.
        let listener = TcpListener::bind(self.local_addr).await?;
        self.local_addr = listener.local_addr()?;
        self.listener = Some(listener);

        self.state = NodeState::Ready;
        tracing::info!(node_id = %self.config.node_id, "reconfiguration complete");
        Ok(())
    }

    fn status(&self) -> NodeStatus {
        let stats = self.engine.stats();
        NodeStatus {
            node_id: self.config.node_id.clone(),
            role: self.config.role,
            state: self.state,
            replicas: self.coordinator.replicas().to_vec(),
            write_count: stats.write_count,
            key_count: stats.key_count,
        }
    }
}

/// Accept on the listener when present; pend forever while reconfiguring so
/// the select loop only sees commands.
async fn accept_next(listener: &Option<TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Serve one connection: frames are answered strictly in arrival order, and
/// a malformed-but-consumed frame answers 400 without closing the stream.
async fn serve_connection(
    mut stream: TcpStream,
    role: NodeRole,
    engine: Arc<StorageEngine>,
    coordinator: Arc<ReplicationCoordinator>,
    mut drain: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            frame = read_frame(&mut stream) => {
                match frame {
                    Ok(Some(msg)) => {
                        let response = handle_message(msg, role, &engine, &coordinator).await;
                        write_frame(&mut stream, &response).await?;
                    }
                    // Peer closed cleanly.
                    Ok(None) => return Ok(()),
                    // Frame consumed but unusable: the stream is still
                    // aligned, so answer 400 and keep serving.
                    Err(e @ Error::Corrupted(_)) => {
                        let response = WireMessage::bare_response(400, e.to_string());
                        write_frame(&mut stream, &response).await?;
                    }
                    // Desynced or dead stream: report and hang up.
                    Err(e) => {
                        let response = WireMessage::bare_response(400, e.to_string());
                        let _ = write_frame(&mut stream, &response).await;
                        return Err(e);
                    }
                }
            }
            _ = drain.recv() => {
                tracing::debug!("connection force-closed by drain");
                return Ok(());
            }
        }
    }
}
