//! Wire-protocol client
//!
//! One TCP connection to one node. Used by the replication fan-out, the CLI,
//! and the integration tests. Dropping the client closes the connection.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

use crate::common::{Error, Result};
use crate::node::wire::{read_frame, write_frame, WireMessage};

pub struct NodeClient {
    stream: TcpStream,
    addr: String,
}

impl NodeClient {
    /// Connect to a node, bounded by `connect_timeout`.
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self> {
        let stream = time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(format!("connect to {}", addr)))?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;
        Ok(Self {
            stream,
            addr: addr.to_string(),
        })
    }

    /// Send one request and wait up to `ack_timeout` for its response.
    pub async fn call(&mut self, msg: &WireMessage, ack_timeout: Duration) -> Result<WireMessage> {
        write_frame(&mut self.stream, msg).await?;

        let response = time::timeout(ack_timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| Error::Timeout(format!("awaiting response from {}", self.addr)))??;

        response.ok_or_else(|| {
            Error::ConnectionFailed(format!("{} closed before responding", self.addr))
        })
    }
}
