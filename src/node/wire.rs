//! Wire protocol for node-to-node and client-to-node traffic
//!
//! Messages are bincode-encoded and carried in an explicit frame:
//!
//! ```text
//! [BODY_LEN: u32 LE][CRC32(body): u32 LE][BODY: bincode]
//! ```
//!
//! The frame is self-delimiting, so a consumed frame that fails its checksum
//! or fails to decode leaves the stream aligned and the connection usable.
//! Only a declared length past [`MAX_FRAME_SIZE`] is unrecoverable, because
//! the body is never read.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::common::{Error, Result};

/// Upper bound on a frame body. Large enough for any reasonable value,
/// small enough that a garbage length prefix cannot trigger a huge alloc.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Message type discriminant.
///
/// `ReplicationApply` survives as an explicit variant for replication
/// traffic; it is handled exactly like a replication-flagged `Put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Put,
    Get,
    Delete,
    ReplicationApply,
    Response,
}

/// The write operations a primary fans out to its replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Put,
    Delete,
}

/// One protocol message. Requests and responses share the shape;
/// `status_code` and `message` are only meaningful on responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub msg_type: MessageType,
    pub key: String,
    pub value: Option<Vec<u8>>,
    /// Set on every message a primary sends to its replicas. A receiver
    /// applies a flagged message locally and never re-replicates it.
    pub replication: bool,
    pub request_id: String,
    pub status_code: u16,
    pub message: String,
}

impl WireMessage {
    fn request(msg_type: MessageType, key: &str, value: Option<Vec<u8>>) -> Self {
        Self {
            msg_type,
            key: key.to_string(),
            value,
            replication: false,
            request_id: Uuid::new_v4().to_string(),
            status_code: 0,
            message: String::new(),
        }
    }

    pub fn put(key: &str, value: Vec<u8>) -> Self {
        Self::request(MessageType::Put, key, Some(value))
    }

    pub fn get(key: &str) -> Self {
        Self::request(MessageType::Get, key, None)
    }

    pub fn delete(key: &str) -> Self {
        Self::request(MessageType::Delete, key, None)
    }

    /// Replication message a primary sends to one replica.
    pub fn replication(op: OpKind, key: &str, value: Option<Vec<u8>>) -> Self {
        let msg_type = match op {
            OpKind::Put => MessageType::Put,
            OpKind::Delete => MessageType::Delete,
        };
        let mut msg = Self::request(msg_type, key, value);
        msg.replication = true;
        msg
    }

    /// Response to a request, echoing its key and request id.
    pub fn response_to(req: &WireMessage, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Response,
            key: req.key.clone(),
            value: None,
            replication: false,
            request_id: req.request_id.clone(),
            status_code,
            message: message.into(),
        }
    }

    /// Response carrying no request context, for frames that never decoded.
    pub fn bare_response(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Response,
            key: String::new(),
            value: None,
            replication: false,
            request_id: String::new(),
            status_code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }
}

/// Write one framed message.
pub async fn write_frame<W>(writer: &mut W, msg: &WireMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body =
        bincode::serialize(msg).map_err(|e| Error::Protocol(format!("encode failed: {}", e)))?;
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(Error::Protocol(format!(
            "frame body {} exceeds max {}",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(&crc32fast::hash(&body).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. `Ok(None)` means the peer closed the connection
/// cleanly between frames.
///
/// `Error::Corrupted` means the frame was consumed but unusable (checksum or
/// decode failure); the stream is still aligned. `Error::Protocol` means the
/// stream cannot be trusted any further.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<WireMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let body_len = u32::from_le_bytes(len_buf);
    if body_len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "declared frame body {} exceeds max {}",
            body_len, MAX_FRAME_SIZE
        )));
    }

    let mut crc_buf = [0u8; 4];
    reader.read_exact(&mut crc_buf).await?;
    let expected_crc = u32::from_le_bytes(crc_buf);

    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body).await?;

    let actual_crc = crc32fast::hash(&body);
    if actual_crc != expected_crc {
        return Err(Error::Corrupted(format!(
            "frame checksum mismatch: expected {:08x}, got {:08x}",
            expected_crc, actual_crc
        )));
    }

    let msg = bincode::deserialize(&body)
        .map_err(|e| Error::Corrupted(format!("undecodable message: {}", e)))?;
    Ok(Some(msg))
}
