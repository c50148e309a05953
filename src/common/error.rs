//! Error types for ringkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Validation Errors ===
    #[error("Validation error: {0}")]
    Validation(String),

    // === Storage Errors ===
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Storage fault: {0}")]
    Storage(#[from] sled::Error),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    // === Routing Errors ===
    #[error("Hash ring is empty, no nodes registered")]
    EmptyRing,

    // === Network Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map an error to the status code carried in a wire response.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Validation(_) | Error::Protocol(_) | Error::InvalidConfig(_) => 400,
            Error::Timeout(_) => 408,
            Error::ConnectionFailed(_) | Error::EmptyRing => 503,
            _ => 500,
        }
    }

    /// Connectivity failures count against the replication quorum but never
    /// fail the primary's local write.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_) | Error::Timeout(_) | Error::Io(_)
        )
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFound("k".into()).status_code(), 404);
        assert_eq!(Error::Validation("empty key".into()).status_code(), 400);
        assert_eq!(Error::Protocol("bad frame".into()).status_code(), 400);
        assert_eq!(Error::EmptyRing.status_code(), 503);
        assert_eq!(Error::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(Error::ConnectionFailed("refused".into()).is_connectivity());
        assert!(Error::Timeout("ack".into()).is_connectivity());
        assert!(!Error::NotFound("k".into()).is_connectivity());
    }
}
