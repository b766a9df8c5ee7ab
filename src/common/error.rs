//! Error types for ringkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Ring / Placement Errors ===
    #[error("Hash ring is empty: no nodes registered")]
    EmptyRing,

    #[error("No replicas available for key: {0}")]
    NoReplicasAvailable(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    // === Replication Errors ===
    #[error("Quorum not reached: need {needed}, got {got}")]
    QuorumNotReached { needed: usize, got: usize },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Backup Errors ===
    #[error("Unknown backup id: {0}")]
    UnknownBackupId(String),

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    // === Input Errors ===
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === I/O & Encoding ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[cfg(feature = "sled-backend")]
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::QuorumNotReached { .. } | Error::NodeUnreachable(_) | Error::Timeout(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::KeyNotFound(_) | Error::UnknownBackupId(_) | Error::UnknownNode(_) => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidKey(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::EmptyRing
            | Error::NoReplicasAvailable(_)
            | Error::QuorumNotReached { .. }
            | Error::NodeUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::EmptyRing => "empty_ring",
            Error::NoReplicasAvailable(_) => "no_replicas_available",
            Error::UnknownNode(_) => "unknown_node",
            Error::QuorumNotReached { .. } => "quorum_not_reached",
            Error::KeyNotFound(_) => "key_not_found",
            Error::NodeUnreachable(_) => "node_unreachable",
            Error::Timeout(_) => "timeout",
            Error::UnknownBackupId(_) => "unknown_backup_id",
            Error::RestoreFailed(_) => "restore_failed",
            Error::ChecksumMismatch { .. } => "checksum_mismatch",
            Error::InvalidKey(_) => "invalid_key",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Http(_) => "http",
            #[cfg(feature = "sled-backend")]
            Error::Sled(_) => "storage",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::NodeUnreachable(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_retryable() {
        assert!(Error::QuorumNotReached { needed: 2, got: 1 }.is_retryable());
        assert!(Error::Timeout("put".into()).is_retryable());
        assert!(!Error::KeyNotFound("a".into()).is_retryable());
        assert!(!Error::EmptyRing.is_retryable());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(
            Error::KeyNotFound("a".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::QuorumNotReached { needed: 2, got: 0 }.to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::UnknownBackupId("b".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::InvalidKey("".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_display() {
        let e = Error::QuorumNotReached { needed: 2, got: 1 };
        assert_eq!(e.to_string(), "Quorum not reached: need 2, got 1");
        assert_eq!(e.kind(), "quorum_not_reached");
    }
}
