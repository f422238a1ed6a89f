//! Error types for nsmeta
//!
//! This module defines the common error type shared by the journal,
//! the backing store adapters and the replication pipeline.

use thiserror::Error;

/// Common result type for nsmeta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for nsmeta
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    // Journal structure errors
    #[error("journal corrupted at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("sequence number out of order: expected {expected}, got {actual}")]
    Sequencing { expected: u64, actual: u64 },

    #[error("journal is full: record of {required} bytes does not fit (max_size {max_size})")]
    JournalFull { required: u64, max_size: u64 },

    #[error("journal records expired: {0}")]
    Expired(String),

    #[error("journal is closed")]
    Closed,

    // Backing store errors
    #[error("backing store error: {message}")]
    Store { retryable: bool, message: String },

    // Request errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("request timeout")]
    Timeout,

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a corruption error at the given file offset
    pub fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            reason: reason.into(),
        }
    }

    /// Create an expired error
    pub fn expired(msg: impl Into<String>) -> Self {
        Self::Expired(msg.into())
    }

    /// Create a backing store error that may succeed when retried
    pub fn store_retryable(msg: impl Into<String>) -> Self {
        Self::Store {
            retryable: true,
            message: msg.into(),
        }
    }

    /// Create a backing store error that must not be retried
    pub fn store_fatal(msg: impl Into<String>) -> Self {
        Self::Store {
            retryable: false,
            message: msg.into(),
        }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Store {
                retryable: true,
                ..
            }
        )
    }

    /// Structural and sequencing errors stop a primary server.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::Sequencing { .. } | Self::Deserialization(_)
        )
    }

    /// Check if this error means the requested records are no longer retained
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::store_retryable("deadlock detected").is_retryable());
        assert!(!Error::store_fatal("constraint violation").is_retryable());
        assert!(!Error::Closed.is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::corrupt(4096, "bad magic").is_fatal());
        assert!(
            Error::Sequencing {
                expected: 3,
                actual: 5
            }
            .is_fatal()
        );
        assert!(!Error::expired("seqnum 10").is_fatal());
        assert!(!Error::store_retryable("busy").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let e = Error::JournalFull {
            required: 200,
            max_size: 4224,
        };
        assert_eq!(
            e.to_string(),
            "journal is full: record of 200 bytes does not fit (max_size 4224)"
        );
        assert!(Error::expired("x").is_expired());
    }
}
