//! Namespace error types

use nsmeta_common::InodeNumber;
use thiserror::Error;

/// Semantic failure of a namespace mutation. These never indicate
/// corruption; the apply path logs them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("no such object: {0}")]
    NoSuchObject(String),

    #[error("no such user: {0}")]
    NoSuchUser(String),

    #[error("no such group: {0}")]
    NoSuchGroup(String),

    #[error("no such file or directory: {0}")]
    NoSuchFileOrDirectory(String),

    #[error("not a directory: inode {0}")]
    NotADirectory(InodeNumber),

    #[error("inode {0} is busy")]
    Busy(InodeNumber),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl NamespaceError {
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn no_such_object(what: impl Into<String>) -> Self {
        Self::NoSuchObject(what.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Result alias for namespace mutations
pub type NsResult<T> = std::result::Result<T, NamespaceError>;
