//! Core type definitions for nsmeta
//!
//! Primitive identifiers shared by the journal, the namespace and the
//! backing store.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Journal sequence number. Strictly increasing across the whole log.
pub type Seqnum = u64;

/// Inode number.
pub type InodeNumber = u64;

/// Sequence number meaning "nothing recorded yet"
pub const SEQNUM_INVALID: Seqnum = 0;

/// Inode numbers below this are reserved and never allocated
pub const ROOT_INUMBER: InodeNumber = 2;

/// File type bits of an inode mode
pub const S_IFMT: u32 = 0o170_000;
/// Directory
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file
pub const S_IFREG: u32 = 0o100_000;
/// Symbolic link
pub const S_IFLNK: u32 = 0o120_000;

/// Seconds + nanoseconds timestamp as carried in journal records
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{sec}.{nsec:09}")]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i32,
}

impl Timespec {
    #[must_use]
    pub const fn new(sec: i64, nsec: i32) -> Self {
        Self { sec, nsec }
    }
}

/// Role of this metadata server in a replicated deployment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    /// Accepts mutations and ships its journal to standbys
    #[default]
    #[display("primary")]
    Primary,
    /// Receives the primary's journal and applies it
    #[display("standby")]
    Standby,
}
