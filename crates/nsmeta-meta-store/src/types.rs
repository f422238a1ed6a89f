//! Stored types for backing store persistence.
//!
//! Journal payload types are stored as-is; these wrap the few rows that
//! carry extra state.

use nsmeta_journal::ops::HostInfo;
use serde::{Deserialize, Serialize};

/// Filesystem host row
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHost {
    pub info: HostInfo,
    pub fsngroup: String,
}

/// File checksum row
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCksum {
    pub cksum_type: String,
    pub sum: Vec<u8>,
}
