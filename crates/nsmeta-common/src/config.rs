//! Configuration types for nsmeta
//!
//! This module defines configuration structures used across components.

use crate::error::{Error, Result};
use crate::types::ServerRole;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Journal file header size; the ring starts right after it
pub const JOURNAL_HEADER_SIZE: u64 = 4096;

/// Smallest ring that can hold a header and a few small records
pub const JOURNAL_MIN_SIZE: u64 = JOURNAL_HEADER_SIZE + 128;

/// Root configuration for nsmeta
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Journal configuration
    pub journal: JournalConfig,
    /// Backing store configuration
    pub store: StoreConfig,
    /// Replication configuration
    pub replication: ReplicationConfig,
}

impl Config {
    /// Check values that would make the server unusable
    pub fn validate(&self) -> Result<()> {
        if self.journal.max_size < JOURNAL_MIN_SIZE {
            return Err(Error::Configuration(format!(
                "journal.max_size must be at least {JOURNAL_MIN_SIZE} (currently {})",
                self.journal.max_size
            )));
        }
        if self.replication.fetch_batch_bytes == 0 {
            return Err(Error::Configuration(
                "replication.fetch_batch_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name (human-readable identifier)
    pub name: String,
    /// Data directory for journal and backing store
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "nsmeta".to_string(),
            data_dir: PathBuf::from("/var/lib/nsmeta"),
        }
    }
}

/// Journal configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding the journal files
    pub dir: PathBuf,
    /// Fixed ring capacity, including the header block
    pub max_size: u64,
    /// fdatasync after every record
    pub sync_on_write: bool,
    /// How long a writer waits for the main reader to free space
    #[serde(with = "duration_millis")]
    pub write_wait_timeout: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/nsmeta/journal"),
            max_size: 32 * 1024 * 1024, // 32MB
            sync_on_write: false,
            write_wait_timeout: Duration::from_secs(30),
        }
    }
}

impl JournalConfig {
    /// Path of the journal file for the given generation index
    #[must_use]
    pub fn file_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("{index:010}.gmj"))
    }
}

/// Backing store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file
    pub path: PathBuf,
    /// Pause between attempts after a retryable failure
    #[serde(with = "duration_millis")]
    pub retry_interval: Duration,
    /// Attempts before a retryable failure is treated as fatal
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/nsmeta/meta.redb"),
            retry_interval: Duration::from_millis(500),
            max_retries: 20,
        }
    }
}

/// Replication configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Role at startup
    pub role: ServerRole,
    /// A fetch batch is closed once it holds at least this many bytes
    pub fetch_batch_bytes: usize,
    /// How often blocked pipeline readers re-check for shutdown
    #[serde(with = "duration_millis")]
    pub read_poll_interval: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            role: ServerRole::Primary,
            fetch_batch_bytes: 8000,
            read_poll_interval: Duration::from_millis(100),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.replication.fetch_batch_bytes, 8000);
    }

    #[test]
    fn test_small_journal_rejected() {
        let mut config = Config::default();
        config.journal.max_size = JOURNAL_HEADER_SIZE;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_journal_file_name() {
        let config = JournalConfig {
            dir: PathBuf::from("/tmp/j"),
            ..Default::default()
        };
        assert_eq!(config.file_path(0), PathBuf::from("/tmp/j/0000000000.gmj"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"journal": {"max_size": 65536, "write_wait_timeout": 250}}"#)
                .unwrap();
        assert_eq!(config.journal.max_size, 65536);
        assert_eq!(config.journal.write_wait_timeout, Duration::from_millis(250));
        assert_eq!(config.store.max_retries, 20);
        assert_eq!(config.replication.role, ServerRole::Primary);
    }
}
