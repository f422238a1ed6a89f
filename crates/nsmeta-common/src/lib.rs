//! nsmeta Common - Shared types and utilities
//!
//! This crate provides the error type, configuration structures,
//! checksum helpers and primitive identifiers used by every nsmeta
//! component.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::RecordChecksum;
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
