//! nsmeta Metadata Store - backing persistence
//!
//! This crate implements the redb store that holds the durable copy of the
//! namespace, and the [`DbOps`] trait through which mutations reach it.

pub mod db_ops;
pub mod store;
pub mod tables;
pub mod types;

// Re-exports
pub use db_ops::{DbOps, EmptyDbOps};
pub use store::{MetaStore, MetaStoreError, MetaStoreResult};
pub use types::{StoredCksum, StoredHost};
