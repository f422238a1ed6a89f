//! nsmeta Replication - apply engine, journal drain and primary/standby
//!
//! This crate provides:
//! - The apply engine that replays journal records into the namespace
//! - The mutation front door that allocates seqnums and journals operations
//! - The pipeline that drains the journal into the backing store and, on a
//!   standby, into memory
//! - Fetch and receive halves of journal shipping between nodes
//! - Server boot and standby promotion

pub mod apply;
pub mod boot;
pub mod db;
pub mod fetch;
pub mod pipeline;
pub mod standby;

// Re-exports
pub use apply::{ApplyEngine, ApplyOutcome, apply_op, validate_batch};
pub use boot::{MetadataServer, load_namespace};
pub use db::{JournalDbOps, MetadataDb};
pub use fetch::{FetchBatch, Fetcher};
pub use pipeline::{Pipeline, PipelineOptions, store_with_retry};
pub use standby::StandbyWriter;
