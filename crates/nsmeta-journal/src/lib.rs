//! nsmeta Journal - cyclic transaction journal
//!
//! This crate provides:
//! - The binary record codec for every namespace mutation
//! - A fixed-capacity, cyclic journal file with one writer and any number
//!   of readers, each tracked with a lap counter
//! - A transaction writer that groups records into BEGIN..END batches and
//!   elides empty transactions

pub mod codec;
pub mod file;
pub mod ops;
pub mod reader;
pub mod record;
mod scan;
pub mod txn;

pub use file::{JournalFile, JournalHandle, RawRecord, RawWriteSummary};
pub use ops::{JournalOp, OpAction, OperationTag};
pub use reader::{JournalReader, ReadOutcome};
pub use record::{JournalRecord, RawRecords, RecordHeader};
pub use scan::JOURNAL_INITIAL_WLAP;
pub use txn::{SeqnumCounter, TransactionWriter};
