//! Journal reader handles

use crate::file::{JournalHandle, RawRecord};
use crate::ops::JournalOp;
use crate::record::{JournalRecord, RECORD_CRC_SIZE, RECORD_HEADER_SIZE};
use nsmeta_common::Result;
use std::time::Duration;

pub(crate) type ReaderId = u64;

/// Result of a read that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    Record(T),
    /// Caught up with the writer
    Eof,
    /// The journal was closed
    Closed,
    /// Woken by [`crate::JournalFile::drain_reader`]
    Drained,
}

impl<T> ReadOutcome<T> {
    fn map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<ReadOutcome<U>> {
        Ok(match self {
            Self::Record(t) => ReadOutcome::Record(f(t)?),
            Self::Eof => ReadOutcome::Eof,
            Self::Closed => ReadOutcome::Closed,
            Self::Drained => ReadOutcome::Drained,
        })
    }
}

/// A cursor over the journal. Dropping it detaches the cursor so it no
/// longer holds back (or gets invalidated by) the writer.
#[derive(Debug)]
pub struct JournalReader {
    journal: JournalHandle,
    id: ReaderId,
}

impl JournalReader {
    pub(crate) const fn new(journal: JournalHandle, id: ReaderId) -> Self {
        Self { journal, id }
    }

    #[must_use]
    pub const fn journal(&self) -> &JournalHandle {
        &self.journal
    }

    /// Read and decode the next record, waiting up to `timeout` (forever
    /// with `None`) for the writer.
    pub fn read(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome<JournalRecord>> {
        self.journal.read_raw(self.id, timeout)?.map(|raw| {
            let payload =
                &raw.bytes[RECORD_HEADER_SIZE..raw.bytes.len() - RECORD_CRC_SIZE];
            let op = JournalOp::decode(raw.header.op_tag()?, payload)?;
            Ok(JournalRecord::new(raw.header.seqnum, op))
        })
    }

    /// Copy out the next record verbatim without waiting
    pub fn read_serialized(&mut self) -> Result<ReadOutcome<RawRecord>> {
        self.journal.read_raw(self.id, Some(Duration::ZERO))
    }

    /// Release everything read so far to the writer
    pub fn commit(&mut self) {
        self.journal.commit(self.id);
    }

    /// False once the writer has overrun this reader
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.journal.reader_status(self.id).0
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.journal.reader_status(self.id).1
    }
}

impl Drop for JournalReader {
    fn drop(&mut self) {
        self.journal.detach_reader(self.id);
    }
}
