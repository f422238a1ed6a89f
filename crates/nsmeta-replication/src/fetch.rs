//! Primary side of journal replication: serving records to a standby
//!
//! Each standby connection gets a [`Fetcher`] holding a fan-out reader on
//! the primary's journal. The reader never blocks the writer; when the
//! writer overruns it the next fetch fails with `Expired` and the standby
//! has to resynchronize from the backing store.

use bytes::{Bytes, BytesMut};
use nsmeta_common::{Error, Result, Seqnum};
use nsmeta_journal::{JournalHandle, JournalReader, ReadOutcome, SeqnumCounter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Serialized records ready to be shipped
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchBatch {
    /// Back-to-back records exactly as they sit in the journal
    pub bytes: Bytes,
    pub from: Seqnum,
    pub to: Seqnum,
    pub records: usize,
}

pub struct Fetcher {
    journal: JournalHandle,
    counter: Arc<SeqnumCounter>,
    reader: JournalReader,
    batch_bytes: usize,
    /// First seqnum the reader will hand out
    next_seqnum: Seqnum,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("next_seqnum", &self.next_seqnum)
            .field("batch_bytes", &self.batch_bytes)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Attach a fan-out reader for a standby that holds everything up to
    /// `after_seqnum`, which should close a transaction
    pub fn attach(
        journal: &JournalHandle,
        counter: Arc<SeqnumCounter>,
        after_seqnum: Seqnum,
        batch_bytes: usize,
    ) -> Result<Self> {
        let reader = journal.add_reader(after_seqnum)?;
        Ok(Self {
            journal: Arc::clone(journal),
            counter,
            reader,
            batch_bytes: batch_bytes.max(1),
            next_seqnum: after_seqnum + 1,
        })
    }

    #[must_use]
    pub const fn next_seqnum(&self) -> Seqnum {
        self.next_seqnum
    }

    /// Collect records with seqnum `min_seqnum` or later, up to roughly
    /// `batch_bytes`. When nothing is available waits up to `timeout` for
    /// the writer; returns `None` if nothing arrived.
    pub fn fetch(&mut self, min_seqnum: Seqnum, timeout: Duration) -> Result<Option<FetchBatch>> {
        let current = self.counter.current();
        if min_seqnum > current + 1 {
            info!(
                "fetch: min_seqnum={} is ahead of seqnum={}",
                min_seqnum, current
            );
            return Err(Error::expired(format!(
                "seqnum {min_seqnum} is ahead of the journal (last {current})"
            )));
        }
        if !self.reader.is_valid() {
            return Err(Error::expired(format!(
                "reader at seqnum {} was overrun by the writer",
                self.next_seqnum
            )));
        }
        if min_seqnum < self.next_seqnum {
            // the standby lost part of an earlier batch
            debug!(
                "fetch: rewinding reader from seqnum={} to {}",
                self.next_seqnum, min_seqnum
            );
            self.reader = self.journal.add_reader(min_seqnum.saturating_sub(1))?;
            self.next_seqnum = min_seqnum;
        }

        let mut buf = BytesMut::with_capacity(self.batch_bytes);
        let mut batch: Option<(Seqnum, Seqnum)> = None;
        let mut records = 0usize;
        let mut waited = false;
        while buf.len() < self.batch_bytes {
            match self.reader.read_serialized()? {
                ReadOutcome::Record(raw) => {
                    let seqnum = raw.header.seqnum;
                    if seqnum < min_seqnum {
                        continue;
                    }
                    buf.extend_from_slice(&raw.bytes);
                    records += 1;
                    batch = Some((batch.map_or(seqnum, |(from, _)| from), seqnum));
                }
                ReadOutcome::Eof if records == 0 && !waited => {
                    waited = true;
                    if !self.journal.wait_until_readable(timeout) {
                        break;
                    }
                }
                ReadOutcome::Eof | ReadOutcome::Closed | ReadOutcome::Drained => break,
            }
        }
        self.reader.commit();

        let Some((from, to)) = batch else {
            return Ok(None);
        };
        self.next_seqnum = to + 1;
        debug!(
            "fetch: seqnum={}..{} records={} bytes={}",
            from,
            to,
            records,
            buf.len()
        );
        Ok(Some(FetchBatch {
            bytes: buf.freeze(),
            from,
            to,
            records,
        }))
    }
}
