//! Transaction log writer
//!
//! Groups journal records into BEGIN..END transactions on top of a
//! [`JournalFile`]. Only the outermost begin/end touch the file, and the
//! BEGIN record is deferred until the first operation so that empty
//! transactions leave no trace and consume no sequence numbers.
//!
//! A record the journal refuses (full ring, closed file) hands its
//! sequence number back, so the caller can retry or shed load. An END that
//! could not be written is written when the next transaction begins.

use crate::file::JournalHandle;
use crate::ops::JournalOp;
use crate::record::record_len;
use nsmeta_common::{Error, Result, Seqnum};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lock-protected monotonic sequence number source shared by every
/// mutation entry point.
#[derive(Debug, Default)]
pub struct SeqnumCounter {
    current: Mutex<Seqnum>,
}

impl SeqnumCounter {
    #[must_use]
    pub fn new(current: Seqnum) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(current),
        })
    }

    /// Last sequence number handed out
    #[must_use]
    pub fn current(&self) -> Seqnum {
        *self.current.lock()
    }

    /// Reserve the next sequence number
    pub fn next(&self) -> Seqnum {
        let mut cur = self.current.lock();
        *cur += 1;
        *cur
    }

    pub fn set(&self, seqnum: Seqnum) {
        *self.current.lock() = seqnum;
    }

    /// Give back `seqnum` if it is the latest one handed out
    fn give_back(&self, seqnum: Seqnum) -> Result<()> {
        let mut cur = self.current.lock();
        if *cur != seqnum {
            return Err(Error::Sequencing {
                expected: *cur,
                actual: seqnum,
            });
        }
        *cur = seqnum - 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TxnState {
    depth: u32,
    /// Reserved BEGIN seqnum not written yet
    pending_begin: Option<Seqnum>,
    begin_seqnum: Seqnum,
    /// Last seqnum consumed by this writer, written or reserved
    last_seqnum: Seqnum,
    /// A transaction is on file without its END
    unclosed: bool,
}

/// BEGIN/END grouping with lazy BEGIN
#[derive(Debug)]
pub struct TransactionWriter {
    journal: JournalHandle,
    counter: Arc<SeqnumCounter>,
    state: Mutex<TxnState>,
}

impl TransactionWriter {
    /// The counter must not be behind the journal
    #[must_use]
    pub fn new(journal: JournalHandle, counter: Arc<SeqnumCounter>) -> Self {
        let last_seqnum = counter.current().max(journal.last_seqnum());
        counter.set(last_seqnum);
        Self {
            journal,
            counter,
            state: Mutex::new(TxnState {
                last_seqnum,
                ..Default::default()
            }),
        }
    }

    #[must_use]
    pub const fn counter(&self) -> &Arc<SeqnumCounter> {
        &self.counter
    }

    #[must_use]
    pub const fn journal(&self) -> &JournalHandle {
        &self.journal
    }

    /// Current nesting depth
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.state.lock().depth
    }

    fn check_next(st: &TxnState, seqnum: Seqnum) -> Result<()> {
        if seqnum != st.last_seqnum + 1 {
            error!(
                "journal sequencing violated: expected seqnum={} got {}",
                st.last_seqnum + 1,
                seqnum
            );
            return Err(Error::Sequencing {
                expected: st.last_seqnum + 1,
                actual: seqnum,
            });
        }
        Ok(())
    }

    /// Return a seqnum the journal refused and pass `err` on
    fn release(&self, seqnum: Seqnum, err: Error) -> Error {
        match self.counter.give_back(seqnum) {
            Ok(()) => {
                warn!("journal write failed at seqnum={}: {}", seqnum, err);
                err
            }
            Err(e) => {
                error!(
                    "journal write failed at seqnum={} and the seqnum cannot be returned: {}",
                    seqnum, err
                );
                e
            }
        }
    }

    /// Wait until `op`, the END closing its transaction and a BEGIN still
    /// owed to the file all fit in the journal. Consumes no seqnum.
    pub fn reserve(&self, op: &JournalOp) -> Result<()> {
        let mut len = record_len(op) + record_len(&JournalOp::End);
        if self.state.lock().pending_begin.is_some() {
            len += record_len(&JournalOp::Begin);
        }
        self.journal.wait_for_room(len as u64)
    }

    pub fn begin(&self, seqnum: Seqnum) -> Result<()> {
        let mut st = self.state.lock();
        if st.depth > 0 {
            self.counter.give_back(seqnum)?;
            st.depth += 1;
            return Ok(());
        }
        Self::check_next(&st, seqnum)?;
        let seqnum = if st.unclosed {
            if let Err(e) = self.journal.write(seqnum, &JournalOp::End) {
                return Err(self.release(seqnum, e));
            }
            st.unclosed = false;
            st.last_seqnum = seqnum;
            info!("journal: closed interrupted transaction at seqnum={}", seqnum);
            self.counter.next()
        } else {
            seqnum
        };
        st.depth = 1;
        st.pending_begin = Some(seqnum);
        st.begin_seqnum = seqnum;
        st.last_seqnum = seqnum;
        Ok(())
    }

    /// Write one operation inside the current transaction
    pub fn write(&self, seqnum: Seqnum, op: &JournalOp) -> Result<()> {
        let mut st = self.state.lock();
        if st.depth == 0 {
            return Err(Error::invalid_argument(format!(
                "{} outside a transaction (seqnum={seqnum})",
                op.tag()
            )));
        }
        Self::check_next(&st, seqnum)?;
        if let Some(begin) = st.pending_begin {
            if let Err(e) = self.journal.write(begin, &JournalOp::Begin) {
                return Err(self.release(seqnum, e));
            }
            st.pending_begin = None;
        }
        if let Err(e) = self.journal.write(seqnum, op) {
            return Err(self.release(seqnum, e));
        }
        st.last_seqnum = seqnum;
        Ok(())
    }

    pub fn end(&self, seqnum: Seqnum) -> Result<()> {
        let mut st = self.state.lock();
        match st.depth {
            0 => Err(Error::invalid_argument(format!(
                "END outside a transaction (seqnum={seqnum})"
            ))),
            1 => {
                Self::check_next(&st, seqnum)?;
                if let Some(begin) = st.pending_begin.take() {
                    // nothing was written: hand both seqnums back
                    self.counter.give_back(seqnum)?;
                    self.counter.give_back(begin)?;
                    st.last_seqnum = begin - 1;
                    st.depth = 0;
                    debug!("journal transaction elided: seqnum={}", begin);
                    return Ok(());
                }
                st.depth = 0;
                if let Err(e) = self.journal.write(seqnum, &JournalOp::End) {
                    st.unclosed = true;
                    return Err(self.release(seqnum, e));
                }
                st.last_seqnum = seqnum;
                Ok(())
            }
            _ => {
                self.counter.give_back(seqnum)?;
                st.depth -= 1;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::JournalFile;
    use crate::ops::InodeRef;
    use crate::reader::ReadOutcome;
    use nsmeta_common::config::JournalConfig;
    use std::time::Duration;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, TransactionWriter, crate::JournalReader) {
        let dir = tempdir().unwrap();
        let (journal, reader) = JournalFile::open(
            dir.path().join("j.gmj"),
            &JournalConfig {
                max_size: 1 << 16,
                ..Default::default()
            },
            0,
        )
        .unwrap();
        let writer = TransactionWriter::new(journal, SeqnumCounter::new(0));
        (dir, writer, reader)
    }

    fn op() -> JournalOp {
        JournalOp::SymlinkRemove(InodeRef { ino: 7 })
    }

    fn drain(reader: &mut crate::JournalReader) -> Vec<(Seqnum, JournalOp)> {
        let mut out = Vec::new();
        while let ReadOutcome::Record(rec) = reader.read(Some(Duration::ZERO)).unwrap() {
            out.push((rec.seqnum, rec.op));
        }
        out
    }

    #[test]
    fn test_transaction_records() {
        let (_dir, w, mut reader) = setup();
        let c = Arc::clone(w.counter());
        w.begin(c.next()).unwrap();
        w.write(c.next(), &op()).unwrap();
        w.write(c.next(), &op()).unwrap();
        w.end(c.next()).unwrap();

        assert_eq!(
            drain(&mut reader),
            vec![
                (1, JournalOp::Begin),
                (2, op()),
                (3, op()),
                (4, JournalOp::End)
            ]
        );
    }

    #[test]
    fn test_empty_transaction_is_elided() {
        let (_dir, w, mut reader) = setup();
        let c = Arc::clone(w.counter());
        let before = w.journal().writer_position();

        w.begin(c.next()).unwrap();
        w.end(c.next()).unwrap();

        assert_eq!(w.journal().writer_position(), before);
        assert_eq!(c.current(), 0);
        assert!(drain(&mut reader).is_empty());

        // the next transaction reuses the seqnums
        w.begin(c.next()).unwrap();
        w.write(c.next(), &op()).unwrap();
        w.end(c.next()).unwrap();
        let recs = drain(&mut reader);
        assert_eq!(recs.first(), Some(&(1, JournalOp::Begin)));
        assert_eq!(recs.last(), Some(&(3, JournalOp::End)));
    }

    #[test]
    fn test_nested_transaction_consumes_no_seqnums() {
        let (_dir, w, mut reader) = setup();
        let c = Arc::clone(w.counter());
        w.begin(c.next()).unwrap();
        w.begin(c.next()).unwrap();
        assert_eq!(w.depth(), 2);
        w.write(c.next(), &op()).unwrap();
        w.end(c.next()).unwrap();
        assert_eq!(w.depth(), 1);
        w.end(c.next()).unwrap();
        assert_eq!(w.depth(), 0);

        let seqs: Vec<_> = drain(&mut reader).into_iter().map(|(s, _)| s).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_gap_is_sequencing_error() {
        let (_dir, w, _reader) = setup();
        let c = Arc::clone(w.counter());
        w.begin(c.next()).unwrap();
        c.next();
        let err = w.write(c.next(), &op()).unwrap_err();
        assert!(matches!(
            err,
            Error::Sequencing {
                expected: 2,
                actual: 3
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_write_outside_transaction_rejected() {
        let (_dir, w, _reader) = setup();
        assert!(matches!(
            w.write(1, &op()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(w.end(1), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_counter_resumes_after_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.gmj");
        let config = JournalConfig {
            max_size: 1 << 16,
            ..Default::default()
        };
        {
            let (journal, _reader) = JournalFile::open(&path, &config, 0).unwrap();
            let w = TransactionWriter::new(journal, SeqnumCounter::new(0));
            let c = Arc::clone(w.counter());
            w.begin(c.next()).unwrap();
            w.write(c.next(), &op()).unwrap();
            w.end(c.next()).unwrap();
        }
        let (journal, _reader) = JournalFile::open(&path, &config, 0).unwrap();
        let w = TransactionWriter::new(journal, SeqnumCounter::new(0));
        assert_eq!(w.counter().current(), 3);
        assert_eq!(w.counter().next(), 4);
    }

    #[test]
    fn test_full_ring_inside_transaction_recovers() {
        let dir = tempdir().unwrap();
        let (journal, mut reader) = JournalFile::open(
            dir.path().join("j.gmj"),
            &JournalConfig {
                max_size: 4096 + 512,
                write_wait_timeout: Duration::from_millis(20),
                ..Default::default()
            },
            0,
        )
        .unwrap();
        let w = TransactionWriter::new(journal, SeqnumCounter::new(0));
        let c = Arc::clone(w.counter());

        w.begin(c.next()).unwrap();
        let mut written = 0u64;
        let err = loop {
            match w.write(c.next(), &op()) {
                Ok(()) => written += 1,
                Err(e) => break e,
            }
        };
        assert!(matches!(err, Error::JournalFull { .. }));
        // the refused seqnum went back to the counter
        assert_eq!(c.current(), written + 1);

        // END may or may not fit; either way the transaction is over
        let _ = w.end(c.next());
        assert_eq!(w.depth(), 0);

        let mut recs = drain(&mut reader);
        reader.commit();

        w.begin(c.next()).unwrap();
        w.write(c.next(), &op()).unwrap();
        w.end(c.next()).unwrap();

        recs.extend(drain(&mut reader));
        let tail: Vec<_> = recs.iter().rev().take(4).rev().map(|(_, o)| o.clone()).collect();
        assert_eq!(
            tail,
            vec![JournalOp::End, JournalOp::Begin, op(), JournalOp::End]
        );
        // seqnums stay contiguous across the failure
        let first = recs[0].0;
        for (i, (seqnum, _)) in recs.iter().enumerate() {
            assert_eq!(*seqnum, first + i as u64);
        }
        assert_eq!(recs.last().map(|r| r.0), Some(c.current()));
    }

    #[test]
    fn test_refused_first_write_leaves_no_trace() {
        let (_dir, w, _reader) = setup();
        let c = Arc::clone(w.counter());
        w.begin(c.next()).unwrap();
        w.journal().close();
        assert!(matches!(w.write(c.next(), &op()), Err(Error::Closed)));
        assert_eq!(c.current(), 1);
        // nothing reached the file, so the transaction is elided
        w.end(c.next()).unwrap();
        assert_eq!(c.current(), 0);
        assert_eq!(w.depth(), 0);
    }
}
