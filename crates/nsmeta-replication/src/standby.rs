//! Standby side of journal replication
//!
//! Batches received from the primary are appended to the local journal
//! verbatim. The writer mirrors the primary's BEGIN/END nesting so that a
//! transaction left open by a dropped connection can be closed before the
//! standby starts writing on its own.

use nsmeta_common::{Error, Result, Seqnum};
use nsmeta_journal::{
    JournalHandle, JournalOp, RawWriteSummary, RecordHeader, SeqnumCounter, TransactionWriter,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct RecvState {
    /// Open transactions in the received stream
    nesting: i64,
    received: u64,
}

#[derive(Debug)]
pub struct StandbyWriter {
    journal: JournalHandle,
    counter: Arc<SeqnumCounter>,
    state: Mutex<RecvState>,
}

impl StandbyWriter {
    #[must_use]
    pub fn new(journal: JournalHandle, counter: Arc<SeqnumCounter>) -> Self {
        counter.set(counter.current().max(journal.last_seqnum()));
        Self {
            journal,
            counter,
            state: Mutex::new(RecvState::default()),
        }
    }

    #[must_use]
    pub const fn journal(&self) -> &JournalHandle {
        &self.journal
    }

    /// Seqnum the next received batch must start with
    #[must_use]
    pub fn next_seqnum(&self) -> Seqnum {
        self.journal.last_seqnum() + 1
    }

    #[must_use]
    pub fn nesting(&self) -> i64 {
        self.state.lock().nesting
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.nesting() > 0
    }

    /// Append a batch fetched from the primary. `from` is the first
    /// seqnum in the batch and must continue the local journal exactly;
    /// anything else is a gap the caller answers by reconnecting.
    ///
    /// Records that landed before a failure stay counted, so a later
    /// `force_close` sees the transactions they opened.
    pub fn recv(&self, batch: &[u8], from: Seqnum) -> Result<RawWriteSummary> {
        let mut st = self.state.lock();
        let expected = self.next_seqnum();
        let first = RecordHeader::parse(batch).map(|h| h.seqnum);
        if from != expected || first.is_some_and(|s| s != from) {
            error!(
                "recv: sequence gap: expected seqnum={} got from={} first={:?}",
                expected, from, first
            );
            return Err(Error::Sequencing {
                expected,
                actual: first.unwrap_or(from),
            });
        }

        let mut summary = RawWriteSummary::default();
        let written = self.journal.write_raw(batch, &mut summary);
        if summary.records > 0 {
            self.counter.set(summary.last_seqnum);
        }
        st.nesting += summary.nest_delta;
        st.received += summary.records as u64;
        if let Err(e) = written {
            warn!(
                "recv: stopped after {} record(s) at seqnum={} nesting={}: {}",
                summary.records,
                self.journal.last_seqnum(),
                st.nesting,
                e
            );
            return Err(e);
        }
        debug!(
            "recv: seqnum={}..{} records={} nesting={}",
            summary.first_seqnum, summary.last_seqnum, summary.records, st.nesting
        );
        Ok(summary)
    }

    /// Close transactions the primary left open. Returns how many END
    /// records were written.
    pub fn force_close(&self) -> Result<usize> {
        let mut st = self.state.lock();
        let mut closed = 0;
        while st.nesting > 0 {
            let seqnum = self.journal.last_seqnum() + 1;
            self.journal.write(seqnum, &JournalOp::End)?;
            self.counter.set(seqnum);
            st.nesting -= 1;
            closed += 1;
        }
        if closed > 0 {
            info!(
                "Force-closed {} open transaction(s) at seqnum={}",
                closed,
                self.journal.last_seqnum()
            );
        }
        Ok(closed)
    }

    /// Stop mirroring the primary: close anything left open and return a
    /// transaction writer continuing from the local journal.
    pub fn into_writer(self) -> Result<TransactionWriter> {
        self.force_close()?;
        info!(
            "Standby writer handing over at seqnum={} after {} received records",
            self.journal.last_seqnum(),
            self.state.lock().received
        );
        Ok(TransactionWriter::new(self.journal, self.counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use nsmeta_common::config::JournalConfig;
    use nsmeta_journal::{JournalFile, JournalReader, JournalRecord, ReadOutcome};
    use std::time::Duration;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path) -> (JournalHandle, JournalReader) {
        open_sized(dir, 64 * 1024)
    }

    fn open_sized(dir: &std::path::Path, max_size: u64) -> (JournalHandle, JournalReader) {
        let config = JournalConfig {
            dir: dir.to_path_buf(),
            max_size,
            write_wait_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        JournalFile::open(config.file_path(0), &config, 0).unwrap()
    }

    fn encode(records: &[(Seqnum, JournalOp)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (seqnum, op) in records {
            buf.extend_from_slice(&JournalRecord::new(*seqnum, op.clone()).to_bytes());
        }
        buf.to_vec()
    }

    fn drain(reader: &mut JournalReader) -> Vec<JournalRecord> {
        let mut out = Vec::new();
        while let ReadOutcome::Record(rec) = reader.read(Some(Duration::ZERO)).unwrap() {
            out.push(rec);
        }
        out
    }

    #[test]
    fn test_recv_tracks_nesting() {
        let dir = tempdir().unwrap();
        let (journal, mut reader) = open(dir.path());
        let standby = StandbyWriter::new(journal, SeqnumCounter::new(0));

        let summary = standby
            .recv(
                &encode(&[
                    (1, JournalOp::Begin),
                    (2, JournalOp::HostRemove("h".into())),
                ]),
                1,
            )
            .unwrap();
        assert_eq!(summary.last_seqnum, 2);
        assert!(standby.in_transaction());

        standby.recv(&encode(&[(3, JournalOp::End)]), 3).unwrap();
        assert!(!standby.in_transaction());
        assert_eq!(standby.next_seqnum(), 4);
        assert_eq!(drain(&mut reader).len(), 3);
    }

    #[test]
    fn test_recv_rejects_gap() {
        let dir = tempdir().unwrap();
        let (journal, _reader) = open(dir.path());
        let standby = StandbyWriter::new(journal, SeqnumCounter::new(0));
        standby
            .recv(&encode(&[(1, JournalOp::Begin), (2, JournalOp::End)]), 1)
            .unwrap();

        let err = standby
            .recv(&encode(&[(4, JournalOp::Begin)]), 4)
            .unwrap_err();
        assert!(matches!(err, Error::Sequencing { expected: 3, actual: 4 }));

        // the claimed start must match the first record too
        let err = standby
            .recv(&encode(&[(5, JournalOp::Begin)]), 3)
            .unwrap_err();
        assert!(matches!(err, Error::Sequencing { expected: 3, actual: 5 }));
        assert_eq!(standby.next_seqnum(), 3);
    }

    #[test]
    fn test_force_close_then_write() {
        let dir = tempdir().unwrap();
        let (journal, mut reader) = open(dir.path());
        let counter = SeqnumCounter::new(0);
        let standby = StandbyWriter::new(journal, Arc::clone(&counter));
        standby
            .recv(
                &encode(&[
                    (1, JournalOp::Begin),
                    (2, JournalOp::UserRemove("u".into())),
                ]),
                1,
            )
            .unwrap();

        let writer = standby.into_writer().unwrap();
        assert_eq!(counter.current(), 3);
        writer.begin(counter.next()).unwrap();
        writer.write(counter.next(), &JournalOp::Nop).unwrap();
        writer.end(counter.next()).unwrap();

        let ops: Vec<_> = drain(&mut reader).into_iter().map(|r| r.op).collect();
        assert_eq!(
            ops,
            vec![
                JournalOp::Begin,
                JournalOp::UserRemove("u".into()),
                JournalOp::End,
                JournalOp::Begin,
                JournalOp::Nop,
                JournalOp::End,
            ]
        );
    }

    #[test]
    fn test_partial_batch_keeps_open_transaction() {
        let dir = tempdir().unwrap();
        let (journal, mut reader) = open_sized(dir.path(), 4096 + 1024);
        let counter = SeqnumCounter::new(0);
        let standby = StandbyWriter::new(journal, Arc::clone(&counter));

        let mut records = vec![(1, JournalOp::Begin)];
        for seqnum in 2..22 {
            records.push((seqnum, JournalOp::HostRemove("x".repeat(100))));
        }
        let err = standby.recv(&encode(&records), 1).unwrap_err();
        assert!(matches!(err, Error::JournalFull { .. }));

        // the BEGIN landed, so the stream is inside a transaction
        assert_eq!(standby.nesting(), 1);
        let last = standby.journal().last_seqnum();
        assert!(last >= 1);
        assert_eq!(standby.next_seqnum(), last + 1);
        assert_eq!(counter.current(), last);

        let mut recs = drain(&mut reader);
        reader.commit();
        assert_eq!(standby.force_close().unwrap(), 1);
        assert!(!standby.in_transaction());
        recs.extend(drain(&mut reader));
        let tail = recs.last().unwrap();
        assert_eq!(tail.op, JournalOp::End);
        assert_eq!(tail.seqnum, last + 1);
    }
}
