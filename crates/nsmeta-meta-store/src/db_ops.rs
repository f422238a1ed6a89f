//! Backing store backends
//!
//! Namespace mutations reach persistence through [`DbOps`]. The backend is
//! picked once at startup: the journaled one (in the replication crate),
//! [`MetaStore`] directly, or [`EmptyDbOps`] for tests and tools.

use crate::store::MetaStore;
use nsmeta_common::{Result, Seqnum};
use nsmeta_journal::{JournalOp, JournalRecord};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Persistence backend for namespace mutations
pub trait DbOps: Send + Sync {
    /// Open a transaction
    fn begin(&self, seqnum: Seqnum) -> Result<()>;

    /// Close a transaction
    fn end(&self, seqnum: Seqnum) -> Result<()>;

    /// Persist one operation
    fn store(&self, seqnum: Seqnum, op: &JournalOp) -> Result<()>;

    /// Fail early if `op` could not be stored right now. Nothing is
    /// persisted and no seqnum is consumed.
    fn reserve(&self, _op: &JournalOp) -> Result<()> {
        Ok(())
    }

    /// Persist a whole BEGIN..END batch. Backends that can should make the
    /// batch and its END seqnum durable together.
    fn store_batch(&self, batch: &[JournalRecord]) -> Result<()> {
        for rec in batch {
            match &rec.op {
                JournalOp::Begin => self.begin(rec.seqnum)?,
                JournalOp::End => self.end(rec.seqnum)?,
                op => self.store(rec.seqnum, op)?,
            }
        }
        Ok(())
    }

    /// Highest seqnum known to be durable
    fn durable_seqnum(&self) -> Result<Seqnum>;
}

impl<T: DbOps + ?Sized> DbOps for Arc<T> {
    fn begin(&self, seqnum: Seqnum) -> Result<()> {
        (**self).begin(seqnum)
    }

    fn end(&self, seqnum: Seqnum) -> Result<()> {
        (**self).end(seqnum)
    }

    fn store(&self, seqnum: Seqnum, op: &JournalOp) -> Result<()> {
        (**self).store(seqnum, op)
    }

    fn reserve(&self, op: &JournalOp) -> Result<()> {
        (**self).reserve(op)
    }

    fn store_batch(&self, batch: &[JournalRecord]) -> Result<()> {
        (**self).store_batch(batch)
    }

    fn durable_seqnum(&self) -> Result<Seqnum> {
        (**self).durable_seqnum()
    }
}

/// Direct mode: every operation is its own redb transaction
impl DbOps for MetaStore {
    fn begin(&self, _seqnum: Seqnum) -> Result<()> {
        Ok(())
    }

    fn end(&self, seqnum: Seqnum) -> Result<()> {
        Ok(self.commit_ops([], seqnum)?)
    }

    fn store(&self, seqnum: Seqnum, op: &JournalOp) -> Result<()> {
        debug!("store: seqnum={} ope={}", seqnum, op.tag());
        Ok(self.commit_ops([op], seqnum)?)
    }

    fn store_batch(&self, batch: &[JournalRecord]) -> Result<()> {
        let Some(last) = batch.iter().map(|r| r.seqnum).max() else {
            return Ok(());
        };
        debug!(
            "store batch: seqnum={}..{} records={}",
            batch.first().map_or(last, |r| r.seqnum),
            last,
            batch.len()
        );
        Ok(self.commit_ops(batch.iter().map(|r| &r.op), last)?)
    }

    fn durable_seqnum(&self) -> Result<Seqnum> {
        Ok(MetaStore::durable_seqnum(self)?)
    }
}

/// Accepts everything and remembers only the highest seqnum seen
#[derive(Debug, Default)]
pub struct EmptyDbOps {
    last_seqnum: AtomicU64,
}

impl EmptyDbOps {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn saw(&self, seqnum: Seqnum) {
        self.last_seqnum.fetch_max(seqnum, Ordering::AcqRel);
    }
}

impl DbOps for EmptyDbOps {
    fn begin(&self, seqnum: Seqnum) -> Result<()> {
        self.saw(seqnum);
        Ok(())
    }

    fn end(&self, seqnum: Seqnum) -> Result<()> {
        self.saw(seqnum);
        Ok(())
    }

    fn store(&self, seqnum: Seqnum, _op: &JournalOp) -> Result<()> {
        self.saw(seqnum);
        Ok(())
    }

    fn durable_seqnum(&self) -> Result<Seqnum> {
        Ok(self.last_seqnum.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmeta_journal::ops::UserInfo;
    use tempfile::tempdir;

    fn batch() -> Vec<JournalRecord> {
        vec![
            JournalRecord::new(11, JournalOp::Begin),
            JournalRecord::new(
                12,
                JournalOp::UserAdd(UserInfo {
                    username: "alice".into(),
                    ..Default::default()
                }),
            ),
            JournalRecord::new(13, JournalOp::End),
        ]
    }

    #[test]
    fn test_empty_db_ops_tracks_seqnum() {
        let ops = EmptyDbOps::new();
        ops.store_batch(&batch()).unwrap();
        assert_eq!(ops.durable_seqnum().unwrap(), 13);
    }

    #[test]
    fn test_meta_store_batch_lands_on_end_seqnum() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("m.redb")).unwrap());
        let ops: &dyn DbOps = &store;
        ops.store_batch(&batch()).unwrap();
        assert_eq!(ops.durable_seqnum().unwrap(), 13);
        assert_eq!(store.load_users().unwrap()[0].username, "alice");
        ops.store_batch(&[]).unwrap();
        assert_eq!(ops.durable_seqnum().unwrap(), 13);
    }

    #[test]
    fn test_meta_store_direct_ops() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("m.redb")).unwrap();
        store.begin(1).unwrap();
        assert_eq!(DbOps::durable_seqnum(&store).unwrap(), 0);
        store.store(2, &batch()[1].op).unwrap();
        assert_eq!(DbOps::durable_seqnum(&store).unwrap(), 2);
        store.end(3).unwrap();
        assert_eq!(DbOps::durable_seqnum(&store).unwrap(), 3);
    }
}
