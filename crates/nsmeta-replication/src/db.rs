//! Mutation front door
//!
//! [`MetadataDb`] hands out sequence numbers from the shared counter and
//! routes every operation to the configured [`DbOps`] backend. With the
//! journal enabled that backend is [`JournalDbOps`]; the store task then
//! moves records from the journal into the backing store.
//!
//! An operation is applied to memory only after the backend has made room
//! for it. If the backend still refuses an operation memory already holds,
//! the db halts: memory is ahead of the log and only a restart, which
//! rebuilds memory from the log, brings them back in line.

use crate::apply::{ApplyOutcome, apply_op};
use nsmeta_common::{Error, Result, Seqnum};
use nsmeta_journal::{JournalOp, SeqnumCounter, TransactionWriter};
use nsmeta_meta_store::DbOps;
use nsmeta_namespace::Namespace;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// Journaled backend: operations go to the journal through the
/// transaction writer
#[derive(Debug)]
pub struct JournalDbOps {
    writer: TransactionWriter,
}

impl JournalDbOps {
    #[must_use]
    pub const fn new(writer: TransactionWriter) -> Self {
        Self { writer }
    }

    #[must_use]
    pub const fn writer(&self) -> &TransactionWriter {
        &self.writer
    }
}

impl DbOps for JournalDbOps {
    fn begin(&self, seqnum: Seqnum) -> Result<()> {
        self.writer.begin(seqnum)
    }

    fn end(&self, seqnum: Seqnum) -> Result<()> {
        self.writer.end(seqnum)
    }

    fn store(&self, seqnum: Seqnum, op: &JournalOp) -> Result<()> {
        self.writer.write(seqnum, op)
    }

    fn reserve(&self, op: &JournalOp) -> Result<()> {
        self.writer.reserve(op)
    }

    fn durable_seqnum(&self) -> Result<Seqnum> {
        Ok(self.writer.journal().last_seqnum())
    }
}

/// Allocates sequence numbers and forwards to the backend.
///
/// Allocation and the backend call happen under one lock so concurrent
/// callers reach the backend in sequence order.
pub struct MetadataDb {
    counter: Arc<SeqnumCounter>,
    ops: Arc<dyn DbOps>,
    order: Mutex<()>,
    /// Memory holds an operation the backend never took
    halted: AtomicBool,
}

impl std::fmt::Debug for MetadataDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataDb")
            .field("seqnum", &self.counter.current())
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

impl MetadataDb {
    #[must_use]
    pub fn new(counter: Arc<SeqnumCounter>, ops: Arc<dyn DbOps>) -> Self {
        Self {
            counter,
            ops,
            order: Mutex::new(()),
            halted: AtomicBool::new(false),
        }
    }

    /// Front door over the journal
    #[must_use]
    pub fn journaled(writer: TransactionWriter) -> Self {
        let counter = Arc::clone(writer.counter());
        Self::new(counter, Arc::new(JournalDbOps::new(writer)))
    }

    #[must_use]
    pub const fn counter(&self) -> &Arc<SeqnumCounter> {
        &self.counter
    }

    /// Last sequence number handed out
    #[must_use]
    pub fn current_seqnum(&self) -> Seqnum {
        self.counter.current()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn check_running(&self) -> Result<()> {
        if self.is_halted() {
            return Err(Error::internal(
                "metadata db halted: in-memory state is ahead of the log",
            ));
        }
        Ok(())
    }

    pub fn begin(&self) -> Result<Seqnum> {
        self.check_running()?;
        let _order = self.order.lock();
        let seqnum = self.counter.next();
        self.ops.begin(seqnum)?;
        Ok(seqnum)
    }

    pub fn end(&self) -> Result<Seqnum> {
        let _order = self.order.lock();
        let seqnum = self.counter.next();
        self.ops.end(seqnum)?;
        Ok(seqnum)
    }

    pub fn submit(&self, op: &JournalOp) -> Result<Seqnum> {
        self.check_running()?;
        let _order = self.order.lock();
        let seqnum = self.counter.next();
        self.ops.store(seqnum, op)?;
        debug!("submit: seqnum={} ope={}", seqnum, op.tag());
        Ok(seqnum)
    }

    /// Run `ops` as one transaction against the in-memory namespace and
    /// the backend. Each operation is applied to `ns` first; only the ones
    /// that succeed are persisted. The caller holds the giant lock.
    ///
    /// When the backend has no room for an operation (a full journal) the
    /// transaction is closed after the operations before it, `ns` is left
    /// without the refused one and the error is returned.
    pub fn mutate(&self, ns: &mut Namespace, ops: &[JournalOp]) -> Result<Vec<ApplyOutcome>> {
        self.begin()?;
        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            let order = self.order.lock();
            if let Err(e) = self.ops.reserve(op) {
                drop(order);
                warn!("mutate: ope={} refused before apply: {}", op.tag(), e);
                self.close_failed();
                return Err(e);
            }
            match apply_op(ns, op) {
                Ok(()) => {
                    let seqnum = self.counter.next();
                    if let Err(e) = self.ops.store(seqnum, op) {
                        self.halted.store(true, Ordering::Release);
                        drop(order);
                        error!(
                            "mutate: ope={} applied in memory but not stored, halting: {}",
                            op.tag(),
                            e
                        );
                        self.close_failed();
                        return Err(e);
                    }
                    drop(order);
                    debug!("mutate: seqnum={} ope={}", seqnum, op.tag());
                    outcomes.push(ApplyOutcome::Applied);
                }
                Err(e) => {
                    drop(order);
                    debug!("mutate: ope={} rejected: {}", op.tag(), e);
                    outcomes.push(ApplyOutcome::Warning(e));
                }
            }
        }
        self.end()?;
        Ok(outcomes)
    }

    fn close_failed(&self) {
        if let Err(e) = self.end() {
            warn!("mutate: closing failed transaction: {}", e);
        }
    }
}
