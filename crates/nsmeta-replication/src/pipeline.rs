//! Journal drain pipeline
//!
//! A dispatcher thread owns the main journal reader. It cuts the record
//! stream into BEGIN..END batches and hands each batch to the store
//! worker and, on a standby, to the apply worker. Both get the same batch
//! through a rendezvous channel; the reader is committed only after both
//! have acknowledged it, which is what frees ring space.
//!
//! ```text
//!                 +--> store worker --(ack)--+
//! main reader --> dispatcher                 +--> commit
//!                 +--> apply worker --(ack)--+
//! ```

use crate::apply::ApplyEngine;
use crossbeam_channel::{Receiver, Sender, bounded};
use nsmeta_common::{Config, Error, Result, Seqnum};
use nsmeta_journal::{JournalHandle, JournalOp, JournalReader, JournalRecord, ReadOutcome};
use nsmeta_meta_store::DbOps;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Batch = Arc<Vec<JournalRecord>>;

/// Pipeline tuning
#[derive(Clone, Copy, Debug)]
pub struct PipelineOptions {
    /// Pause between store attempts after a retryable failure
    pub retry_interval: Duration,
    /// Attempts before a retryable failure is given up on
    pub max_retries: u32,
    /// How long a blocked read waits before re-checking for shutdown
    pub read_poll_interval: Duration,
}

impl PipelineOptions {
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            retry_interval: config.store.retry_interval,
            max_retries: config.store.max_retries,
            read_poll_interval: config.replication.read_poll_interval,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Persist one batch, retrying retryable failures.
///
/// Before every retry the backend's durable seqnum is consulted: if it
/// already covers the batch END the earlier attempt went through and the
/// batch counts as stored.
pub fn store_with_retry(
    db: &dyn DbOps,
    batch: &[JournalRecord],
    options: &PipelineOptions,
    shutdown: &AtomicBool,
) -> Result<()> {
    let Some(last) = batch.last().map(|r| r.seqnum) else {
        return Ok(());
    };
    let mut attempt = 0u32;
    loop {
        let err = match db.store_batch(batch) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };
        match db.durable_seqnum() {
            Ok(durable) if durable >= last => {
                info!(
                    "store: seqnum={} already durable after error: {}",
                    last, err
                );
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => warn!("store: reading durable seqnum: {}", e),
        }
        attempt += 1;
        if attempt > options.max_retries || shutdown.load(Ordering::Relaxed) {
            error!(
                "store: giving up on seqnum={} after {} attempts: {}",
                last, attempt, err
            );
            return Err(err);
        }
        warn!(
            "store: seqnum={} attempt {} failed, retrying in {:?}: {}",
            last, attempt, options.retry_interval, err
        );
        thread::sleep(options.retry_interval);
    }
}

struct Worker {
    tx: Sender<Batch>,
    ack: Receiver<Result<()>>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(
        name: &str,
        mut process: impl FnMut(&[JournalRecord]) -> Result<()> + Send + 'static,
    ) -> Result<Self> {
        let (tx, rx) = bounded::<Batch>(0);
        let (ack_tx, ack) = bounded::<Result<()>>(1);
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                info!("{} worker started", thread_name);
                for batch in rx {
                    if ack_tx.send(process(&batch)).is_err() {
                        break;
                    }
                }
                info!("{} worker stopped", thread_name);
            })?;
        Ok(Self { tx, ack, handle })
    }

    fn send(&self, batch: &Batch) -> Result<()> {
        self.tx
            .send(Arc::clone(batch))
            .map_err(|_| Error::internal("pipeline worker exited"))
    }

    fn wait_ack(&self) -> Result<()> {
        self.ack
            .recv()
            .map_err(|_| Error::internal("pipeline worker exited"))?
    }

    fn stop(self) {
        drop(self.tx);
        if self.handle.join().is_err() {
            error!("pipeline worker panicked");
        }
    }
}

enum NextBatch {
    Batch(Vec<JournalRecord>),
    Drained,
    Stopped,
}

struct Dispatcher {
    reader: JournalReader,
    options: PipelineOptions,
    shutdown: Arc<AtomicBool>,
    store: Worker,
    apply: Option<Worker>,
    drained_tx: Sender<()>,
    drain_pending: bool,
    last_seqnum: Seqnum,
}

impl Dispatcher {
    /// Read one complete transaction
    fn next_batch(&mut self) -> Result<NextBatch> {
        let mut batch: Vec<JournalRecord> = Vec::new();
        loop {
            match self.reader.read(Some(self.options.read_poll_interval))? {
                ReadOutcome::Record(rec) => {
                    let in_txn = !batch.is_empty();
                    let is_begin = rec.op == JournalOp::Begin;
                    let is_end = rec.op == JournalOp::End;
                    // a BEGIN must open a batch and nothing else may
                    if is_begin == in_txn {
                        return Err(Error::corrupt(
                            0,
                            format!(
                                "unexpected {} at seqnum {} (in transaction: {})",
                                rec.op.tag(),
                                rec.seqnum,
                                in_txn
                            ),
                        ));
                    }
                    batch.push(rec);
                    if is_end {
                        return Ok(NextBatch::Batch(batch));
                    }
                }
                ReadOutcome::Eof => {
                    if batch.is_empty() && self.shutdown.load(Ordering::Relaxed) {
                        return Ok(NextBatch::Stopped);
                    }
                }
                ReadOutcome::Closed => return Ok(NextBatch::Stopped),
                ReadOutcome::Drained => {
                    if batch.is_empty() {
                        return Ok(NextBatch::Drained);
                    }
                    self.drain_pending = true;
                }
            }
        }
    }

    fn handle_drain(&mut self) {
        if let Some(apply) = self.apply.take() {
            apply.stop();
            info!("Apply worker drained at seqnum={}", self.last_seqnum);
        }
        // the receiver may be gone already
        let _ = self.drained_tx.try_send(());
    }

    fn dispatch(&mut self, batch: Vec<JournalRecord>) -> Result<()> {
        let first = batch.first().map_or(0, |r| r.seqnum);
        let last = batch.last().map_or(0, |r| r.seqnum);
        let batch = Arc::new(batch);

        self.store.send(&batch)?;
        if let Some(apply) = &self.apply {
            apply.send(&batch)?;
        }
        let stored = self.store.wait_ack();
        let applied = self.apply.as_ref().map_or(Ok(()), Worker::wait_ack);
        stored?;
        applied?;

        self.reader.commit();
        self.last_seqnum = last;
        debug!(
            "pipeline: committed seqnum={}..{} records={}",
            first,
            last,
            batch.len()
        );
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        loop {
            match self.next_batch()? {
                NextBatch::Batch(batch) => {
                    self.dispatch(batch)?;
                    if std::mem::take(&mut self.drain_pending) {
                        self.handle_drain();
                    }
                }
                NextBatch::Drained => self.handle_drain(),
                NextBatch::Stopped => return Ok(()),
            }
        }
    }

    fn finish(self) {
        self.store.stop();
        if let Some(apply) = self.apply {
            apply.stop();
        }
    }
}

/// Handle on the running pipeline threads
pub struct Pipeline {
    journal: JournalHandle,
    shutdown: Arc<AtomicBool>,
    drained_rx: Receiver<()>,
    dispatcher: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("journal", &self.journal.path())
            .field("stopping", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Start draining `reader` into `store` and, when given, `apply`
    pub fn start(
        reader: JournalReader,
        store: Arc<dyn DbOps>,
        apply: Option<ApplyEngine>,
        options: PipelineOptions,
    ) -> Result<Self> {
        let journal = Arc::clone(reader.journal());
        let shutdown = Arc::new(AtomicBool::new(false));

        let store_shutdown = Arc::clone(&shutdown);
        let store_worker = Worker::spawn("nsmeta-store", move |batch| {
            store_with_retry(store.as_ref(), batch, &options, &store_shutdown)
        })?;
        let apply_worker = apply
            .map(|engine| {
                Worker::spawn("nsmeta-apply", move |batch| {
                    engine.apply_batch(batch).map(|_| ())
                })
            })
            .transpose()?;
        let with_apply = apply_worker.is_some();

        let (drained_tx, drained_rx) = bounded(1);
        let mut dispatcher = Dispatcher {
            reader,
            options,
            shutdown: Arc::clone(&shutdown),
            store: store_worker,
            apply: apply_worker,
            drained_tx,
            drain_pending: false,
            last_seqnum: 0,
        };
        let dispatch_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("nsmeta-dispatch".into())
            .spawn(move || {
                let result = dispatcher.run();
                if let Err(e) = &result {
                    error!("Pipeline stopped on error: {}", e);
                    dispatch_shutdown.store(true, Ordering::Relaxed);
                    // nothing past this point can reach the store
                    dispatcher.reader.journal().close();
                }
                dispatcher.finish();
                info!("Pipeline stopped");
                result
            })?;

        info!(
            "Pipeline started: journal={} apply={}",
            journal.path().display(),
            with_apply
        );
        Ok(Self {
            journal,
            shutdown,
            drained_rx,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    /// Stop the apply worker once everything in the journal has been
    /// applied. Blocks until that point is reached.
    pub fn drain_apply(&self) -> Result<()> {
        self.journal.drain_reader();
        self.drained_rx.recv().map_err(|_| Error::Closed)
    }

    /// Ask the threads to stop after the batch in flight
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.dispatcher
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Wait for the dispatcher to exit and return how it ended. Later calls
    /// return immediately.
    pub fn wait(&self) -> Result<()> {
        let handle = self.dispatcher.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::internal("pipeline dispatcher panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.wait() {
            warn!("Pipeline ended with error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmeta_common::SEQNUM_INVALID;
    use nsmeta_common::config::JournalConfig;
    use nsmeta_journal::ops::{HostInfo, UserInfo};
    use nsmeta_journal::{JournalFile, SeqnumCounter, TransactionWriter};
    use nsmeta_meta_store::{EmptyDbOps, MetaStore};
    use nsmeta_namespace::Namespace;
    use std::sync::atomic::AtomicU32;
    use tempfile::tempdir;

    fn options() -> PipelineOptions {
        PipelineOptions {
            retry_interval: Duration::from_millis(1),
            max_retries: 3,
            read_poll_interval: Duration::from_millis(10),
        }
    }

    fn open(dir: &std::path::Path, db_seqnum: Seqnum) -> (JournalHandle, JournalReader) {
        let config = JournalConfig {
            dir: dir.to_path_buf(),
            max_size: 64 * 1024,
            write_wait_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        JournalFile::open(config.file_path(0), &config, db_seqnum).unwrap()
    }

    fn write_txn(writer: &TransactionWriter, ops: &[JournalOp]) {
        let counter = writer.counter();
        writer.begin(counter.next()).unwrap();
        for op in ops {
            writer.write(counter.next(), op).unwrap();
        }
        writer.end(counter.next()).unwrap();
    }

    fn user(name: &str) -> JournalOp {
        JournalOp::UserAdd(UserInfo {
            username: name.into(),
            ..Default::default()
        })
    }

    /// Fails with a retryable error a fixed number of times
    struct Flaky {
        inner: EmptyDbOps,
        failures: AtomicU32,
        commit_before_failing: bool,
    }

    impl DbOps for Flaky {
        fn begin(&self, seqnum: Seqnum) -> Result<()> {
            self.inner.begin(seqnum)
        }

        fn end(&self, seqnum: Seqnum) -> Result<()> {
            self.inner.end(seqnum)
        }

        fn store(&self, seqnum: Seqnum, op: &JournalOp) -> Result<()> {
            self.inner.store(seqnum, op)
        }

        fn store_batch(&self, batch: &[JournalRecord]) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                if self.commit_before_failing {
                    for rec in batch {
                        self.inner.store(rec.seqnum, &rec.op)?;
                    }
                }
                return Err(Error::store_retryable("connection reset"));
            }
            for rec in batch {
                self.inner.store(rec.seqnum, &rec.op)?;
            }
            Ok(())
        }

        fn durable_seqnum(&self) -> Result<Seqnum> {
            self.inner.durable_seqnum()
        }
    }

    fn batch() -> Vec<JournalRecord> {
        vec![
            JournalRecord::new(1, JournalOp::Begin),
            JournalRecord::new(2, user("alice")),
            JournalRecord::new(3, JournalOp::End),
        ]
    }

    #[test]
    fn test_retry_until_success() {
        let db = Flaky {
            inner: EmptyDbOps::new(),
            failures: AtomicU32::new(2),
            commit_before_failing: false,
        };
        store_with_retry(&db, &batch(), &options(), &AtomicBool::new(false)).unwrap();
        assert_eq!(db.durable_seqnum().unwrap(), 3);
    }

    #[test]
    fn test_retry_detects_durable_write() {
        let db = Flaky {
            inner: EmptyDbOps::new(),
            failures: AtomicU32::new(1),
            commit_before_failing: true,
        };
        store_with_retry(&db, &batch(), &options(), &AtomicBool::new(false)).unwrap();
        // the durable check short-circuited: no second attempt consumed
        assert_eq!(db.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retry_gives_up() {
        let db = Flaky {
            inner: EmptyDbOps::new(),
            failures: AtomicU32::new(100),
            commit_before_failing: false,
        };
        let err = store_with_retry(&db, &batch(), &options(), &AtomicBool::new(false)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(db.failures.load(Ordering::SeqCst), 100 - 4);
    }

    #[test]
    fn test_pipeline_stores_and_applies() {
        let dir = tempdir().unwrap();
        let (journal, reader) = open(dir.path(), SEQNUM_INVALID);
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        let engine = ApplyEngine::new(Namespace::new().into_handle());

        let pipeline =
            Pipeline::start(reader, store.clone(), Some(engine.clone()), options()).unwrap();
        let writer = TransactionWriter::new(Arc::clone(&journal), SeqnumCounter::new(0));
        write_txn(&writer, &[user("alice"), user("bob")]);
        write_txn(
            &writer,
            &[JournalOp::HostAdd(HostInfo {
                hostname: "fsn1".into(),
                ..Default::default()
            })],
        );

        journal.wait_until_empty().unwrap();
        assert_eq!(store.load_users().unwrap().len(), 2);
        assert_eq!(MetaStore::durable_seqnum(&store).unwrap(), 7);
        {
            let ns = engine.namespace().lock();
            assert!(ns.entities().user("bob").is_some());
            assert!(ns.entities().host("fsn1").is_some());
        }

        pipeline.stop();
        pipeline.wait().unwrap();
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_drain_stops_apply_only() {
        let dir = tempdir().unwrap();
        let (journal, reader) = open(dir.path(), SEQNUM_INVALID);
        let store = Arc::new(EmptyDbOps::new());
        let engine = ApplyEngine::new(Namespace::new().into_handle());
        let pipeline =
            Pipeline::start(reader, store.clone(), Some(engine.clone()), options()).unwrap();

        let writer = TransactionWriter::new(Arc::clone(&journal), SeqnumCounter::new(0));
        write_txn(&writer, &[user("alice")]);
        pipeline.drain_apply().unwrap();
        assert!(engine.namespace().lock().entities().user("alice").is_some());

        // stored but no longer applied
        write_txn(&writer, &[user("bob")]);
        journal.wait_until_empty().unwrap();
        assert_eq!(store.durable_seqnum().unwrap(), 6);
        assert!(engine.namespace().lock().entities().user("bob").is_none());

        journal.close();
        pipeline.wait().unwrap();
    }

    #[test]
    fn test_fatal_store_error_stops_pipeline() {
        struct Broken;
        impl DbOps for Broken {
            fn begin(&self, _: Seqnum) -> Result<()> {
                Ok(())
            }
            fn end(&self, _: Seqnum) -> Result<()> {
                Ok(())
            }
            fn store(&self, _: Seqnum, _: &JournalOp) -> Result<()> {
                Err(Error::store_fatal("constraint violated"))
            }
            fn durable_seqnum(&self) -> Result<Seqnum> {
                Ok(0)
            }
        }

        let dir = tempdir().unwrap();
        let (journal, reader) = open(dir.path(), SEQNUM_INVALID);
        let pipeline = Pipeline::start(reader, Arc::new(Broken), None, options()).unwrap();
        let writer = TransactionWriter::new(Arc::clone(&journal), SeqnumCounter::new(0));
        write_txn(&writer, &[user("alice")]);

        let err = pipeline.wait().unwrap_err();
        assert!(matches!(err, Error::Store { retryable: false, .. }));
        assert!(journal.is_closed());
        assert!(matches!(journal.wait_until_empty(), Err(Error::Closed)));
    }
}
