//! Server assembly and boot sequence
//!
//! Primary:
//! 1. open the backing store and read its durable seqnum
//! 2. open the journal positioned after that seqnum
//! 3. start the store task and wait until it has drained the journal
//! 4. load the namespace from the store and open the front door
//!
//! Standby: the namespace is loaded first and the pipeline runs with the
//! apply task, so journal records past the store's seqnum reach memory too.

use crate::apply::{ApplyEngine, apply_op};
use crate::db::MetadataDb;
use crate::fetch::Fetcher;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::standby::StandbyWriter;
use nsmeta_common::{Config, Error, Result, Seqnum, ServerRole};
use nsmeta_journal::ops::FsnGroupModify;
use nsmeta_journal::{JournalFile, JournalHandle, JournalOp, SeqnumCounter, TransactionWriter};
use nsmeta_meta_store::MetaStore;
use nsmeta_namespace::{Namespace, NamespaceHandle};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rebuild the in-memory namespace from the backing store
pub fn load_namespace(store: &MetaStore) -> Result<Namespace> {
    let mut ops: Vec<JournalOp> = Vec::new();
    for host in store.load_hosts()? {
        let hostname = host.info.hostname.clone();
        ops.push(JournalOp::HostAdd(host.info));
        if !host.fsngroup.is_empty() {
            ops.push(JournalOp::FsngroupModify(FsnGroupModify {
                hostname,
                fsngroupname: host.fsngroup,
            }));
        }
    }
    ops.extend(store.load_users()?.into_iter().map(JournalOp::UserAdd));
    ops.extend(store.load_groups()?.into_iter().map(JournalOp::GroupAdd));
    ops.extend(store.load_quotas()?.into_iter().map(JournalOp::QuotaAdd));
    ops.extend(store.load_mdhosts()?.into_iter().map(JournalOp::MdhostAdd));
    ops.extend(store.load_inodes()?.into_iter().map(JournalOp::InodeModify));
    ops.extend(store.load_cksums()?.into_iter().map(JournalOp::InodeCksumAdd));
    ops.extend(store.load_symlinks()?.into_iter().map(JournalOp::SymlinkAdd));
    ops.extend(store.load_filecopies()?.into_iter().map(JournalOp::FilecopyAdd));
    ops.extend(store.load_direntries()?.into_iter().map(JournalOp::DirentryAdd));
    ops.extend(store.load_xattrs()?.into_iter().map(JournalOp::XattrAdd));

    let mut ns = Namespace::new();
    let mut skipped = 0usize;
    for op in &ops {
        if let Err(e) = apply_op(&mut ns, op) {
            skipped += 1;
            if e.is_already_exists() {
                debug!("load: ope={} skipped: {}", op.tag(), e);
            } else {
                warn!("load: ope={} failed: {}", op.tag(), e);
            }
        }
    }
    info!(
        "Loaded namespace: {} rows, {} inodes, {} skipped",
        ops.len(),
        ns.inodes().len(),
        skipped
    );
    Ok(ns)
}

/// A metadata server node and the components it runs
#[derive(Debug)]
pub struct MetadataServer {
    config: Config,
    role: ServerRole,
    namespace: NamespaceHandle,
    store: Arc<MetaStore>,
    journal: JournalHandle,
    counter: Arc<SeqnumCounter>,
    pipeline: Pipeline,
    db: Option<MetadataDb>,
    standby: Option<StandbyWriter>,
}

impl MetadataServer {
    pub fn boot(config: Config) -> Result<Self> {
        config.validate()?;
        let role = config.replication.role;
        info!("Booting metadata server {} as {}", config.node.name, role);

        let store = Arc::new(MetaStore::open(&config.store.path)?);
        let db_seqnum = store.durable_seqnum()?;
        let (journal, reader) =
            JournalFile::open(config.journal.file_path(0), &config.journal, db_seqnum)?;
        let counter = SeqnumCounter::new(journal.last_seqnum());
        let options = PipelineOptions::from_config(&config);

        let (namespace, pipeline, db, standby) = match role {
            ServerRole::Primary => {
                let pipeline = Pipeline::start(reader, store.clone(), None, options)?;
                if let Err(e) = journal.wait_until_empty() {
                    pipeline.wait()?;
                    return Err(e);
                }
                info!(
                    "Journal replayed into the store up to seqnum={}",
                    store.durable_seqnum()?
                );
                let namespace = load_namespace(&store)?.into_handle();
                let writer = TransactionWriter::new(Arc::clone(&journal), Arc::clone(&counter));
                (namespace, pipeline, Some(MetadataDb::journaled(writer)), None)
            }
            ServerRole::Standby => {
                let namespace = load_namespace(&store)?.into_handle();
                let engine = ApplyEngine::new(Arc::clone(&namespace));
                let pipeline = Pipeline::start(reader, store.clone(), Some(engine), options)?;
                let standby = StandbyWriter::new(Arc::clone(&journal), Arc::clone(&counter));
                (namespace, pipeline, None, Some(standby))
            }
        };

        info!(
            "Metadata server {} up as {} at seqnum={}",
            config.node.name,
            role,
            counter.current()
        );
        Ok(Self {
            config,
            role,
            namespace,
            store,
            journal,
            counter,
            pipeline,
            db,
            standby,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn role(&self) -> ServerRole {
        self.role
    }

    #[must_use]
    pub const fn namespace(&self) -> &NamespaceHandle {
        &self.namespace
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<MetaStore> {
        &self.store
    }

    #[must_use]
    pub const fn journal(&self) -> &JournalHandle {
        &self.journal
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Front door for mutations; `None` on a standby
    #[must_use]
    pub const fn db(&self) -> Option<&MetadataDb> {
        self.db.as_ref()
    }

    /// Receiver for the primary's records; `None` on a primary
    #[must_use]
    pub const fn standby(&self) -> Option<&StandbyWriter> {
        self.standby.as_ref()
    }

    #[must_use]
    pub fn current_seqnum(&self) -> Seqnum {
        self.counter.current()
    }

    /// Serve a standby that holds everything up to `after_seqnum`
    pub fn fetcher(&self, after_seqnum: Seqnum) -> Result<Fetcher> {
        Fetcher::attach(
            &self.journal,
            Arc::clone(&self.counter),
            after_seqnum,
            self.config.replication.fetch_batch_bytes,
        )
    }

    /// Turn a standby into a primary: close what the old primary left
    /// open, let the apply task catch up and stop it, then open the front
    /// door on the local journal.
    pub fn promote(&mut self) -> Result<()> {
        let standby = self
            .standby
            .take()
            .ok_or_else(|| Error::invalid_argument("only a standby can be promoted"))?;
        let writer = standby.into_writer()?;
        self.pipeline.drain_apply()?;
        self.db = Some(MetadataDb::journaled(writer));
        self.role = ServerRole::Primary;
        info!("Promoted to primary at seqnum={}", self.counter.current());
        Ok(())
    }

    /// Stop the pipeline and close the journal
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down metadata server {}", self.config.node.name);
        self.pipeline.stop();
        self.journal.close();
        self.pipeline.wait()
    }
}
