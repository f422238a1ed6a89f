//! Apply engine: journal records to namespace mutations
//!
//! Semantic failures (the target already exists, a host vanished, ...)
//! come back as [`ApplyOutcome::Warning`] and never stop the stream. Only
//! a structurally broken batch is an error.

use nsmeta_common::{Error, Result, Seqnum};
use nsmeta_journal::{JournalOp, JournalRecord};
use nsmeta_namespace::{Namespace, NamespaceError, NamespaceHandle, NsResult};
use tracing::{debug, warn};

/// Result of applying one record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Logged and skipped; sequencing is unaffected
    Warning(NamespaceError),
}

impl ApplyOutcome {
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    #[must_use]
    pub const fn warning(&self) -> Option<&NamespaceError> {
        match self {
            Self::Applied => None,
            Self::Warning(e) => Some(e),
        }
    }
}

/// Dispatch one operation to its namespace mutator
pub fn apply_op(ns: &mut Namespace, op: &JournalOp) -> NsResult<()> {
    match op {
        JournalOp::Begin | JournalOp::End | JournalOp::Nop => Ok(()),

        JournalOp::HostAdd(info) => ns.entities_mut().host_add(info),
        JournalOp::HostModify(arg) => ns.entities_mut().host_modify(arg),
        JournalOp::HostRemove(name) => ns.entities_mut().host_remove(name),
        JournalOp::FsngroupModify(arg) => ns
            .entities_mut()
            .fsngroup_modify(&arg.hostname, &arg.fsngroupname),

        JournalOp::UserAdd(info) => ns.entities_mut().user_add(info),
        JournalOp::UserModify(arg) => ns.entities_mut().user_modify(&arg.info),
        JournalOp::UserRemove(name) => ns.entities_mut().user_remove(name),

        JournalOp::GroupAdd(info) => ns.entities_mut().group_add(info),
        JournalOp::GroupModify(arg) => ns.entities_mut().group_modify(arg),
        JournalOp::GroupRemove(name) => ns.entities_mut().group_remove(name),

        JournalOp::InodeAdd(st) => ns.inode_add(st),
        JournalOp::InodeModify(st) => ns.inode_modify(st),
        JournalOp::InodeGenModify(m) => ns.modify_inode(m.ino, |i| i.generation = m.value),
        JournalOp::InodeNlinkModify(m) => ns.modify_inode(m.ino, |i| i.nlink = m.value),
        JournalOp::InodeSizeModify(m) => ns.modify_inode(m.ino, |i| i.size = m.value),
        JournalOp::InodeModeModify(m) => ns.modify_inode(m.ino, |i| i.set_mode(m.value)),
        JournalOp::InodeUserModify(m) => ns.modify_inode(m.ino, |i| i.user.clone_from(&m.value)),
        JournalOp::InodeGroupModify(m) => {
            ns.modify_inode(m.ino, |i| i.group.clone_from(&m.value))
        }
        JournalOp::InodeAtimeModify(m) => ns.modify_inode(m.ino, |i| i.atime = m.time),
        JournalOp::InodeMtimeModify(m) => ns.modify_inode(m.ino, |i| i.mtime = m.time),
        JournalOp::InodeCtimeModify(m) => ns.modify_inode(m.ino, |i| i.ctime = m.time),

        JournalOp::InodeCksumAdd(arg) | JournalOp::InodeCksumModify(arg) => ns.cksum_set(arg),
        JournalOp::InodeCksumRemove(r) => ns.cksum_remove(r.ino),

        JournalOp::FilecopyAdd(fc) => ns.replica_add(fc.ino, &fc.hostname, true),
        JournalOp::FilecopyRemove(fc) => ns.replica_remove(fc.ino, &fc.hostname),
        // dead copies only live in the backing store
        JournalOp::DeadFilecopyAdd(_) | JournalOp::DeadFilecopyRemove(_) => Ok(()),

        JournalOp::DirentryAdd(d) => ns.direntry_add(d.dir_ino, &d.name, d.entry_ino),
        JournalOp::DirentryRemove(d) => ns.direntry_remove(d.dir_ino, &d.name),

        JournalOp::SymlinkAdd(s) => ns.symlink_set(s.ino, &s.source_path),
        JournalOp::SymlinkRemove(r) => ns.symlink_clear(r.ino),

        JournalOp::XattrAdd(x) => ns.xattr_add(x),
        JournalOp::XattrModify(x) => ns.xattr_modify(x),
        JournalOp::XattrRemove(x) => ns.xattr_remove(x),
        JournalOp::XattrRemoveAll(x) => ns.xattr_remove_all(x.ino),

        JournalOp::QuotaAdd(q) | JournalOp::QuotaModify(q) => {
            ns.entities_mut().quota_set(q.is_group, &q.name, &q.quota)
        }
        JournalOp::QuotaRemove(q) => ns.entities_mut().quota_remove(q.is_group, &q.name),

        JournalOp::MdhostAdd(info) => ns.entities_mut().mdhost_add(info),
        JournalOp::MdhostModify(arg) => ns.entities_mut().mdhost_modify(&arg.info),
        JournalOp::MdhostRemove(name) => ns.entities_mut().mdhost_remove(name),
    }
}

/// Check that `batch` is one closed BEGIN..END transaction with
/// contiguous sequence numbers.
pub fn validate_batch(batch: &[JournalRecord]) -> Result<()> {
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return Err(Error::invalid_argument("empty transaction batch"));
    };
    if first.op != JournalOp::Begin {
        return Err(Error::corrupt(
            0,
            format!("batch starts with {} at seqnum {}", first.op.tag(), first.seqnum),
        ));
    }
    if batch.len() < 2 || last.op != JournalOp::End {
        return Err(Error::corrupt(
            0,
            format!("batch from seqnum {} is not closed by END", first.seqnum),
        ));
    }

    let mut expected = first.seqnum;
    for (i, rec) in batch.iter().enumerate() {
        if rec.seqnum != expected {
            return Err(Error::Sequencing {
                expected,
                actual: rec.seqnum,
            });
        }
        let inner = i != 0 && i != batch.len() - 1;
        if inner && matches!(rec.op, JournalOp::Begin | JournalOp::End) {
            return Err(Error::corrupt(
                0,
                format!("nested {} at seqnum {} inside a batch", rec.op.tag(), rec.seqnum),
            ));
        }
        expected += 1;
    }
    Ok(())
}

/// Applies records to the namespace under its giant lock
#[derive(Clone, Debug)]
pub struct ApplyEngine {
    namespace: NamespaceHandle,
}

impl ApplyEngine {
    #[must_use]
    pub const fn new(namespace: NamespaceHandle) -> Self {
        Self { namespace }
    }

    #[must_use]
    pub const fn namespace(&self) -> &NamespaceHandle {
        &self.namespace
    }

    fn apply_locked(ns: &mut Namespace, seqnum: Seqnum, op: &JournalOp) -> ApplyOutcome {
        match apply_op(ns, op) {
            Ok(()) => {
                debug!("apply: seqnum={} ope={}", seqnum, op.tag());
                ApplyOutcome::Applied
            }
            Err(e) => {
                warn!("apply: seqnum={} ope={}: {}", seqnum, op.tag(), e);
                ApplyOutcome::Warning(e)
            }
        }
    }

    /// Apply a single record
    pub fn apply(&self, record: &JournalRecord) -> ApplyOutcome {
        let mut ns = self.namespace.lock();
        Self::apply_locked(&mut ns, record.seqnum, &record.op)
    }

    /// Apply one BEGIN..END transaction. A malformed batch is rejected
    /// before anything is touched; otherwise every record is applied and
    /// its outcome returned in order.
    pub fn apply_batch(&self, batch: &[JournalRecord]) -> Result<Vec<ApplyOutcome>> {
        validate_batch(batch)?;
        let mut ns = self.namespace.lock();
        Ok(batch
            .iter()
            .map(|rec| Self::apply_locked(&mut ns, rec.seqnum, &rec.op))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmeta_common::{S_IFDIR, S_IFREG, Timespec};
    use nsmeta_journal::ops::{
        DirEntryArg, FileCopy, HostInfo, InodeStat, InodeTimeModify, InodeU32Modify,
        InodeU64Modify, UserInfo,
    };

    fn txn(first: Seqnum, ops: Vec<JournalOp>) -> Vec<JournalRecord> {
        std::iter::once(JournalOp::Begin)
            .chain(ops)
            .chain(std::iter::once(JournalOp::End))
            .enumerate()
            .map(|(i, op)| JournalRecord::new(first + i as u64, op))
            .collect()
    }

    fn create_file_ops() -> Vec<JournalOp> {
        vec![
            JournalOp::HostAdd(HostInfo {
                hostname: "fsn1".into(),
                port: 600,
                ..Default::default()
            }),
            JournalOp::UserAdd(UserInfo {
                username: "alice".into(),
                ..Default::default()
            }),
            JournalOp::InodeAdd(InodeStat {
                ino: 100,
                nlink: 1,
                mode: S_IFREG | 0o644,
                user: "alice".into(),
                ..Default::default()
            }),
            JournalOp::DirentryAdd(DirEntryArg {
                dir_ino: 2,
                name: "file".into(),
                entry_ino: 100,
            }),
            JournalOp::FilecopyAdd(FileCopy {
                ino: 100,
                hostname: "fsn1".into(),
            }),
        ]
    }

    #[test]
    fn test_apply_create_file() {
        let engine = ApplyEngine::new(Namespace::new().into_handle());
        let outcomes = engine.apply_batch(&txn(1, create_file_ops())).unwrap();
        assert!(outcomes.iter().all(ApplyOutcome::is_applied));

        let ns = engine.namespace().lock();
        assert_eq!(ns.lookup_path("/file"), Some(100));
        let inode = ns.inode(100).unwrap();
        assert_eq!(inode.user, "alice");
        let replica = inode.file().unwrap().replica("fsn1").unwrap();
        assert!(replica.valid);
    }

    #[test]
    fn test_reapply_is_idempotent() {
        let batch = txn(1, create_file_ops());

        let once = ApplyEngine::new(Namespace::new().into_handle());
        once.apply_batch(&batch).unwrap();

        let twice = ApplyEngine::new(Namespace::new().into_handle());
        twice.apply_batch(&batch).unwrap();
        let outcomes = twice.apply_batch(&batch).unwrap();

        // BEGIN and END apply trivially, every ADD reports the duplicate
        assert!(outcomes[0].is_applied());
        assert!(outcomes[outcomes.len() - 1].is_applied());
        for outcome in &outcomes[1..outcomes.len() - 1] {
            assert!(
                outcome.warning().is_some_and(NamespaceError::is_already_exists),
                "{outcome:?}"
            );
        }
        assert_eq!(*once.namespace().lock(), *twice.namespace().lock());
    }

    #[test]
    fn test_semantic_error_does_not_stop_batch() {
        let engine = ApplyEngine::new(Namespace::new().into_handle());
        let batch = txn(
            10,
            vec![
                JournalOp::DirentryRemove(DirEntryArg {
                    dir_ino: 2,
                    name: "missing".into(),
                    entry_ino: 0,
                }),
                JournalOp::InodeAdd(InodeStat {
                    ino: 7,
                    mode: S_IFDIR | 0o755,
                    nlink: 2,
                    ..Default::default()
                }),
            ],
        );
        let outcomes = engine.apply_batch(&batch).unwrap();
        assert!(matches!(
            outcomes[1],
            ApplyOutcome::Warning(NamespaceError::NoSuchFileOrDirectory(_))
        ));
        assert!(outcomes[2].is_applied());
        assert!(engine.namespace().lock().inode(7).unwrap().is_dir());
    }

    #[test]
    fn test_out_of_range_inode_is_a_warning() {
        let engine = ApplyEngine::new(Namespace::new().into_handle());
        let batch = txn(
            1,
            vec![JournalOp::InodeAdd(InodeStat {
                ino: u64::MAX / 2,
                mode: S_IFREG | 0o644,
                nlink: 1,
                ..Default::default()
            })],
        );
        let outcomes = engine.apply_batch(&batch).unwrap();
        assert!(matches!(
            outcomes[1],
            ApplyOutcome::Warning(NamespaceError::InvalidArgument(_))
        ));
        assert!(outcomes[2].is_applied());
    }

    #[test]
    fn test_field_modifies() {
        let engine = ApplyEngine::new(Namespace::new().into_handle());
        let batch = txn(
            1,
            vec![
                JournalOp::InodeSizeModify(InodeU64Modify { ino: 50, value: 4096 }),
                JournalOp::InodeModeModify(InodeU32Modify {
                    ino: 50,
                    value: S_IFREG | 0o600,
                }),
                JournalOp::InodeMtimeModify(InodeTimeModify {
                    ino: 50,
                    time: Timespec::new(1_700_000_000, 5),
                }),
            ],
        );
        engine.apply_batch(&batch).unwrap();
        let ns = engine.namespace().lock();
        let inode = ns.inode(50).unwrap();
        assert_eq!(inode.size, 4096);
        assert_eq!(inode.mode(), S_IFREG | 0o600);
        assert_eq!(inode.mtime, Timespec::new(1_700_000_000, 5));
    }

    #[test]
    fn test_malformed_batches_rejected() {
        let engine = ApplyEngine::new(Namespace::new().into_handle());

        let mut unclosed = txn(1, create_file_ops());
        unclosed.pop();
        assert!(matches!(
            engine.apply_batch(&unclosed),
            Err(Error::Corrupt { .. })
        ));

        let mut gap = txn(1, create_file_ops());
        gap[2].seqnum += 1;
        assert!(matches!(
            engine.apply_batch(&gap),
            Err(Error::Sequencing { expected: 3, actual: 4 })
        ));

        assert!(engine.apply_batch(&[]).is_err());
        // nothing was applied
        assert_eq!(*engine.namespace().lock(), Namespace::new());
    }
}
