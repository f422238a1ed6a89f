//! Primary to standby journal shipping, end to end

use nsmeta_common::config::{JournalConfig, StoreConfig};
use nsmeta_common::{Config, Error, S_IFDIR, S_IFREG, ServerRole};
use nsmeta_journal::JournalOp;
use nsmeta_journal::ops::{DirEntryArg, HostInfo, InodeStat, InodeU64Modify, UserInfo};
use nsmeta_replication::{Fetcher, MetadataServer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn config(dir: &Path, name: &str, role: ServerRole) -> Config {
    let mut config = Config {
        journal: JournalConfig {
            dir: dir.join("journal"),
            max_size: 512 * 1024,
            write_wait_timeout: Duration::from_secs(1),
            ..Default::default()
        },
        store: StoreConfig {
            path: dir.join("meta.redb"),
            retry_interval: Duration::from_millis(5),
            max_retries: 3,
        },
        ..Default::default()
    };
    config.node.name = name.to_string();
    config.node.data_dir = dir.to_path_buf();
    config.replication.role = role;
    config.replication.read_poll_interval = Duration::from_millis(10);
    config
}

fn create_file(ino: u64, dir_ino: u64, name: &str) -> Vec<JournalOp> {
    vec![
        JournalOp::InodeAdd(InodeStat {
            ino,
            mode: S_IFREG | 0o644,
            nlink: 1,
            user: "alice".into(),
            ..Default::default()
        }),
        JournalOp::DirentryAdd(DirEntryArg {
            dir_ino,
            name: name.into(),
            entry_ino: ino,
        }),
    ]
}

/// Ship everything the standby is missing
fn sync(fetcher: &mut Fetcher, standby: &MetadataServer) -> usize {
    let receiver = standby.standby().unwrap();
    let mut shipped = 0;
    while let Some(batch) = fetcher
        .fetch(receiver.next_seqnum(), Duration::ZERO)
        .unwrap()
    {
        receiver.recv(&batch.bytes, batch.from).unwrap();
        shipped += batch.records;
    }
    shipped
}

#[test]
fn test_standby_mirrors_primary() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let primary = MetadataServer::boot(config(a.path(), "md1", ServerRole::Primary)).unwrap();
    let standby = MetadataServer::boot(config(b.path(), "md2", ServerRole::Standby)).unwrap();
    let db = primary.db().unwrap();

    {
        let mut ns = primary.namespace().lock();
        db.mutate(
            &mut ns,
            &[
                JournalOp::HostAdd(HostInfo {
                    hostname: "fsn1".into(),
                    ..Default::default()
                }),
                JournalOp::UserAdd(UserInfo {
                    username: "alice".into(),
                    ..Default::default()
                }),
            ],
        )
        .unwrap();
        db.mutate(
            &mut ns,
            &[
                JournalOp::InodeAdd(InodeStat {
                    ino: 100,
                    mode: S_IFDIR | 0o755,
                    nlink: 2,
                    ..Default::default()
                }),
                JournalOp::DirentryAdd(DirEntryArg {
                    dir_ino: 2,
                    name: "data".into(),
                    entry_ino: 100,
                }),
            ],
        )
        .unwrap();
        for i in 0..50 {
            db.mutate(&mut ns, &create_file(200 + i, 100, &format!("f{i:03}")))
                .unwrap();
        }
        db.mutate(
            &mut ns,
            &[JournalOp::InodeSizeModify(InodeU64Modify {
                ino: 200,
                value: 4096,
            })],
        )
        .unwrap();
    }

    let mut fetcher = primary.fetcher(0).unwrap();
    let shipped = sync(&mut fetcher, &standby);
    assert_eq!(u64::try_from(shipped).unwrap(), primary.current_seqnum());

    standby.journal().wait_until_empty().unwrap();
    assert_eq!(*standby.namespace().lock(), *primary.namespace().lock());
    assert_eq!(
        standby.store().durable_seqnum().unwrap(),
        primary.current_seqnum()
    );
    assert_eq!(
        standby.namespace().lock().inode(200).unwrap().size,
        4096
    );

    standby.shutdown().unwrap();
    primary.shutdown().unwrap();
}

#[test]
fn test_gap_forces_reconnect() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let primary = MetadataServer::boot(config(a.path(), "md1", ServerRole::Primary)).unwrap();
    let standby = MetadataServer::boot(config(b.path(), "md2", ServerRole::Standby)).unwrap();
    let db = primary.db().unwrap();
    {
        let mut ns = primary.namespace().lock();
        for i in 0..3 {
            db.mutate(&mut ns, &create_file(10 + i, 2, &format!("g{i}")))
                .unwrap();
        }
    }

    // a fetcher attached past what the standby holds skips records
    let mut stale = primary.fetcher(4).unwrap();
    let batch = stale.fetch(5, Duration::ZERO).unwrap().unwrap();
    let receiver = standby.standby().unwrap();
    let err = receiver.recv(&batch.bytes, batch.from).unwrap_err();
    assert!(matches!(err, Error::Sequencing { expected: 1, actual: 5 }));

    // reconnect from the standby's own position
    let mut fetcher = primary.fetcher(receiver.next_seqnum() - 1).unwrap();
    sync(&mut fetcher, &standby);
    standby.journal().wait_until_empty().unwrap();
    assert_eq!(standby.namespace().lock().lookup_path("/g2"), Some(12));

    standby.shutdown().unwrap();
    primary.shutdown().unwrap();
}

#[test]
fn test_promote_closes_partial_transaction() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let primary = MetadataServer::boot(config(a.path(), "md1", ServerRole::Primary)).unwrap();
    let mut standby = MetadataServer::boot(config(b.path(), "md2", ServerRole::Standby)).unwrap();
    let db = primary.db().unwrap();
    {
        let mut ns = primary.namespace().lock();
        db.mutate(&mut ns, &create_file(10, 2, "whole")).unwrap();
        db.mutate(&mut ns, &create_file(11, 2, "torn")).unwrap();
    }

    // one record per batch; stop after the second transaction's inode
    let mut fetcher =
        Fetcher::attach(primary.journal(), Arc::clone(db.counter()), 0, 1).unwrap();
    {
        let receiver = standby.standby().unwrap();
        for _ in 0..6 {
            let batch = fetcher
                .fetch(receiver.next_seqnum(), Duration::ZERO)
                .unwrap()
                .unwrap();
            assert_eq!(batch.records, 1);
            receiver.recv(&batch.bytes, batch.from).unwrap();
        }
        assert!(receiver.in_transaction());
    }
    primary.shutdown().unwrap();

    standby.promote().unwrap();
    assert_eq!(standby.role(), ServerRole::Primary);
    // BEGIN, inode, direntry, END, BEGIN, inode, forced END
    assert_eq!(standby.current_seqnum(), 7);
    {
        let ns = standby.namespace().lock();
        assert_eq!(ns.lookup_path("/whole"), Some(10));
        // the inode made it, its directory entry did not
        assert!(ns.inode(11).is_some());
        assert_eq!(ns.lookup_path("/torn"), None);
    }

    // the promoted node journals on its own from here
    let db = standby.db().unwrap();
    {
        let mut ns = standby.namespace().lock();
        let outcomes = db
            .mutate(
                &mut ns,
                &[JournalOp::DirentryAdd(DirEntryArg {
                    dir_ino: 2,
                    name: "torn".into(),
                    entry_ino: 11,
                })],
            )
            .unwrap();
        assert!(outcomes[0].is_applied());
    }
    standby.journal().wait_until_empty().unwrap();
    assert_eq!(standby.store().durable_seqnum().unwrap(), 10);
    standby.shutdown().unwrap();
}
