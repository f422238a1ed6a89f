//! Persistent metadata store backed by redb.
//!
//! Every journal operation maps to a put or delete on one table. A write
//! transaction always records the sequence number it brings the store up
//! to, so after a crash `durable_seqnum()` tells exactly which operations
//! already reached disk.

use crate::tables;
use crate::types::{StoredCksum, StoredHost};
use nsmeta_common::{InodeNumber, Seqnum};
use nsmeta_journal::JournalOp;
use nsmeta_journal::ops::{
    DeadFileCopy, DirEntryArg, FileCopy, GroupInfo, InodeCksum, InodeStat, MdHostInfo, QuotaArg,
    QuotaLimits, SymlinkArg, UserInfo, XattrArg,
};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use std::path::Path;
use tracing::{debug, error, info};

/// Error type for metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl MetaStoreError {
    /// I/O failures may clear up; everything else means the database or
    /// the data is broken.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Storage(redb::StorageError::Io(_))
                | Self::Commit(redb::CommitError::Storage(redb::StorageError::Io(_)))
        )
    }
}

impl From<MetaStoreError> for nsmeta_common::Error {
    fn from(e: MetaStoreError) -> Self {
        Self::Store {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

pub type MetaStoreResult<T> = Result<T, MetaStoreError>;

/// Persistent metadata store backed by redb.
pub struct MetaStore {
    db: Database,
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore").finish_non_exhaustive()
    }
}

impl MetaStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::SEQNUM)?;
            let _t = write_txn.open_table(tables::HOSTS)?;
            let _t = write_txn.open_table(tables::USERS)?;
            let _t = write_txn.open_table(tables::GROUPS)?;
            let _t = write_txn.open_table(tables::USER_QUOTAS)?;
            let _t = write_txn.open_table(tables::GROUP_QUOTAS)?;
            let _t = write_txn.open_table(tables::MDHOSTS)?;
            let _t = write_txn.open_table(tables::INODES)?;
            let _t = write_txn.open_table(tables::INODE_CKSUMS)?;
            let _t = write_txn.open_table(tables::SYMLINKS)?;
            let _t = write_txn.open_table(tables::FILECOPIES)?;
            let _t = write_txn.open_table(tables::DEAD_FILECOPIES)?;
            let _t = write_txn.open_table(tables::DIRENTRIES)?;
            let _t = write_txn.open_table(tables::XATTRS)?;
        }
        write_txn.commit()?;

        let store = Self { db };
        info!(
            "metadata store opened: path={} seqnum={}",
            path.display(),
            store.durable_seqnum()?
        );
        Ok(store)
    }

    /// Highest sequence number whose effects are on disk
    pub fn durable_seqnum(&self) -> MetaStoreResult<Seqnum> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::SEQNUM)?;
        Ok(table.get(tables::SEQNUM_KEY)?.map_or(0, |v| v.value()))
    }

    /// Persist `ops` and advance the durable seqnum to `seqnum`, all in
    /// one write transaction
    pub fn commit_ops<'a>(
        &self,
        ops: impl IntoIterator<Item = &'a JournalOp>,
        seqnum: Seqnum,
    ) -> MetaStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        for op in ops {
            write_op(&write_txn, op)?;
        }
        {
            let mut table = write_txn.open_table(tables::SEQNUM)?;
            let current = table.get(tables::SEQNUM_KEY)?.map_or(0, |v| v.value());
            table.insert(tables::SEQNUM_KEY, current.max(seqnum))?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ---- Bulk loaders ----

    pub fn load_hosts(&self) -> MetaStoreResult<Vec<StoredHost>> {
        Ok(values(self.load_bincode_table(tables::HOSTS)?))
    }

    pub fn load_users(&self) -> MetaStoreResult<Vec<UserInfo>> {
        Ok(values(self.load_bincode_table(tables::USERS)?))
    }

    pub fn load_groups(&self) -> MetaStoreResult<Vec<GroupInfo>> {
        Ok(values(self.load_bincode_table(tables::GROUPS)?))
    }

    pub fn load_mdhosts(&self) -> MetaStoreResult<Vec<MdHostInfo>> {
        Ok(values(self.load_bincode_table(tables::MDHOSTS)?))
    }

    pub fn load_quotas(&self) -> MetaStoreResult<Vec<QuotaArg>> {
        let mut result = Vec::new();
        for (is_group, table_def) in [(false, tables::USER_QUOTAS), (true, tables::GROUP_QUOTAS)] {
            for (name, quota) in self.load_bincode_table::<QuotaLimits>(table_def)? {
                result.push(QuotaArg {
                    is_group,
                    name,
                    quota,
                });
            }
        }
        Ok(result)
    }

    /// All inodes, in inode number order
    pub fn load_inodes(&self) -> MetaStoreResult<Vec<InodeStat>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::INODES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let ino = entry.0.value();
            match bincode::deserialize::<InodeStat>(entry.1.value()) {
                Ok(st) => result.push(st),
                Err(e) => error!("Failed to decode inode {}: {}", ino, e),
            }
        }
        Ok(result)
    }

    pub fn load_cksums(&self) -> MetaStoreResult<Vec<InodeCksum>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::INODE_CKSUMS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let ino = entry.0.value();
            match bincode::deserialize::<StoredCksum>(entry.1.value()) {
                Ok(c) => result.push(InodeCksum {
                    ino,
                    cksum_type: c.cksum_type,
                    sum: c.sum,
                }),
                Err(e) => error!("Failed to decode checksum of inode {}: {}", ino, e),
            }
        }
        Ok(result)
    }

    pub fn load_symlinks(&self) -> MetaStoreResult<Vec<SymlinkArg>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::SYMLINKS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            result.push(SymlinkArg {
                ino: entry.0.value(),
                source_path: entry.1.value().to_string(),
            });
        }
        Ok(result)
    }

    pub fn load_filecopies(&self) -> MetaStoreResult<Vec<FileCopy>> {
        let mut result = Vec::new();
        for key in self.load_keys(tables::FILECOPIES)? {
            match split_ino(&key) {
                Some((ino, hostname)) => result.push(FileCopy {
                    ino,
                    hostname: hostname.to_string(),
                }),
                None => error!("Malformed filecopy key '{}'", key),
            }
        }
        Ok(result)
    }

    pub fn load_dead_filecopies(&self) -> MetaStoreResult<Vec<DeadFileCopy>> {
        let mut result = Vec::new();
        for key in self.load_keys(tables::DEAD_FILECOPIES)? {
            let parsed = split_ino(&key).and_then(|(ino, rest)| {
                let (generation, hostname) = rest.split_once(':')?;
                Some(DeadFileCopy {
                    ino,
                    generation: generation.parse().ok()?,
                    hostname: hostname.to_string(),
                })
            });
            match parsed {
                Some(d) => result.push(d),
                None => error!("Malformed dead filecopy key '{}'", key),
            }
        }
        Ok(result)
    }

    /// Directory entries grouped by directory, each directory in name order
    pub fn load_direntries(&self) -> MetaStoreResult<Vec<DirEntryArg>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::DIRENTRIES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value();
            match split_ino(key) {
                Some((dir_ino, name)) => result.push(DirEntryArg {
                    dir_ino,
                    name: name.to_string(),
                    entry_ino: entry.1.value(),
                }),
                None => error!("Malformed direntry key '{}'", key),
            }
        }
        Ok(result)
    }

    pub fn load_xattrs(&self) -> MetaStoreResult<Vec<XattrArg>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::XATTRS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value();
            let parsed = split_ino(key).and_then(|(ino, rest)| {
                let (mode, attrname) = rest.split_once(':')?;
                Some((ino, mode == "1", attrname.to_string()))
            });
            match parsed {
                Some((ino, xml_mode, attrname)) => result.push(XattrArg {
                    xml_mode,
                    ino,
                    attrname,
                    value: entry.1.value().to_vec(),
                }),
                None => error!("Malformed xattr key '{}'", key),
            }
        }
        Ok(result)
    }

    // ---- Generic helpers ----

    fn load_bincode_table<T: serde::de::DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
    ) -> MetaStoreResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value().to_string();
            let bytes = entry.1.value();
            match bincode::deserialize::<T>(bytes) {
                Ok(val) => result.push((key, val)),
                Err(e) => error!("Failed to decode entry '{}': {}", key, e),
            }
        }
        Ok(result)
    }

    fn load_keys(&self, table_def: TableDefinition<&str, &[u8]>) -> MetaStoreResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            result.push(entry?.0.value().to_string());
        }
        Ok(result)
    }
}

/// Value of rows that carry no payload
const EMPTY: &[u8] = &[];

fn values<T>(rows: Vec<(String, T)>) -> Vec<T> {
    rows.into_iter().map(|(_, v)| v).collect()
}

/// Split "ino:rest" at the first `:`
fn split_ino(key: &str) -> Option<(InodeNumber, &str)> {
    let (ino, rest) = key.split_once(':')?;
    Some((ino.parse().ok()?, rest))
}

fn xattr_key(arg: &XattrArg) -> String {
    format!("{}:{}:{}", arg.ino, u8::from(arg.xml_mode), arg.attrname)
}

fn merge_list(list: &mut Vec<String>, add: &[String], del: &[String]) {
    list.retain(|x| !del.contains(x));
    for name in add {
        if !list.contains(name) {
            list.push(name.clone());
        }
    }
}

fn put_bincode<T: serde::Serialize>(
    txn: &WriteTransaction,
    table_def: TableDefinition<&str, &[u8]>,
    key: &str,
    value: &T,
) -> MetaStoreResult<()> {
    let bytes = bincode::serialize(value)?;
    let mut table = txn.open_table(table_def)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

fn get_bincode<T: serde::de::DeserializeOwned>(
    txn: &WriteTransaction,
    table_def: TableDefinition<&str, &[u8]>,
    key: &str,
) -> MetaStoreResult<Option<T>> {
    let table = txn.open_table(table_def)?;
    let value = match table.get(key)? {
        Some(v) => Some(bincode::deserialize(v.value())?),
        None => None,
    };
    Ok(value)
}

fn delete_key<V: redb::Value + 'static>(
    txn: &WriteTransaction,
    table_def: TableDefinition<&str, V>,
    key: &str,
) -> MetaStoreResult<()> {
    let mut table = txn.open_table(table_def)?;
    table.remove(key)?;
    Ok(())
}

fn delete_keys_with_prefix(
    txn: &WriteTransaction,
    table_def: TableDefinition<&str, &[u8]>,
    prefix: &str,
) -> MetaStoreResult<()> {
    let mut table = txn.open_table(table_def)?;
    let mut keys = Vec::new();
    for entry in table.range(prefix..)? {
        let k = entry?.0.value().to_string();
        if !k.starts_with(prefix) {
            break;
        }
        keys.push(k);
    }
    for key in &keys {
        table.remove(key.as_str())?;
    }
    Ok(())
}

fn put_stat(txn: &WriteTransaction, st: &InodeStat) -> MetaStoreResult<()> {
    let bytes = bincode::serialize(st)?;
    let mut table = txn.open_table(tables::INODES)?;
    table.insert(st.ino, bytes.as_slice())?;
    Ok(())
}

/// Read-modify-write of one stored inode. A missing row is left alone.
fn modify_stat(
    txn: &WriteTransaction,
    ino: InodeNumber,
    f: impl FnOnce(&mut InodeStat),
) -> MetaStoreResult<()> {
    let current = {
        let table = txn.open_table(tables::INODES)?;
        match table.get(ino)? {
            Some(v) => Some(bincode::deserialize::<InodeStat>(v.value())?),
            None => None,
        }
    };
    let Some(mut st) = current else {
        debug!("inode {} not in store, field update skipped", ino);
        return Ok(());
    };
    f(&mut st);
    put_stat(txn, &st)
}

#[allow(clippy::too_many_lines)]
fn write_op(txn: &WriteTransaction, op: &JournalOp) -> MetaStoreResult<()> {
    match op {
        JournalOp::Begin | JournalOp::End | JournalOp::Nop => Ok(()),

        JournalOp::HostAdd(info) => put_bincode(
            txn,
            tables::HOSTS,
            &info.hostname,
            &StoredHost {
                info: info.clone(),
                fsngroup: String::new(),
            },
        ),
        JournalOp::HostModify(arg) => {
            let name = arg.info.hostname.as_str();
            let Some(mut host) = get_bincode::<StoredHost>(txn, tables::HOSTS, name)? else {
                debug!("host {} not in store, modify skipped", name);
                return Ok(());
            };
            let mut aliases = std::mem::take(&mut host.info.aliases);
            merge_list(&mut aliases, &arg.add_aliases, &arg.del_aliases);
            host.info = arg.info.clone();
            host.info.aliases = aliases;
            put_bincode(txn, tables::HOSTS, name, &host)
        }
        JournalOp::HostRemove(name) => delete_key(txn, tables::HOSTS, name),
        JournalOp::FsngroupModify(arg) => {
            let Some(mut host) = get_bincode::<StoredHost>(txn, tables::HOSTS, &arg.hostname)?
            else {
                debug!("host {} not in store, fsngroup skipped", arg.hostname);
                return Ok(());
            };
            host.fsngroup.clone_from(&arg.fsngroupname);
            put_bincode(txn, tables::HOSTS, &arg.hostname, &host)
        }

        JournalOp::UserAdd(info) => put_bincode(txn, tables::USERS, &info.username, info),
        JournalOp::UserModify(arg) => {
            put_bincode(txn, tables::USERS, &arg.info.username, &arg.info)
        }
        JournalOp::UserRemove(name) => delete_key(txn, tables::USERS, name),

        JournalOp::GroupAdd(info) => put_bincode(txn, tables::GROUPS, &info.groupname, info),
        JournalOp::GroupModify(arg) => {
            let mut group = arg.info.clone();
            merge_list(&mut group.usernames, &arg.add_users, &arg.del_users);
            put_bincode(txn, tables::GROUPS, &group.groupname, &group)
        }
        JournalOp::GroupRemove(name) => delete_key(txn, tables::GROUPS, name),

        JournalOp::InodeAdd(st) | JournalOp::InodeModify(st) => put_stat(txn, st),
        JournalOp::InodeGenModify(m) => modify_stat(txn, m.ino, |st| st.generation = m.value),
        JournalOp::InodeNlinkModify(m) => modify_stat(txn, m.ino, |st| st.nlink = m.value),
        JournalOp::InodeSizeModify(m) => modify_stat(txn, m.ino, |st| st.size = m.value),
        JournalOp::InodeModeModify(m) => modify_stat(txn, m.ino, |st| st.mode = m.value),
        JournalOp::InodeUserModify(m) => {
            modify_stat(txn, m.ino, |st| st.user.clone_from(&m.value))
        }
        JournalOp::InodeGroupModify(m) => {
            modify_stat(txn, m.ino, |st| st.group.clone_from(&m.value))
        }
        JournalOp::InodeAtimeModify(m) => modify_stat(txn, m.ino, |st| st.atime = m.time),
        JournalOp::InodeMtimeModify(m) => modify_stat(txn, m.ino, |st| st.mtime = m.time),
        JournalOp::InodeCtimeModify(m) => modify_stat(txn, m.ino, |st| st.ctime = m.time),

        JournalOp::InodeCksumAdd(c) | JournalOp::InodeCksumModify(c) => {
            let bytes = bincode::serialize(&StoredCksum {
                cksum_type: c.cksum_type.clone(),
                sum: c.sum.clone(),
            })?;
            let mut table = txn.open_table(tables::INODE_CKSUMS)?;
            table.insert(c.ino, bytes.as_slice())?;
            Ok(())
        }
        JournalOp::InodeCksumRemove(r) => {
            let mut table = txn.open_table(tables::INODE_CKSUMS)?;
            table.remove(r.ino)?;
            Ok(())
        }

        JournalOp::FilecopyAdd(fc) => {
            let mut table = txn.open_table(tables::FILECOPIES)?;
            table.insert(format!("{}:{}", fc.ino, fc.hostname).as_str(), EMPTY)?;
            Ok(())
        }
        JournalOp::FilecopyRemove(fc) => {
            delete_key(txn, tables::FILECOPIES, &format!("{}:{}", fc.ino, fc.hostname))
        }
        JournalOp::DeadFilecopyAdd(d) => {
            let key = format!("{}:{}:{}", d.ino, d.generation, d.hostname);
            let mut table = txn.open_table(tables::DEAD_FILECOPIES)?;
            table.insert(key.as_str(), EMPTY)?;
            Ok(())
        }
        JournalOp::DeadFilecopyRemove(d) => delete_key(
            txn,
            tables::DEAD_FILECOPIES,
            &format!("{}:{}:{}", d.ino, d.generation, d.hostname),
        ),

        JournalOp::DirentryAdd(d) => {
            let key = format!("{}:{}", d.dir_ino, d.name);
            let mut table = txn.open_table(tables::DIRENTRIES)?;
            table.insert(key.as_str(), d.entry_ino)?;
            Ok(())
        }
        JournalOp::DirentryRemove(d) => {
            delete_key(txn, tables::DIRENTRIES, &format!("{}:{}", d.dir_ino, d.name))
        }

        JournalOp::SymlinkAdd(s) => {
            let mut table = txn.open_table(tables::SYMLINKS)?;
            table.insert(s.ino, s.source_path.as_str())?;
            Ok(())
        }
        JournalOp::SymlinkRemove(r) => {
            let mut table = txn.open_table(tables::SYMLINKS)?;
            table.remove(r.ino)?;
            Ok(())
        }

        JournalOp::XattrAdd(x) | JournalOp::XattrModify(x) => {
            let mut table = txn.open_table(tables::XATTRS)?;
            table.insert(xattr_key(x).as_str(), x.value.as_slice())?;
            Ok(())
        }
        JournalOp::XattrRemove(x) => {
            let mut table = txn.open_table(tables::XATTRS)?;
            table.remove(xattr_key(x).as_str())?;
            Ok(())
        }
        JournalOp::XattrRemoveAll(x) => {
            delete_keys_with_prefix(txn, tables::XATTRS, &format!("{}:", x.ino))
        }

        JournalOp::QuotaAdd(q) | JournalOp::QuotaModify(q) => {
            let table_def = if q.is_group {
                tables::GROUP_QUOTAS
            } else {
                tables::USER_QUOTAS
            };
            put_bincode(txn, table_def, &q.name, &q.quota)
        }
        JournalOp::QuotaRemove(q) => {
            let table_def = if q.is_group {
                tables::GROUP_QUOTAS
            } else {
                tables::USER_QUOTAS
            };
            delete_key(txn, table_def, &q.name)
        }

        JournalOp::MdhostAdd(info) => put_bincode(txn, tables::MDHOSTS, &info.name, info),
        JournalOp::MdhostModify(arg) => {
            put_bincode(txn, tables::MDHOSTS, &arg.info.name, &arg.info)
        }
        JournalOp::MdhostRemove(name) => delete_key(txn, tables::MDHOSTS, name),
    }
}
