//! The in-memory namespace
//!
//! Every journal operation that changes state has a mutator here. Mutators
//! check the current state first and fail with a [`NamespaceError`] instead
//! of applying twice, so replaying the tail of the log is harmless.

use crate::dir::DirTree;
use crate::entities::Entities;
use crate::error::{NamespaceError, NsResult};
use crate::inode::{Checksum, Inode, InodeKind, InodeTable, ReplicaRecord};
use nsmeta_common::{InodeNumber, ROOT_INUMBER, S_IFDIR, S_IFREG};
use nsmeta_journal::ops::{InodeCksum, InodeStat, XattrArg};
use parking_lot::Mutex;
use std::sync::Arc;

/// The giant lock: all namespace mutation happens under it
pub type NamespaceHandle = Arc<Mutex<Namespace>>;

/// Mode given to an inode that a field-level modify brings into existence
const PLACEHOLDER_MODE: u32 = S_IFREG;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    inodes: InodeTable,
    entities: Entities,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    /// An empty namespace holding only the root directory
    #[must_use]
    pub fn new() -> Self {
        let mut inodes = InodeTable::new();
        if let Ok(root) = inodes.alloc(Some(ROOT_INUMBER), S_IFDIR | 0o755) {
            root.nlink = 2;
            if let Some(dir) = root.dir_mut() {
                dir.insert(".", ROOT_INUMBER);
                dir.insert("..", ROOT_INUMBER);
            }
        }
        Self {
            inodes,
            entities: Entities::default(),
        }
    }

    #[must_use]
    pub fn into_handle(self) -> NamespaceHandle {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub const fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub const fn inodes_mut(&mut self) -> &mut InodeTable {
        &mut self.inodes
    }

    #[must_use]
    pub const fn entities(&self) -> &Entities {
        &self.entities
    }

    pub const fn entities_mut(&mut self) -> &mut Entities {
        &mut self.entities
    }

    #[must_use]
    pub fn inode(&self, ino: InodeNumber) -> Option<&Inode> {
        self.inodes.get(ino)
    }

    /// Directory contents of `ino`
    pub fn dir(&self, ino: InodeNumber) -> NsResult<&DirTree> {
        let inode = self
            .inodes
            .get(ino)
            .ok_or_else(|| NamespaceError::NoSuchFileOrDirectory(format!("inode {ino}")))?;
        inode.dir().ok_or(NamespaceError::NotADirectory(ino))
    }

    fn dir_mut(&mut self, ino: InodeNumber) -> NsResult<&mut DirTree> {
        let inode = self
            .inodes
            .get_mut(ino)
            .ok_or_else(|| NamespaceError::NoSuchFileOrDirectory(format!("inode {ino}")))?;
        inode.dir_mut().ok_or(NamespaceError::NotADirectory(ino))
    }

    /// Resolve a slash-separated path from the root
    #[must_use]
    pub fn lookup_path(&self, path: &str) -> Option<InodeNumber> {
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(ROOT_INUMBER, |ino, name| {
                self.dir(ino).ok()?.lookup(name).map(|e| e.inode)
            })
    }

    /// The inode `ino`, allocating it if the log refers to a number this
    /// namespace has not seen yet
    fn inode_or_alloc(&mut self, ino: InodeNumber) -> NsResult<&mut Inode> {
        if self.inodes.get(ino).is_none() {
            self.inodes.alloc(Some(ino), PLACEHOLDER_MODE)?;
        }
        self.inodes
            .get_mut(ino)
            .ok_or_else(|| NamespaceError::no_such_object(format!("inode {ino}")))
    }

    /// Apply `f` to inode `ino`, allocating it first if needed
    pub fn modify_inode(&mut self, ino: InodeNumber, f: impl FnOnce(&mut Inode)) -> NsResult<()> {
        f(self.inode_or_alloc(ino)?);
        Ok(())
    }

    pub fn inode_add(&mut self, st: &InodeStat) -> NsResult<()> {
        if self.inodes.get(st.ino).is_some() {
            return Err(NamespaceError::already_exists(format!("inode {}", st.ino)));
        }
        self.inode_modify(st)
    }

    /// Add or overwrite
    pub fn inode_modify(&mut self, st: &InodeStat) -> NsResult<()> {
        if st.mode == crate::inode::INODE_MODE_FREE {
            return Err(NamespaceError::invalid_argument(format!(
                "inode {} with mode 0",
                st.ino
            )));
        }
        if self.inodes.get(st.ino).is_none() {
            self.inodes.alloc(Some(st.ino), st.mode)?;
        }
        self.modify_inode(st.ino, |inode| inode.set_stat(st))
    }

    /// Release an unlinked inode
    pub fn inode_free(&mut self, ino: InodeNumber) -> NsResult<()> {
        self.inodes.free(ino)
    }

    pub fn cksum_set(&mut self, arg: &InodeCksum) -> NsResult<()> {
        let file = self
            .inode_or_alloc(arg.ino)?
            .file_mut()
            .ok_or_else(|| NamespaceError::invalid_argument(format!("inode {} is not a file", arg.ino)))?;
        file.checksum = Some(Checksum {
            cksum_type: arg.cksum_type.clone(),
            sum: arg.sum.clone(),
        });
        Ok(())
    }

    pub fn cksum_remove(&mut self, ino: InodeNumber) -> NsResult<()> {
        if let Some(file) = self.inode_or_alloc(ino)?.file_mut() {
            file.checksum = None;
        }
        Ok(())
    }

    /// Record a copy of `ino` on `hostname`. `valid = false` marks a copy
    /// still in flight.
    pub fn replica_add(&mut self, ino: InodeNumber, hostname: &str, valid: bool) -> NsResult<()> {
        if self.entities.host(hostname).is_none() {
            return Err(NamespaceError::no_such_object(format!("host {hostname}")));
        }
        let inode = self.inode_or_alloc(ino)?;
        let generation = inode.generation;
        let file = inode
            .file_mut()
            .ok_or_else(|| NamespaceError::invalid_argument(format!("inode {ino} is not a file")))?;
        if file.replica(hostname).is_some() {
            return Err(NamespaceError::already_exists(format!(
                "replica of inode {ino} on {hostname}"
            )));
        }
        file.replicas.push(ReplicaRecord {
            inode_number: ino,
            generation,
            host: hostname.to_string(),
            valid,
        });
        Ok(())
    }

    /// Confirm an in-flight copy. A notification naming another generation
    /// of the inode is stale and rejected.
    pub fn replica_validate(
        &mut self,
        ino: InodeNumber,
        generation: u64,
        hostname: &str,
    ) -> NsResult<()> {
        let stale = || {
            NamespaceError::no_such_object(format!(
                "replica of inode {ino} generation {generation} on {hostname}"
            ))
        };
        let inode = self.inodes.get_mut(ino).ok_or_else(stale)?;
        if inode.generation != generation {
            return Err(stale());
        }
        let replica = inode
            .file_mut()
            .and_then(|f| f.replica_mut(hostname))
            .ok_or_else(stale)?;
        replica.valid = true;
        Ok(())
    }

    pub fn replica_remove(&mut self, ino: InodeNumber, hostname: &str) -> NsResult<()> {
        if self.entities.host(hostname).is_none() {
            return Err(NamespaceError::no_such_object(format!("host {hostname}")));
        }
        let missing = || NamespaceError::no_such_object(format!("replica of inode {ino} on {hostname}"));
        let file = self.inode_or_alloc(ino)?.file_mut().ok_or_else(missing)?;
        let before = file.replicas.len();
        file.replicas.retain(|r| r.host != hostname);
        if file.replicas.len() == before {
            return Err(missing());
        }
        Ok(())
    }

    pub fn direntry_add(&mut self, dir: InodeNumber, name: &str, entry: InodeNumber) -> NsResult<()> {
        let (_, created) = self.dir_mut(dir)?.insert(name, entry);
        if !created {
            return Err(NamespaceError::already_exists(format!(
                "entry {name} in directory {dir}"
            )));
        }
        Ok(())
    }

    pub fn direntry_remove(&mut self, dir: InodeNumber, name: &str) -> NsResult<()> {
        let tree = self
            .dir_mut(dir)
            .map_err(|_| NamespaceError::NoSuchFileOrDirectory(format!("directory {dir}")))?;
        if !tree.remove(name) {
            return Err(NamespaceError::NoSuchFileOrDirectory(format!(
                "entry {name} in directory {dir}"
            )));
        }
        Ok(())
    }

    pub fn symlink_set(&mut self, ino: InodeNumber, target: &str) -> NsResult<()> {
        self.modify_inode(ino, |inode| {
            inode.kind = InodeKind::Symlink(target.to_string());
        })
    }

    pub fn symlink_clear(&mut self, ino: InodeNumber) -> NsResult<()> {
        self.modify_inode(ino, |inode| {
            if let InodeKind::Symlink(target) = &mut inode.kind {
                target.clear();
            }
        })
    }

    pub fn xattr_add(&mut self, arg: &XattrArg) -> NsResult<()> {
        let inode = self.inode_or_alloc(arg.ino)?;
        let key = (arg.xml_mode, arg.attrname.clone());
        if inode.xattrs.contains_key(&key) {
            return Err(NamespaceError::already_exists(format!(
                "xattr {} of inode {}",
                arg.attrname, arg.ino
            )));
        }
        inode.xattrs.insert(key, arg.value.clone());
        Ok(())
    }

    pub fn xattr_modify(&mut self, arg: &XattrArg) -> NsResult<()> {
        let inode = self.inode_or_alloc(arg.ino)?;
        let value = inode
            .xattrs
            .get_mut(&(arg.xml_mode, arg.attrname.clone()))
            .ok_or_else(|| {
                NamespaceError::no_such_object(format!("xattr {} of inode {}", arg.attrname, arg.ino))
            })?;
        value.clone_from(&arg.value);
        Ok(())
    }

    pub fn xattr_remove(&mut self, arg: &XattrArg) -> NsResult<()> {
        let inode = self.inode_or_alloc(arg.ino)?;
        inode
            .xattrs
            .remove(&(arg.xml_mode, arg.attrname.clone()))
            .map(|_| ())
            .ok_or_else(|| {
                NamespaceError::no_such_object(format!("xattr {} of inode {}", arg.attrname, arg.ino))
            })
    }

    pub fn xattr_remove_all(&mut self, ino: InodeNumber) -> NsResult<()> {
        self.modify_inode(ino, |inode| inode.xattrs.clear())
    }
}
