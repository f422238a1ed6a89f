//! Inode table
//!
//! A sparse table indexed by inode number. Slots are never shrunk; a freed
//! slot keeps its generation and goes onto a free list, and the next
//! allocation of that slot bumps the generation so stale references to the
//! previous occupant can be told apart.

use crate::dir::DirTree;
use crate::error::{NamespaceError, NsResult};
use nsmeta_common::{InodeNumber, ROOT_INUMBER, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, Timespec};
use nsmeta_journal::ops::InodeStat;
use std::collections::BTreeMap;
use tracing::debug;

/// Initial number of slots
pub const INODE_TABLE_SIZE_INITIAL: usize = 1000;

/// Growth factor applied when a number falls outside the table
const INODE_TABLE_SIZE_MULTIPLY: usize = 2;

/// Highest inode number the table grows to hold
pub const INODE_NUMBER_MAX: InodeNumber = (1 << 28) - 1;

/// Mode of a slot that is not in use
pub const INODE_MODE_FREE: u32 = 0;

/// Where one copy of a file lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaRecord {
    pub inode_number: InodeNumber,
    /// Generation of the inode the replica was created for
    pub generation: u64,
    pub host: String,
    /// False while the copy is still being created
    pub valid: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checksum {
    pub cksum_type: String,
    pub sum: Vec<u8>,
}

/// Regular file state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileState {
    pub replicas: Vec<ReplicaRecord>,
    pub checksum: Option<Checksum>,
    /// Opened descriptors; a file with openers cannot be freed
    pub open_count: u32,
}

impl FileState {
    #[must_use]
    pub fn replica(&self, host: &str) -> Option<&ReplicaRecord> {
        self.replicas.iter().find(|r| r.host == host)
    }

    pub fn replica_mut(&mut self, host: &str) -> Option<&mut ReplicaRecord> {
        self.replicas.iter_mut().find(|r| r.host == host)
    }
}

/// Type-specific inode state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InodeKind {
    /// Free slot, or a type this table keeps no state for
    #[default]
    Empty,
    File(FileState),
    Dir(DirTree),
    Symlink(String),
}

impl InodeKind {
    /// Fresh state for the file type encoded in `mode`
    #[must_use]
    pub fn for_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::File(FileState::default()),
            S_IFDIR => Self::Dir(DirTree::new()),
            S_IFLNK => Self::Symlink(String::new()),
            _ => Self::Empty,
        }
    }
}

/// Extended attribute key: (XML attribute, name)
pub type XattrKey = (bool, String);

/// One namespace object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inode {
    pub number: InodeNumber,
    pub generation: u64,
    pub nlink: u64,
    pub size: u64,
    mode: u32,
    pub user: String,
    pub group: String,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub kind: InodeKind,
    pub xattrs: BTreeMap<XattrKey, Vec<u8>>,
}

impl Inode {
    fn free_slot(number: InodeNumber) -> Self {
        Self {
            number,
            generation: 0,
            nlink: 0,
            size: 0,
            mode: INODE_MODE_FREE,
            user: String::new(),
            group: String::new(),
            atime: Timespec::default(),
            mtime: Timespec::default(),
            ctime: Timespec::default(),
            kind: InodeKind::Empty,
            xattrs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> u32 {
        self.mode
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.mode == INODE_MODE_FREE
    }

    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.kind, InodeKind::Dir(_))
    }

    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self.kind, InodeKind::File(_))
    }

    #[must_use]
    pub const fn is_symlink(&self) -> bool {
        matches!(self.kind, InodeKind::Symlink(_))
    }

    /// Change the mode. Type-specific state is reset only when the file
    /// type bits change.
    pub fn set_mode(&mut self, mode: u32) {
        if mode & S_IFMT != self.mode & S_IFMT || self.is_free() {
            self.kind = InodeKind::for_mode(mode);
        }
        self.mode = mode;
    }

    #[must_use]
    pub const fn dir(&self) -> Option<&DirTree> {
        match &self.kind {
            InodeKind::Dir(d) => Some(d),
            _ => None,
        }
    }

    pub const fn dir_mut(&mut self) -> Option<&mut DirTree> {
        match &mut self.kind {
            InodeKind::Dir(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub const fn file(&self) -> Option<&FileState> {
        match &self.kind {
            InodeKind::File(f) => Some(f),
            _ => None,
        }
    }

    pub const fn file_mut(&mut self) -> Option<&mut FileState> {
        match &mut self.kind {
            InodeKind::File(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn symlink(&self) -> Option<&str> {
        match &self.kind {
            InodeKind::Symlink(s) => Some(s),
            _ => None,
        }
    }

    /// Overwrite attributes from a stat record
    pub fn set_stat(&mut self, st: &InodeStat) {
        self.generation = st.generation;
        self.nlink = st.nlink;
        self.size = st.size;
        self.set_mode(st.mode);
        self.user.clone_from(&st.user);
        self.group.clone_from(&st.group);
        self.atime = st.atime;
        self.mtime = st.mtime;
        self.ctime = st.ctime;
    }

    #[must_use]
    pub fn stat(&self) -> InodeStat {
        InodeStat {
            ino: self.number,
            generation: self.generation,
            nlink: self.nlink,
            size: self.size,
            mode: self.mode,
            user: self.user.clone(),
            group: self.group.clone(),
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}

/// Inode table with free-list recycling
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InodeTable {
    /// `None` for never-allocated slots
    slots: Vec<Option<Inode>>,
    /// Freed numbers, most recent last. Entries whose slot was since
    /// reallocated by number are skipped when popped.
    free_list: Vec<InodeNumber>,
    /// Lowest never-allocated number
    free_index: InodeNumber,
    in_use: usize,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn slot_index(number: InodeNumber) -> usize {
    number as usize
}

impl InodeTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![None; INODE_TABLE_SIZE_INITIAL],
            free_list: Vec::new(),
            free_index: ROOT_INUMBER,
            in_use: 0,
        }
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of inodes in use
    #[must_use]
    pub const fn len(&self) -> usize {
        self.in_use
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    fn grow_for(&mut self, index: usize) {
        if index < self.slots.len() {
            return;
        }
        let doubled = self.slots.len().saturating_mul(INODE_TABLE_SIZE_MULTIPLY);
        let new_size = if index < doubled {
            doubled
        } else {
            index.saturating_mul(INODE_TABLE_SIZE_MULTIPLY)
        }
        .min(slot_index(INODE_NUMBER_MAX) + 1);
        debug!("inode table: growing {} -> {} slots", self.slots.len(), new_size);
        self.slots.resize(new_size, None);
    }

    fn pick_free_number(&mut self) -> InodeNumber {
        while let Some(n) = self.free_list.pop() {
            if matches!(&self.slots[slot_index(n)], Some(i) if i.is_free()) {
                return n;
            }
        }
        let mut n = self.free_index;
        while self
            .slots
            .get(slot_index(n))
            .is_some_and(Option::is_some)
        {
            n += 1;
        }
        n
    }

    /// Allocate an inode with `mode`, either at `requested` or at any
    /// free number. A recycled slot gets the next generation; a fresh slot
    /// starts at generation 0.
    pub fn alloc(&mut self, requested: Option<InodeNumber>, mode: u32) -> NsResult<&mut Inode> {
        if mode == INODE_MODE_FREE {
            return Err(NamespaceError::invalid_argument("inode mode 0 is reserved"));
        }
        let number = match requested {
            Some(n) if n < ROOT_INUMBER => {
                return Err(NamespaceError::invalid_argument(format!(
                    "inode number {n} is reserved"
                )));
            }
            Some(n) => n,
            None => self.pick_free_number(),
        };
        if number > INODE_NUMBER_MAX {
            return Err(NamespaceError::invalid_argument(format!(
                "inode number {number} exceeds {INODE_NUMBER_MAX}"
            )));
        }
        let index = slot_index(number);
        self.grow_for(index);

        if self.slots[index].as_ref().is_some_and(|i| !i.is_free()) {
            return Err(NamespaceError::already_exists(format!("inode {number}")));
        }
        if number == self.free_index {
            self.free_index += 1;
        }
        self.in_use += 1;

        let slot = &mut self.slots[index];
        if let Some(recycled) = slot.as_mut() {
            recycled.generation += 1;
        }
        let inode = slot.get_or_insert_with(|| Inode::free_slot(number));
        inode.set_mode(mode);
        Ok(inode)
    }

    /// Release `number` back to the free list. Refused while the file is
    /// open.
    pub fn free(&mut self, number: InodeNumber) -> NsResult<()> {
        let inode = self
            .get_mut(number)
            .ok_or_else(|| NamespaceError::no_such_object(format!("inode {number}")))?;
        if inode.file().is_some_and(|f| f.open_count > 0) {
            return Err(NamespaceError::Busy(number));
        }
        inode.mode = INODE_MODE_FREE;
        inode.nlink = 0;
        inode.size = 0;
        inode.kind = InodeKind::Empty;
        inode.xattrs.clear();
        self.free_list.push(number);
        self.in_use -= 1;
        Ok(())
    }

    /// `None` for never-allocated and free numbers alike
    #[must_use]
    pub fn get(&self, number: InodeNumber) -> Option<&Inode> {
        self.slots
            .get(slot_index(number))?
            .as_ref()
            .filter(|i| !i.is_free())
    }

    pub fn get_mut(&mut self, number: InodeNumber) -> Option<&mut Inode> {
        self.slots
            .get_mut(slot_index(number))?
            .as_mut()
            .filter(|i| !i.is_free())
    }

    /// Generation of the slot, free or not; `None` if never allocated
    #[must_use]
    pub fn generation(&self, number: InodeNumber) -> Option<u64> {
        self.slots
            .get(slot_index(number))?
            .as_ref()
            .map(|i| i.generation)
    }

    /// Inodes in use, by number
    pub fn iter(&self) -> impl Iterator<Item = &Inode> {
        self.slots.iter().flatten().filter(|i| !i.is_free())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: u32 = S_IFREG | 0o644;
    const DIR: u32 = S_IFDIR | 0o755;

    #[test]
    fn test_alloc_fresh_numbers() {
        let mut table = InodeTable::new();
        let a = table.alloc(None, DIR).unwrap().number;
        let b = table.alloc(None, FILE).unwrap().number;
        assert_eq!((a, b), (ROOT_INUMBER, ROOT_INUMBER + 1));
        assert_eq!(table.get(b).unwrap().generation, 0);
        assert!(table.get(a).unwrap().is_dir());
        assert!(table.get(b).unwrap().is_file());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_reserved_numbers_rejected() {
        let mut table = InodeTable::new();
        for n in [0, 1] {
            assert!(matches!(
                table.alloc(Some(n), FILE),
                Err(NamespaceError::InvalidArgument(_))
            ));
        }
        assert!(matches!(
            table.alloc(None, INODE_MODE_FREE),
            Err(NamespaceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_out_of_range_number_rejected() {
        let mut table = InodeTable::new();
        for n in [u64::MAX / 2, u64::MAX, INODE_NUMBER_MAX + 1] {
            assert!(matches!(
                table.alloc(Some(n), FILE),
                Err(NamespaceError::InvalidArgument(_))
            ));
        }
        assert_eq!(table.capacity(), INODE_TABLE_SIZE_INITIAL);
        assert!(table.is_empty());
        assert!(table.get(u64::MAX / 2).is_none());
    }

    #[test]
    fn test_free_and_recycle_bumps_generation() {
        let mut table = InodeTable::new();
        let n = table.alloc(None, FILE).unwrap().number;
        table.alloc(None, FILE).unwrap();
        table.free(n).unwrap();
        assert!(table.get(n).is_none());
        assert_eq!(table.generation(n), Some(0));
        assert_eq!(table.len(), 1);

        let again = table.alloc(None, DIR).unwrap();
        assert_eq!(again.number, n);
        assert_eq!(again.generation, 1);
        assert!(again.is_dir());

        assert!(matches!(
            table.free(999),
            Err(NamespaceError::NoSuchObject(_))
        ));
    }

    #[test]
    fn test_alloc_by_number() {
        let mut table = InodeTable::new();
        table.alloc(Some(10), FILE).unwrap();
        assert!(matches!(
            table.alloc(Some(10), FILE),
            Err(NamespaceError::AlreadyExists(_))
        ));

        // a free-listed slot taken by number is skipped later
        table.free(10).unwrap();
        assert_eq!(table.alloc(Some(10), FILE).unwrap().generation, 1);
        assert_eq!(table.alloc(None, FILE).unwrap().number, ROOT_INUMBER);
        assert_eq!(table.alloc(None, FILE).unwrap().number, 3);
    }

    #[test]
    fn test_growth() {
        let mut table = InodeTable::new();
        assert_eq!(table.capacity(), INODE_TABLE_SIZE_INITIAL);
        table.alloc(Some(1500), FILE).unwrap();
        assert_eq!(table.capacity(), 2000);
        table.alloc(Some(9000), FILE).unwrap();
        assert_eq!(table.capacity(), 18000);
        assert!(table.get(5000).is_none());
        assert_eq!(table.iter().map(|i| i.number).collect::<Vec<_>>(), vec![1500, 9000]);
    }

    #[test]
    fn test_open_file_cannot_be_freed() {
        let mut table = InodeTable::new();
        let inode = table.alloc(None, FILE).unwrap();
        let n = inode.number;
        inode.file_mut().unwrap().open_count = 1;
        assert_eq!(table.free(n), Err(NamespaceError::Busy(n)));
        table.get_mut(n).unwrap().file_mut().unwrap().open_count = 0;
        table.free(n).unwrap();
    }

    #[test]
    fn test_mode_change_resets_kind() {
        let mut table = InodeTable::new();
        let inode = table.alloc(None, FILE).unwrap();
        inode.file_mut().unwrap().checksum = Some(Checksum {
            cksum_type: "md5".into(),
            sum: vec![1, 2],
        });
        inode.set_mode(FILE | 0o700);
        assert!(inode.file().unwrap().checksum.is_some());
        inode.set_mode(S_IFLNK | 0o777);
        assert_eq!(inode.symlink(), Some(""));
    }
}
