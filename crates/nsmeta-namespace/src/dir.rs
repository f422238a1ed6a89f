//! Order-statistics directory tree
//!
//! An AVL tree keyed by entry name and augmented with subtree sizes, so the
//! Nth entry of a directory can be found in O(log n) for paginated listing.
//! Nodes live in an arena and link to each other by index; rotations and
//! removals relink nodes instead of moving entries between them.

use nsmeta_common::InodeNumber;
use std::cmp::Ordering;

type NodeId = usize;

/// One name in a directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode: InodeNumber,
}

#[derive(Clone, Debug)]
struct Node {
    entry: DirEntry,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: u32,
    /// 1 + size(left) + size(right)
    size: usize,
}

/// Entries of one directory ordered by name (byte-lexicographic)
#[derive(Clone, Debug, Default)]
pub struct DirTree {
    nodes: Vec<Node>,
    /// Arena slots released by `remove`
    free: Vec<NodeId>,
    root: Option<NodeId>,
}

impl PartialEq for DirTree {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for DirTree {}

impl DirTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, "." and ".." included
    #[must_use]
    pub fn len(&self) -> usize {
        self.size(self.root)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn size(&self, id: Option<NodeId>) -> usize {
        id.map_or(0, |i| self.nodes[i].size)
    }

    fn height(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |i| self.nodes[i].height)
    }

    fn alloc(&mut self, entry: DirEntry) -> NodeId {
        let node = Node {
            entry,
            left: None,
            right: None,
            height: 1,
            size: 1,
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id] = node;
            id
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        node.entry.name = String::new();
        node.left = None;
        node.right = None;
        self.free.push(id);
    }

    fn update(&mut self, id: NodeId) {
        let (left, right) = (self.nodes[id].left, self.nodes[id].right);
        let height = 1 + self.height(left).max(self.height(right));
        let size = 1 + self.size(left) + self.size(right);
        let node = &mut self.nodes[id];
        node.height = height;
        node.size = size;
    }

    fn balance_factor(&self, id: NodeId) -> i64 {
        i64::from(self.height(self.nodes[id].left)) - i64::from(self.height(self.nodes[id].right))
    }

    fn rotate_right(&mut self, id: NodeId) -> NodeId {
        let Some(pivot) = self.nodes[id].left else {
            return id;
        };
        self.nodes[id].left = self.nodes[pivot].right;
        self.nodes[pivot].right = Some(id);
        self.update(id);
        self.update(pivot);
        pivot
    }

    fn rotate_left(&mut self, id: NodeId) -> NodeId {
        let Some(pivot) = self.nodes[id].right else {
            return id;
        };
        self.nodes[id].right = self.nodes[pivot].left;
        self.nodes[pivot].left = Some(id);
        self.update(id);
        self.update(pivot);
        pivot
    }

    /// Recompute `id` and restore the AVL property; returns the new
    /// subtree root.
    fn rebalance(&mut self, id: NodeId) -> NodeId {
        self.update(id);
        let bf = self.balance_factor(id);
        if bf > 1 {
            if let Some(left) = self.nodes[id].left {
                if self.balance_factor(left) < 0 {
                    let new_left = self.rotate_left(left);
                    self.nodes[id].left = Some(new_left);
                }
            }
            return self.rotate_right(id);
        }
        if bf < -1 {
            if let Some(right) = self.nodes[id].right {
                if self.balance_factor(right) > 0 {
                    let new_right = self.rotate_right(right);
                    self.nodes[id].right = Some(new_right);
                }
            }
            return self.rotate_left(id);
        }
        id
    }

    fn find(&self, name: &str) -> Option<NodeId> {
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            cur = match name.cmp(node.entry.name.as_str()) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Some(id),
            };
        }
        None
    }

    /// Insert `name`, returning the entry now stored under it and whether
    /// it was created. An existing entry is left untouched.
    pub fn insert(&mut self, name: &str, inode: InodeNumber) -> (&DirEntry, bool) {
        let mut found = None;
        let root = self.insert_at(self.root, name, inode, &mut found);
        self.root = Some(root);
        // insert_at always reports the node it stopped at
        let (id, created) = found.unwrap_or((root, false));
        (&self.nodes[id].entry, created)
    }

    fn insert_at(
        &mut self,
        at: Option<NodeId>,
        name: &str,
        inode: InodeNumber,
        found: &mut Option<(NodeId, bool)>,
    ) -> NodeId {
        let Some(id) = at else {
            let id = self.alloc(DirEntry {
                name: name.to_string(),
                inode,
            });
            *found = Some((id, true));
            return id;
        };
        match name.cmp(self.nodes[id].entry.name.as_str()) {
            Ordering::Equal => {
                *found = Some((id, false));
                id
            }
            Ordering::Less => {
                let left = self.insert_at(self.nodes[id].left, name, inode, found);
                self.nodes[id].left = Some(left);
                self.rebalance(id)
            }
            Ordering::Greater => {
                let right = self.insert_at(self.nodes[id].right, name, inode, found);
                self.nodes[id].right = Some(right);
                self.rebalance(id)
            }
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&DirEntry> {
        self.find(name).map(|id| &self.nodes[id].entry)
    }

    /// Remove `name`; false if it was not present
    pub fn remove(&mut self, name: &str) -> bool {
        let mut removed = None;
        self.root = self.remove_at(self.root, name, &mut removed);
        match removed {
            Some(id) => {
                self.release(id);
                true
            }
            None => false,
        }
    }

    fn remove_at(
        &mut self,
        at: Option<NodeId>,
        name: &str,
        removed: &mut Option<NodeId>,
    ) -> Option<NodeId> {
        let id = at?;
        match name.cmp(self.nodes[id].entry.name.as_str()) {
            Ordering::Less => {
                let left = self.remove_at(self.nodes[id].left, name, removed);
                self.nodes[id].left = left;
                Some(self.rebalance(id))
            }
            Ordering::Greater => {
                let right = self.remove_at(self.nodes[id].right, name, removed);
                self.nodes[id].right = right;
                Some(self.rebalance(id))
            }
            Ordering::Equal => {
                *removed = Some(id);
                match (self.nodes[id].left, self.nodes[id].right) {
                    (None, child) | (child, None) => child,
                    (Some(left), Some(right)) => {
                        // the in-order successor takes the removed node's place
                        let (rest, succ) = self.detach_min(right);
                        self.nodes[succ].left = Some(left);
                        self.nodes[succ].right = rest;
                        Some(self.rebalance(succ))
                    }
                }
            }
        }
    }

    /// Unlink the leftmost node under `id`; returns the remaining subtree
    /// and the detached node.
    fn detach_min(&mut self, id: NodeId) -> (Option<NodeId>, NodeId) {
        match self.nodes[id].left {
            None => (self.nodes[id].right, id),
            Some(left) => {
                let (rest, min) = self.detach_min(left);
                self.nodes[id].left = rest;
                (Some(self.rebalance(id)), min)
            }
        }
    }

    /// The entry at ordinal `pos` (0-based, name order)
    #[must_use]
    pub fn entry_at_position(&self, pos: usize) -> Option<&DirEntry> {
        let mut cur = self.root;
        let mut pos = pos;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            let left = self.size(node.left);
            match pos.cmp(&left) {
                Ordering::Less => cur = node.left,
                Ordering::Equal => return Some(&node.entry),
                Ordering::Greater => {
                    pos -= left + 1;
                    cur = node.right;
                }
            }
        }
        None
    }

    /// Number of entries ordered before `name`, whether or not `name`
    /// itself is present
    #[must_use]
    pub fn rank(&self, name: &str) -> usize {
        let mut cur = self.root;
        let mut rank = 0;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            match name.cmp(node.entry.name.as_str()) {
                Ordering::Less => cur = node.left,
                Ordering::Equal => return rank + self.size(node.left),
                Ordering::Greater => {
                    rank += self.size(node.left) + 1;
                    cur = node.right;
                }
            }
        }
        rank
    }

    /// Ordinal of `name`, if present
    #[must_use]
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.find(name).map(|_| self.rank(name))
    }

    /// Smallest entry with a name `>= name` (`> name` when not inclusive)
    fn successor(&self, name: &str, inclusive: bool) -> Option<&DirEntry> {
        let mut cur = self.root;
        let mut best = None;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            match name.cmp(node.entry.name.as_str()) {
                Ordering::Less => {
                    best = Some(&node.entry);
                    cur = node.left;
                }
                Ordering::Equal if inclusive => return Some(&node.entry),
                Ordering::Equal | Ordering::Greater => cur = node.right,
            }
        }
        best
    }

    /// In-order successor of `name`; `name` need not be present
    #[must_use]
    pub fn next(&self, name: &str) -> Option<&DirEntry> {
        self.successor(name, false)
    }

    /// First entry whose name is not less than `name`
    #[must_use]
    pub fn lower_bound(&self, name: &str) -> Option<&DirEntry> {
        self.successor(name, true)
    }

    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        let mut iter = Iter {
            tree: self,
            stack: Vec::new(),
        };
        iter.push_left(self.root);
        iter
    }

    /// Cursor on the entry at ordinal `pos`, or past the end
    #[must_use]
    pub fn cursor_at(&self, pos: usize) -> DirCursor {
        DirCursor {
            current: self.entry_at_position(pos).map(|e| e.name.clone()),
        }
    }

    /// Cursor on `name`, if present
    #[must_use]
    pub fn cursor_lookup(&self, name: &str) -> Option<DirCursor> {
        self.lookup(name).map(|e| DirCursor {
            current: Some(e.name.clone()),
        })
    }

    /// Entry under the cursor. If the entry the cursor was placed on has
    /// been removed, this is the entry that followed it.
    #[must_use]
    pub fn cursor_entry(&self, cursor: &DirCursor) -> Option<&DirEntry> {
        cursor
            .current
            .as_deref()
            .and_then(|name| self.lower_bound(name))
    }

    /// Ordinal of the cursor; `len()` once past the end
    #[must_use]
    pub fn cursor_position(&self, cursor: &DirCursor) -> usize {
        cursor
            .current
            .as_deref()
            .map_or_else(|| self.len(), |name| self.rank(name))
    }

    /// Advance to the next entry; false once past the end
    pub fn cursor_next(&self, cursor: &mut DirCursor) -> bool {
        let next = self
            .cursor_entry(cursor)
            .and_then(|e| self.next(&e.name))
            .map(|e| e.name.clone());
        cursor.current = next;
        cursor.current.is_some()
    }

    /// Remove the entry under the cursor. The cursor then refers to the
    /// following entry.
    pub fn cursor_remove_entry(&mut self, cursor: &DirCursor) -> bool {
        match self.cursor_entry(cursor).map(|e| e.name.clone()) {
            Some(name) => self.remove(&name),
            None => false,
        }
    }
}

/// Logical position inside a [`DirTree`]
///
/// A cursor names an entry rather than an index, so removing entries
/// (including the one under the cursor) never invalidates it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirCursor {
    current: Option<String>,
}

impl DirCursor {
    #[must_use]
    pub const fn is_end(&self) -> bool {
        self.current.is_none()
    }
}

/// In-order iterator over a [`DirTree`]
pub struct Iter<'a> {
    tree: &'a DirTree,
    stack: Vec<NodeId>,
}

impl Iter<'_> {
    fn push_left(&mut self, mut cur: Option<NodeId>) {
        while let Some(id) = cur {
            self.stack.push(id);
            cur = self.tree.nodes[id].left;
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a DirEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.push_left(self.tree.nodes[id].right);
        Some(&self.tree.nodes[id].entry)
    }
}

impl<'a> IntoIterator for &'a DirTree {
    type Item = &'a DirEntry;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
