//! nsmeta Namespace - in-memory metadata state
//!
//! This crate provides:
//! - An order-statistics directory tree for O(log n) positional listing
//! - A generation-counted inode table with free-list recycling
//! - Host, user, group, quota and metadata-host tables
//! - [`Namespace`], the state behind the giant lock that the apply engine
//!   and foreground requests mutate

pub mod dir;
pub mod entities;
pub mod error;
pub mod inode;
pub mod namespace;

pub use dir::{DirCursor, DirEntry, DirTree};
pub use entities::{Entities, Host};
pub use error::{NamespaceError, NsResult};
pub use inode::{Checksum, FileState, Inode, InodeKind, InodeTable, ReplicaRecord};
pub use namespace::{Namespace, NamespaceHandle};
