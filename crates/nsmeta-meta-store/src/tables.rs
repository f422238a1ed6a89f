//! Redb table definitions for the backing store.
//!
//! Composite keys are `:`-separated and always start with an inode number,
//! so the first `:` ends the number and later fields may contain `:`.

use redb::TableDefinition;

// Durable sequence number, single key
pub const SEQNUM: TableDefinition<&str, u64> = TableDefinition::new("seqnum");
pub const SEQNUM_KEY: &str = "seqnum";

// Entities (bincode, keyed by name)
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub const GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("groups");
pub const USER_QUOTAS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_quotas");
pub const GROUP_QUOTAS: TableDefinition<&str, &[u8]> = TableDefinition::new("group_quotas");
pub const MDHOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("mdhosts");

// Inodes (bincode, keyed by inode number)
pub const INODES: TableDefinition<u64, &[u8]> = TableDefinition::new("inodes");
pub const INODE_CKSUMS: TableDefinition<u64, &[u8]> = TableDefinition::new("inode_cksums");
pub const SYMLINKS: TableDefinition<u64, &str> = TableDefinition::new("symlinks");

// Key: "ino:hostname", Value: empty
pub const FILECOPIES: TableDefinition<&str, &[u8]> = TableDefinition::new("filecopies");
// Key: "ino:generation:hostname", Value: empty
pub const DEAD_FILECOPIES: TableDefinition<&str, &[u8]> = TableDefinition::new("dead_filecopies");
// Key: "dir_ino:name", Value: entry inode number
pub const DIRENTRIES: TableDefinition<&str, u64> = TableDefinition::new("direntries");
// Key: "ino:xml_mode:attrname" with xml_mode 0 or 1, Value: raw bytes
pub const XATTRS: TableDefinition<&str, &[u8]> = TableDefinition::new("xattrs");
