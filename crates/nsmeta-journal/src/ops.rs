//! Journal operation vocabulary
//!
//! Every namespace mutation that reaches the journal is one [`JournalOp`].
//! The numeric [`OperationTag`] values are part of the on-disk format and
//! must never be renumbered.

use crate::codec::{FieldSink, Payload, PayloadReader};
use bytes::BufMut;
use nsmeta_common::{Error, InodeNumber, Result, Timespec};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! operation_tags {
    ($($variant:ident = $value:literal => $name:literal,)*) => {
        /// Operation tag stored in every record header
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum OperationTag {
            $($variant = $value,)*
        }

        impl OperationTag {
            /// All tags in numeric order
            pub const ALL: &'static [Self] = &[$(Self::$variant,)*];

            /// Map a wire value back to a tag
            #[must_use]
            pub const fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// Name used in log messages
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }
        }
    };
}

operation_tags! {
    Begin = 1 => "BEGIN",
    End = 2 => "END",
    HostAdd = 3 => "HOST_ADD",
    HostModify = 4 => "HOST_MODIFY",
    HostRemove = 5 => "HOST_REMOVE",
    UserAdd = 6 => "USER_ADD",
    UserModify = 7 => "USER_MODIFY",
    UserRemove = 8 => "USER_REMOVE",
    GroupAdd = 9 => "GROUP_ADD",
    GroupModify = 10 => "GROUP_MODIFY",
    GroupRemove = 11 => "GROUP_REMOVE",
    InodeAdd = 12 => "INODE_ADD",
    InodeModify = 13 => "INODE_MODIFY",
    InodeGenModify = 14 => "INODE_GEN_MODIFY",
    InodeNlinkModify = 15 => "INODE_NLINK_MODIFY",
    InodeSizeModify = 16 => "INODE_SIZE_MODIFY",
    InodeModeModify = 17 => "INODE_MODE_MODIFY",
    InodeUserModify = 18 => "INODE_USER_MODIFY",
    InodeGroupModify = 19 => "INODE_GROUP_MODIFY",
    InodeAtimeModify = 20 => "INODE_ATIME_MODIFY",
    InodeMtimeModify = 21 => "INODE_MTIME_MODIFY",
    InodeCtimeModify = 22 => "INODE_CTIME_MODIFY",
    InodeCksumAdd = 23 => "INODE_CKSUM_ADD",
    InodeCksumModify = 24 => "INODE_CKSUM_MODIFY",
    InodeCksumRemove = 25 => "INODE_CKSUM_REMOVE",
    FilecopyAdd = 26 => "FILECOPY_ADD",
    FilecopyRemove = 27 => "FILECOPY_REMOVE",
    DeadFilecopyAdd = 28 => "DEADFILECOPY_ADD",
    DeadFilecopyRemove = 29 => "DEADFILECOPY_REMOVE",
    DirentryAdd = 30 => "DIRENTRY_ADD",
    DirentryRemove = 31 => "DIRENTRY_REMOVE",
    SymlinkAdd = 32 => "SYMLINK_ADD",
    SymlinkRemove = 33 => "SYMLINK_REMOVE",
    XattrAdd = 34 => "XATTR_ADD",
    XattrModify = 35 => "XATTR_MODIFY",
    XattrRemove = 36 => "XATTR_REMOVE",
    XattrRemoveAll = 37 => "XATTR_REMOVEALL",
    QuotaAdd = 38 => "QUOTA_ADD",
    QuotaModify = 39 => "QUOTA_MODIFY",
    QuotaRemove = 40 => "QUOTA_REMOVE",
    MdhostAdd = 41 => "MDHOST_ADD",
    MdhostModify = 42 => "MDHOST_MODIFY",
    MdhostRemove = 43 => "MDHOST_REMOVE",
    FsngroupModify = 44 => "FSNGROUP_MODIFY",
    Nop = 45 => "NOP",
}

impl OperationTag {
    /// Which backing store function handles this tag
    #[must_use]
    pub const fn action(self) -> OpAction {
        use OperationTag as T;
        match self {
            T::Begin => OpAction::Begin,
            T::End => OpAction::End,
            T::Nop => OpAction::Nop,
            T::HostAdd
            | T::UserAdd
            | T::GroupAdd
            | T::InodeAdd
            | T::InodeCksumAdd
            | T::FilecopyAdd
            | T::DeadFilecopyAdd
            | T::DirentryAdd
            | T::SymlinkAdd
            | T::XattrAdd
            | T::QuotaAdd
            | T::MdhostAdd => OpAction::Add,
            T::HostRemove
            | T::UserRemove
            | T::GroupRemove
            | T::InodeCksumRemove
            | T::FilecopyRemove
            | T::DeadFilecopyRemove
            | T::DirentryRemove
            | T::SymlinkRemove
            | T::XattrRemove
            | T::XattrRemoveAll
            | T::QuotaRemove
            | T::MdhostRemove => OpAction::Remove,
            _ => OpAction::Modify,
        }
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse kind of an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpAction {
    Begin,
    End,
    Add,
    Modify,
    Remove,
    Nop,
}

// Host

/// Filesystem node host
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub port: i32,
    pub architecture: String,
    pub ncpu: i32,
    pub flags: i32,
    pub aliases: Vec<String>,
}

impl Payload for HostInfo {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str(&self.hostname);
        sink.put_i32(self.port);
        sink.put_str(&self.architecture);
        sink.put_i32(self.ncpu);
        sink.put_i32(self.flags);
        sink.put_strs(&self.aliases);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            hostname: r.get_string()?,
            port: r.get_i32()?,
            architecture: r.get_string()?,
            ncpu: r.get_i32()?,
            flags: r.get_i32()?,
            aliases: r.get_strings()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostModify {
    pub info: HostInfo,
    pub modflags: i32,
    pub add_aliases: Vec<String>,
    pub del_aliases: Vec<String>,
}

impl Payload for HostModify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        self.info.walk(sink);
        sink.put_i32(self.modflags);
        sink.put_strs(&self.add_aliases);
        sink.put_strs(&self.del_aliases);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            info: HostInfo::read(r)?,
            modflags: r.get_i32()?,
            add_aliases: r.get_strings()?,
            del_aliases: r.get_strings()?,
        })
    }
}

// User / group

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub realname: String,
    pub homedir: String,
    pub gsi_dn: String,
}

impl Payload for UserInfo {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str(&self.username);
        sink.put_str(&self.realname);
        sink.put_str(&self.homedir);
        sink.put_str(&self.gsi_dn);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            username: r.get_string()?,
            realname: r.get_string()?,
            homedir: r.get_string()?,
            gsi_dn: r.get_string()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserModify {
    pub info: UserInfo,
    pub modflags: i32,
}

impl Payload for UserModify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        self.info.walk(sink);
        sink.put_i32(self.modflags);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            info: UserInfo::read(r)?,
            modflags: r.get_i32()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub groupname: String,
    pub usernames: Vec<String>,
}

impl Payload for GroupInfo {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str(&self.groupname);
        sink.put_strs(&self.usernames);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            groupname: r.get_string()?,
            usernames: r.get_strings()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupModify {
    pub info: GroupInfo,
    pub modflags: i32,
    pub add_users: Vec<String>,
    pub del_users: Vec<String>,
}

impl Payload for GroupModify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        self.info.walk(sink);
        sink.put_i32(self.modflags);
        sink.put_strs(&self.add_users);
        sink.put_strs(&self.del_users);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            info: GroupInfo::read(r)?,
            modflags: r.get_i32()?,
            add_users: r.get_strings()?,
            del_users: r.get_strings()?,
        })
    }
}

// Inode

/// Full inode attributes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeStat {
    pub ino: InodeNumber,
    pub generation: u64,
    pub nlink: u64,
    pub size: u64,
    pub mode: u32,
    pub user: String,
    pub group: String,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl Payload for InodeStat {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_u64(self.generation);
        sink.put_u64(self.nlink);
        sink.put_u64(self.size);
        sink.put_u32(self.mode);
        sink.put_str(&self.user);
        sink.put_str(&self.group);
        sink.put_time(&self.atime);
        sink.put_time(&self.mtime);
        sink.put_time(&self.ctime);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            generation: r.get_u64()?,
            nlink: r.get_u64()?,
            size: r.get_u64()?,
            mode: r.get_u32()?,
            user: r.get_string()?,
            group: r.get_string()?,
            atime: r.get_time()?,
            mtime: r.get_time()?,
            ctime: r.get_time()?,
        })
    }
}

/// Single 64-bit inode field update (generation, nlink, size)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeU64Modify {
    pub ino: InodeNumber,
    pub value: u64,
}

impl Payload for InodeU64Modify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_u64(self.value);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            value: r.get_u64()?,
        })
    }
}

/// Mode update
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeU32Modify {
    pub ino: InodeNumber,
    pub value: u32,
}

impl Payload for InodeU32Modify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_u32(self.value);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            value: r.get_u32()?,
        })
    }
}

/// Owner or group update
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeStringModify {
    pub ino: InodeNumber,
    pub value: String,
}

impl Payload for InodeStringModify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_str(&self.value);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            value: r.get_string()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeTimeModify {
    pub ino: InodeNumber,
    pub time: Timespec,
}

impl Payload for InodeTimeModify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_time(&self.time);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            time: r.get_time()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeCksum {
    pub ino: InodeNumber,
    pub cksum_type: String,
    pub sum: Vec<u8>,
}

impl Payload for InodeCksum {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_str(&self.cksum_type);
        sink.put_bytes(&self.sum);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            cksum_type: r.get_string()?,
            sum: r.get_bytes()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRef {
    pub ino: InodeNumber,
}

impl Payload for InodeRef {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self { ino: r.get_u64()? })
    }
}

// Replica placement

/// Replica location of a file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCopy {
    pub ino: InodeNumber,
    pub hostname: String,
}

impl Payload for FileCopy {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_str(&self.hostname);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            hostname: r.get_string()?,
        })
    }
}

/// Replica of an older generation waiting to be deleted on its host
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadFileCopy {
    pub ino: InodeNumber,
    pub generation: u64,
    pub hostname: String,
}

impl Payload for DeadFileCopy {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_u64(self.generation);
        sink.put_str(&self.hostname);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            generation: r.get_u64()?,
            hostname: r.get_string()?,
        })
    }
}

// Directory entries and symlinks

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryArg {
    pub dir_ino: InodeNumber,
    pub name: String,
    pub entry_ino: InodeNumber,
}

impl Payload for DirEntryArg {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.dir_ino);
        sink.put_str(&self.name);
        sink.put_u64(self.entry_ino);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            dir_ino: r.get_u64()?,
            name: r.get_string()?,
            entry_ino: r.get_u64()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkArg {
    pub ino: InodeNumber,
    pub source_path: String,
}

impl Payload for SymlinkArg {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_u64(self.ino);
        sink.put_str(&self.source_path);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            ino: r.get_u64()?,
            source_path: r.get_string()?,
        })
    }
}

// Extended attributes

/// Extended attribute operation; `value` is an opaque blob
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XattrArg {
    pub xml_mode: bool,
    pub ino: InodeNumber,
    pub attrname: String,
    pub value: Vec<u8>,
}

impl Payload for XattrArg {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_bool(self.xml_mode);
        sink.put_u64(self.ino);
        sink.put_str(&self.attrname);
        sink.put_bytes(&self.value);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            xml_mode: r.get_bool()?,
            ino: r.get_u64()?,
            attrname: r.get_string()?,
            value: r.get_bytes()?,
        })
    }
}

// Quota

/// Quota limits and usage counters for one user or group
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub on_db: bool,
    pub grace_period: i64,
    pub space: i64,
    pub space_exceed: i64,
    pub space_soft: i64,
    pub space_hard: i64,
    pub num: i64,
    pub num_exceed: i64,
    pub num_soft: i64,
    pub num_hard: i64,
    pub phy_space: i64,
    pub phy_space_exceed: i64,
    pub phy_space_soft: i64,
    pub phy_space_hard: i64,
    pub phy_num: i64,
    pub phy_num_exceed: i64,
    pub phy_num_soft: i64,
    pub phy_num_hard: i64,
}

impl Payload for QuotaLimits {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_bool(self.on_db);
        for v in [
            self.grace_period,
            self.space,
            self.space_exceed,
            self.space_soft,
            self.space_hard,
            self.num,
            self.num_exceed,
            self.num_soft,
            self.num_hard,
            self.phy_space,
            self.phy_space_exceed,
            self.phy_space_soft,
            self.phy_space_hard,
            self.phy_num,
            self.phy_num_exceed,
            self.phy_num_soft,
            self.phy_num_hard,
        ] {
            sink.put_i64(v);
        }
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            on_db: r.get_bool()?,
            grace_period: r.get_i64()?,
            space: r.get_i64()?,
            space_exceed: r.get_i64()?,
            space_soft: r.get_i64()?,
            space_hard: r.get_i64()?,
            num: r.get_i64()?,
            num_exceed: r.get_i64()?,
            num_soft: r.get_i64()?,
            num_hard: r.get_i64()?,
            phy_space: r.get_i64()?,
            phy_space_exceed: r.get_i64()?,
            phy_space_soft: r.get_i64()?,
            phy_space_hard: r.get_i64()?,
            phy_num: r.get_i64()?,
            phy_num_exceed: r.get_i64()?,
            phy_num_soft: r.get_i64()?,
            phy_num_hard: r.get_i64()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaArg {
    pub is_group: bool,
    pub name: String,
    pub quota: QuotaLimits,
}

impl Payload for QuotaArg {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_bool(self.is_group);
        sink.put_str(&self.name);
        self.quota.walk(sink);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            is_group: r.get_bool()?,
            name: r.get_string()?,
            quota: QuotaLimits::read(r)?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRemove {
    pub is_group: bool,
    pub name: String,
}

impl Payload for QuotaRemove {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_bool(self.is_group);
        sink.put_str(&self.name);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            is_group: r.get_bool()?,
            name: r.get_string()?,
        })
    }
}

// Metadata hosts

/// Metadata server participating in replication
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdHostInfo {
    pub name: String,
    pub port: i32,
    pub clustername: String,
    pub flags: i32,
}

impl Payload for MdHostInfo {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str(&self.name);
        sink.put_i32(self.port);
        sink.put_str(&self.clustername);
        sink.put_i32(self.flags);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            name: r.get_string()?,
            port: r.get_i32()?,
            clustername: r.get_string()?,
            flags: r.get_i32()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdHostModify {
    pub info: MdHostInfo,
    pub modflags: i32,
}

impl Payload for MdHostModify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        self.info.walk(sink);
        sink.put_i32(self.modflags);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            info: MdHostInfo::read(r)?,
            modflags: r.get_i32()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsnGroupModify {
    pub hostname: String,
    pub fsngroupname: String,
}

impl Payload for FsnGroupModify {
    fn walk<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str(&self.hostname);
        sink.put_str(&self.fsngroupname);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            hostname: r.get_string()?,
            fsngroupname: r.get_string()?,
        })
    }
}

/// One journaled mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalOp {
    Begin,
    End,
    HostAdd(HostInfo),
    HostModify(HostModify),
    HostRemove(String),
    UserAdd(UserInfo),
    UserModify(UserModify),
    UserRemove(String),
    GroupAdd(GroupInfo),
    GroupModify(GroupModify),
    GroupRemove(String),
    InodeAdd(InodeStat),
    InodeModify(InodeStat),
    InodeGenModify(InodeU64Modify),
    InodeNlinkModify(InodeU64Modify),
    InodeSizeModify(InodeU64Modify),
    InodeModeModify(InodeU32Modify),
    InodeUserModify(InodeStringModify),
    InodeGroupModify(InodeStringModify),
    InodeAtimeModify(InodeTimeModify),
    InodeMtimeModify(InodeTimeModify),
    InodeCtimeModify(InodeTimeModify),
    InodeCksumAdd(InodeCksum),
    InodeCksumModify(InodeCksum),
    InodeCksumRemove(InodeRef),
    FilecopyAdd(FileCopy),
    FilecopyRemove(FileCopy),
    DeadFilecopyAdd(DeadFileCopy),
    DeadFilecopyRemove(DeadFileCopy),
    DirentryAdd(DirEntryArg),
    DirentryRemove(DirEntryArg),
    SymlinkAdd(SymlinkArg),
    SymlinkRemove(InodeRef),
    XattrAdd(XattrArg),
    XattrModify(XattrArg),
    XattrRemove(XattrArg),
    XattrRemoveAll(XattrArg),
    QuotaAdd(QuotaArg),
    QuotaModify(QuotaArg),
    QuotaRemove(QuotaRemove),
    MdhostAdd(MdHostInfo),
    MdhostModify(MdHostModify),
    MdhostRemove(String),
    FsngroupModify(FsnGroupModify),
    Nop,
}

/// Run `$body` against the payload of any variant carrying one,
/// `$bare` for BEGIN, END and NOP.
macro_rules! with_payload {
    ($op:expr, $p:ident => $body:expr, bare => $bare:expr) => {
        match $op {
            JournalOp::Begin | JournalOp::End | JournalOp::Nop => $bare,
            JournalOp::HostAdd($p) => $body,
            JournalOp::HostModify($p) => $body,
            JournalOp::HostRemove($p) => $body,
            JournalOp::UserAdd($p) => $body,
            JournalOp::UserModify($p) => $body,
            JournalOp::UserRemove($p) => $body,
            JournalOp::GroupAdd($p) => $body,
            JournalOp::GroupModify($p) => $body,
            JournalOp::GroupRemove($p) => $body,
            JournalOp::InodeAdd($p) | JournalOp::InodeModify($p) => $body,
            JournalOp::InodeGenModify($p)
            | JournalOp::InodeNlinkModify($p)
            | JournalOp::InodeSizeModify($p) => $body,
            JournalOp::InodeModeModify($p) => $body,
            JournalOp::InodeUserModify($p) | JournalOp::InodeGroupModify($p) => $body,
            JournalOp::InodeAtimeModify($p)
            | JournalOp::InodeMtimeModify($p)
            | JournalOp::InodeCtimeModify($p) => $body,
            JournalOp::InodeCksumAdd($p) | JournalOp::InodeCksumModify($p) => $body,
            JournalOp::InodeCksumRemove($p) | JournalOp::SymlinkRemove($p) => $body,
            JournalOp::FilecopyAdd($p) | JournalOp::FilecopyRemove($p) => $body,
            JournalOp::DeadFilecopyAdd($p) | JournalOp::DeadFilecopyRemove($p) => $body,
            JournalOp::DirentryAdd($p) | JournalOp::DirentryRemove($p) => $body,
            JournalOp::SymlinkAdd($p) => $body,
            JournalOp::XattrAdd($p)
            | JournalOp::XattrModify($p)
            | JournalOp::XattrRemove($p)
            | JournalOp::XattrRemoveAll($p) => $body,
            JournalOp::QuotaAdd($p) | JournalOp::QuotaModify($p) => $body,
            JournalOp::QuotaRemove($p) => $body,
            JournalOp::MdhostAdd($p) => $body,
            JournalOp::MdhostModify($p) => $body,
            JournalOp::MdhostRemove($p) => $body,
            JournalOp::FsngroupModify($p) => $body,
        }
    };
}

impl JournalOp {
    #[must_use]
    pub const fn tag(&self) -> OperationTag {
        use OperationTag as T;
        match self {
            Self::Begin => T::Begin,
            Self::End => T::End,
            Self::HostAdd(_) => T::HostAdd,
            Self::HostModify(_) => T::HostModify,
            Self::HostRemove(_) => T::HostRemove,
            Self::UserAdd(_) => T::UserAdd,
            Self::UserModify(_) => T::UserModify,
            Self::UserRemove(_) => T::UserRemove,
            Self::GroupAdd(_) => T::GroupAdd,
            Self::GroupModify(_) => T::GroupModify,
            Self::GroupRemove(_) => T::GroupRemove,
            Self::InodeAdd(_) => T::InodeAdd,
            Self::InodeModify(_) => T::InodeModify,
            Self::InodeGenModify(_) => T::InodeGenModify,
            Self::InodeNlinkModify(_) => T::InodeNlinkModify,
            Self::InodeSizeModify(_) => T::InodeSizeModify,
            Self::InodeModeModify(_) => T::InodeModeModify,
            Self::InodeUserModify(_) => T::InodeUserModify,
            Self::InodeGroupModify(_) => T::InodeGroupModify,
            Self::InodeAtimeModify(_) => T::InodeAtimeModify,
            Self::InodeMtimeModify(_) => T::InodeMtimeModify,
            Self::InodeCtimeModify(_) => T::InodeCtimeModify,
            Self::InodeCksumAdd(_) => T::InodeCksumAdd,
            Self::InodeCksumModify(_) => T::InodeCksumModify,
            Self::InodeCksumRemove(_) => T::InodeCksumRemove,
            Self::FilecopyAdd(_) => T::FilecopyAdd,
            Self::FilecopyRemove(_) => T::FilecopyRemove,
            Self::DeadFilecopyAdd(_) => T::DeadFilecopyAdd,
            Self::DeadFilecopyRemove(_) => T::DeadFilecopyRemove,
            Self::DirentryAdd(_) => T::DirentryAdd,
            Self::DirentryRemove(_) => T::DirentryRemove,
            Self::SymlinkAdd(_) => T::SymlinkAdd,
            Self::SymlinkRemove(_) => T::SymlinkRemove,
            Self::XattrAdd(_) => T::XattrAdd,
            Self::XattrModify(_) => T::XattrModify,
            Self::XattrRemove(_) => T::XattrRemove,
            Self::XattrRemoveAll(_) => T::XattrRemoveAll,
            Self::QuotaAdd(_) => T::QuotaAdd,
            Self::QuotaModify(_) => T::QuotaModify,
            Self::QuotaRemove(_) => T::QuotaRemove,
            Self::MdhostAdd(_) => T::MdhostAdd,
            Self::MdhostModify(_) => T::MdhostModify,
            Self::MdhostRemove(_) => T::MdhostRemove,
            Self::FsngroupModify(_) => T::FsngroupModify,
            Self::Nop => T::Nop,
        }
    }

    #[must_use]
    pub const fn action(&self) -> OpAction {
        self.tag().action()
    }

    /// Payload length from a size-probe pass
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        with_payload!(self, p => p.encoded_len(), bare => 0)
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        with_payload!(self, p => p.encode_into(buf), bare => ())
    }

    /// Decode a payload for the given tag; the payload must be consumed exactly
    pub fn decode(tag: OperationTag, payload: &[u8]) -> Result<Self> {
        use OperationTag as T;
        let mut r = PayloadReader::new(payload);
        let op = match tag {
            T::Begin => Self::Begin,
            T::End => Self::End,
            T::Nop => Self::Nop,
            T::HostAdd => Self::HostAdd(HostInfo::read(&mut r)?),
            T::HostModify => Self::HostModify(HostModify::read(&mut r)?),
            T::HostRemove => Self::HostRemove(String::read(&mut r)?),
            T::UserAdd => Self::UserAdd(UserInfo::read(&mut r)?),
            T::UserModify => Self::UserModify(UserModify::read(&mut r)?),
            T::UserRemove => Self::UserRemove(String::read(&mut r)?),
            T::GroupAdd => Self::GroupAdd(GroupInfo::read(&mut r)?),
            T::GroupModify => Self::GroupModify(GroupModify::read(&mut r)?),
            T::GroupRemove => Self::GroupRemove(String::read(&mut r)?),
            T::InodeAdd => Self::InodeAdd(InodeStat::read(&mut r)?),
            T::InodeModify => Self::InodeModify(InodeStat::read(&mut r)?),
            T::InodeGenModify => Self::InodeGenModify(InodeU64Modify::read(&mut r)?),
            T::InodeNlinkModify => Self::InodeNlinkModify(InodeU64Modify::read(&mut r)?),
            T::InodeSizeModify => Self::InodeSizeModify(InodeU64Modify::read(&mut r)?),
            T::InodeModeModify => Self::InodeModeModify(InodeU32Modify::read(&mut r)?),
            T::InodeUserModify => Self::InodeUserModify(InodeStringModify::read(&mut r)?),
            T::InodeGroupModify => Self::InodeGroupModify(InodeStringModify::read(&mut r)?),
            T::InodeAtimeModify => Self::InodeAtimeModify(InodeTimeModify::read(&mut r)?),
            T::InodeMtimeModify => Self::InodeMtimeModify(InodeTimeModify::read(&mut r)?),
            T::InodeCtimeModify => Self::InodeCtimeModify(InodeTimeModify::read(&mut r)?),
            T::InodeCksumAdd => Self::InodeCksumAdd(InodeCksum::read(&mut r)?),
            T::InodeCksumModify => Self::InodeCksumModify(InodeCksum::read(&mut r)?),
            T::InodeCksumRemove => Self::InodeCksumRemove(InodeRef::read(&mut r)?),
            T::FilecopyAdd => Self::FilecopyAdd(FileCopy::read(&mut r)?),
            T::FilecopyRemove => Self::FilecopyRemove(FileCopy::read(&mut r)?),
            T::DeadFilecopyAdd => Self::DeadFilecopyAdd(DeadFileCopy::read(&mut r)?),
            T::DeadFilecopyRemove => Self::DeadFilecopyRemove(DeadFileCopy::read(&mut r)?),
            T::DirentryAdd => Self::DirentryAdd(DirEntryArg::read(&mut r)?),
            T::DirentryRemove => Self::DirentryRemove(DirEntryArg::read(&mut r)?),
            T::SymlinkAdd => Self::SymlinkAdd(SymlinkArg::read(&mut r)?),
            T::SymlinkRemove => Self::SymlinkRemove(InodeRef::read(&mut r)?),
            T::XattrAdd => Self::XattrAdd(XattrArg::read(&mut r)?),
            T::XattrModify => Self::XattrModify(XattrArg::read(&mut r)?),
            T::XattrRemove => Self::XattrRemove(XattrArg::read(&mut r)?),
            T::XattrRemoveAll => Self::XattrRemoveAll(XattrArg::read(&mut r)?),
            T::QuotaAdd => Self::QuotaAdd(QuotaArg::read(&mut r)?),
            T::QuotaModify => Self::QuotaModify(QuotaArg::read(&mut r)?),
            T::QuotaRemove => Self::QuotaRemove(QuotaRemove::read(&mut r)?),
            T::MdhostAdd => Self::MdhostAdd(MdHostInfo::read(&mut r)?),
            T::MdhostModify => Self::MdhostModify(MdHostModify::read(&mut r)?),
            T::MdhostRemove => Self::MdhostRemove(String::read(&mut r)?),
            T::FsngroupModify => Self::FsngroupModify(FsnGroupModify::read(&mut r)?),
        };
        r.finish().map_err(|e| match e {
            Error::Deserialization(msg) => Error::Deserialization(format!("{tag}: {msg}")),
            other => other,
        })?;
        Ok(op)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn sample_stat(ino: InodeNumber) -> InodeStat {
        InodeStat {
            ino,
            generation: 3,
            nlink: 1,
            size: u64::MAX,
            mode: nsmeta_common::S_IFREG | 0o644,
            user: "alice".into(),
            group: "staff".into(),
            atime: Timespec::new(1_700_000_000, 1),
            mtime: Timespec::new(-1, 999_999_999),
            ctime: Timespec::default(),
        }
    }

    /// One representative op per tag
    pub(crate) fn sample_ops() -> Vec<JournalOp> {
        let host = HostInfo {
            hostname: "fsn1".into(),
            port: 600,
            architecture: "x86_64".into(),
            ncpu: 8,
            flags: 0,
            aliases: vec!["fsn1.local".into()],
        };
        let xattr = XattrArg {
            xml_mode: true,
            ino: 10,
            attrname: "user.tag".into(),
            value: vec![0, 1, 2, 255],
        };
        let quota = QuotaArg {
            is_group: false,
            name: "alice".into(),
            quota: QuotaLimits {
                on_db: true,
                grace_period: 86400,
                space_hard: i64::MAX,
                num_soft: -1,
                ..Default::default()
            },
        };
        let md = MdHostInfo {
            name: "md1".into(),
            port: 601,
            clustername: "c1".into(),
            flags: 1,
        };
        vec![
            JournalOp::Begin,
            JournalOp::End,
            JournalOp::HostAdd(host.clone()),
            JournalOp::HostModify(HostModify {
                info: host,
                modflags: 2,
                add_aliases: vec!["a".into()],
                del_aliases: vec![],
            }),
            JournalOp::HostRemove("fsn1".into()),
            JournalOp::UserAdd(UserInfo {
                username: "alice".into(),
                realname: "Alice".into(),
                homedir: "/home/alice".into(),
                gsi_dn: String::new(),
            }),
            JournalOp::UserModify(UserModify::default()),
            JournalOp::UserRemove("alice".into()),
            JournalOp::GroupAdd(GroupInfo {
                groupname: "staff".into(),
                usernames: vec!["alice".into(), "bob".into()],
            }),
            JournalOp::GroupModify(GroupModify {
                add_users: vec!["carol".into()],
                ..Default::default()
            }),
            JournalOp::GroupRemove("staff".into()),
            JournalOp::InodeAdd(sample_stat(3)),
            JournalOp::InodeModify(sample_stat(4)),
            JournalOp::InodeGenModify(InodeU64Modify { ino: 3, value: 9 }),
            JournalOp::InodeNlinkModify(InodeU64Modify { ino: 3, value: 2 }),
            JournalOp::InodeSizeModify(InodeU64Modify { ino: 3, value: 0 }),
            JournalOp::InodeModeModify(InodeU32Modify { ino: 3, value: 0o600 }),
            JournalOp::InodeUserModify(InodeStringModify {
                ino: 3,
                value: "bob".into(),
            }),
            JournalOp::InodeGroupModify(InodeStringModify {
                ino: 3,
                value: String::new(),
            }),
            JournalOp::InodeAtimeModify(InodeTimeModify {
                ino: 3,
                time: Timespec::new(5, 6),
            }),
            JournalOp::InodeMtimeModify(InodeTimeModify::default()),
            JournalOp::InodeCtimeModify(InodeTimeModify {
                ino: u64::MAX,
                time: Timespec::new(i64::MIN, i32::MAX),
            }),
            JournalOp::InodeCksumAdd(InodeCksum {
                ino: 3,
                cksum_type: "md5".into(),
                sum: vec![0xab; 16],
            }),
            JournalOp::InodeCksumModify(InodeCksum::default()),
            JournalOp::InodeCksumRemove(InodeRef { ino: 3 }),
            JournalOp::FilecopyAdd(FileCopy {
                ino: 3,
                hostname: "fsn1".into(),
            }),
            JournalOp::FilecopyRemove(FileCopy::default()),
            JournalOp::DeadFilecopyAdd(DeadFileCopy {
                ino: 3,
                generation: 1,
                hostname: "fsn1".into(),
            }),
            JournalOp::DeadFilecopyRemove(DeadFileCopy::default()),
            JournalOp::DirentryAdd(DirEntryArg {
                dir_ino: 2,
                name: "x".repeat(255),
                entry_ino: 3,
            }),
            JournalOp::DirentryRemove(DirEntryArg::default()),
            JournalOp::SymlinkAdd(SymlinkArg {
                ino: 5,
                source_path: "/a/b".into(),
            }),
            JournalOp::SymlinkRemove(InodeRef { ino: 5 }),
            JournalOp::XattrAdd(xattr.clone()),
            JournalOp::XattrModify(xattr.clone()),
            JournalOp::XattrRemove(XattrArg {
                value: vec![],
                ..xattr
            }),
            JournalOp::XattrRemoveAll(XattrArg {
                ino: 10,
                ..Default::default()
            }),
            JournalOp::QuotaAdd(quota.clone()),
            JournalOp::QuotaModify(quota),
            JournalOp::QuotaRemove(QuotaRemove {
                is_group: true,
                name: "staff".into(),
            }),
            JournalOp::MdhostAdd(md.clone()),
            JournalOp::MdhostModify(MdHostModify { info: md, modflags: 4 }),
            JournalOp::MdhostRemove("md1".into()),
            JournalOp::FsngroupModify(FsnGroupModify {
                hostname: "fsn1".into(),
                fsngroupname: "rack1".into(),
            }),
            JournalOp::Nop,
        ]
    }

    #[test]
    fn test_tags_are_dense_and_stable() {
        assert_eq!(OperationTag::ALL.len(), 45);
        for (i, tag) in OperationTag::ALL.iter().enumerate() {
            assert_eq!(*tag as usize, i + 1);
            assert_eq!(OperationTag::from_u16(*tag as u16), Some(*tag));
        }
        assert_eq!(OperationTag::from_u16(0), None);
        assert_eq!(OperationTag::from_u16(46), None);
        assert_eq!(OperationTag::XattrRemoveAll.to_string(), "XATTR_REMOVEALL");
    }

    #[test]
    fn test_every_op_roundtrips() {
        let ops = sample_ops();
        assert_eq!(ops.len(), OperationTag::ALL.len());
        for op in ops {
            let mut buf = Vec::new();
            op.encode_into(&mut buf);
            assert_eq!(buf.len(), op.encoded_len(), "{}", op.tag());
            let decoded = JournalOp::decode(op.tag(), &buf).unwrap();
            assert_eq!(decoded, op);
        }
    }

    #[test]
    fn test_actions() {
        assert_eq!(OperationTag::Begin.action(), OpAction::Begin);
        assert_eq!(OperationTag::DirentryAdd.action(), OpAction::Add);
        assert_eq!(OperationTag::InodeMtimeModify.action(), OpAction::Modify);
        assert_eq!(OperationTag::FsngroupModify.action(), OpAction::Modify);
        assert_eq!(OperationTag::XattrRemoveAll.action(), OpAction::Remove);
        assert_eq!(OperationTag::Nop.action(), OpAction::Nop);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut buf = Vec::new();
        JournalOp::InodeCksumRemove(InodeRef { ino: 1 }).encode_into(&mut buf);
        buf.push(0);
        let err = JournalOp::decode(OperationTag::InodeCksumRemove, &buf).unwrap_err();
        assert!(err.to_string().contains("INODE_CKSUM_REMOVE"));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut buf = Vec::new();
        JournalOp::UserAdd(UserInfo::default()).encode_into(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(JournalOp::decode(OperationTag::UserAdd, &buf).is_err());
    }
}
