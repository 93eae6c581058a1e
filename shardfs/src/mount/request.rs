use crate::fs::types::{Attr, DirEntry, SetAttrValid, StatfsInfo};
use std::time::Instant;

/// One kernel VFS request record as delivered by the mount-point transport.
/// `unique` is the kernel-assigned request ID; exactly one reply must carry
/// it back, in any order relative to other requests. A `deadline`, when the
/// transport supplies one, rides the RPC to the server.
#[derive(Debug, Clone)]
pub struct VfsRequest {
    pub unique: u64,
    pub deadline: Option<Instant>,
    pub op: VfsOp,
}

#[derive(Debug, Clone)]
pub enum VfsOp {
    Lookup {
        parent: u64,
        name: String,
    },
    GetAttr {
        inode: u64,
    },
    SetAttr {
        attr: Attr,
        valid: SetAttrValid,
    },
    Create {
        parent: u64,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    },
    MkDir {
        parent: u64,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    },
    Read {
        inode: u64,
        offset: u64,
        size: u64,
    },
    Write {
        inode: u64,
        offset: u64,
        data: Vec<u8>,
    },
    Remove {
        parent: u64,
        name: String,
    },
    Rename {
        old_parent: u64,
        old_name: String,
        new_parent: u64,
        new_name: String,
    },
    Symlink {
        parent: u64,
        name: String,
        target: String,
        uid: u32,
        gid: u32,
    },
    ReadLink {
        inode: u64,
    },
    GetXattr {
        inode: u64,
        name: String,
    },
    SetXattr {
        inode: u64,
        name: String,
        value: Vec<u8>,
    },
    ListXattr {
        inode: u64,
    },
    RemoveXattr {
        inode: u64,
        name: String,
    },
    ReadDirAll {
        inode: u64,
    },
    StatFs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VfsReply {
    Entry {
        unique: u64,
        name: String,
        attr: Attr,
    },
    Attr {
        unique: u64,
        attr: Attr,
    },
    Data {
        unique: u64,
        data: Vec<u8>,
    },
    Written {
        unique: u64,
        count: u64,
    },
    Entries {
        unique: u64,
        entries: Vec<DirEntry>,
    },
    Link {
        unique: u64,
        target: String,
    },
    Xattr {
        unique: u64,
        value: Vec<u8>,
    },
    XattrNames {
        unique: u64,
        names: Vec<String>,
    },
    Statfs {
        unique: u64,
        info: StatfsInfo,
    },
    Ok {
        unique: u64,
    },
    Error {
        unique: u64,
        errno: i32,
    },
}

impl VfsReply {
    pub fn unique(&self) -> u64 {
        match self {
            VfsReply::Entry { unique, .. }
            | VfsReply::Attr { unique, .. }
            | VfsReply::Data { unique, .. }
            | VfsReply::Written { unique, .. }
            | VfsReply::Entries { unique, .. }
            | VfsReply::Link { unique, .. }
            | VfsReply::Xattr { unique, .. }
            | VfsReply::XattrNames { unique, .. }
            | VfsReply::Statfs { unique, .. }
            | VfsReply::Ok { unique }
            | VfsReply::Error { unique, .. } => *unique,
        }
    }
}
