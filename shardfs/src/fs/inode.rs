use super::errors::FsError;
use super::types::{Attr, FileType, SetAttrValid, MODE_PERM_MASK, SYMLINK_DEFAULT_MODE};
use serde::{Deserialize, Serialize};

pub type InodeId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub crtime: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirNode {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub crtime: i64,
    pub entry_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymlinkNode {
    pub target: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub crtime: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Inode {
    File(FileNode),
    Directory(DirNode),
    Symlink(SymlinkNode),
}

impl Inode {
    /// Builds the stored record for a freshly minted inode. The caller's type
    /// choice wins over whatever type bits arrived in `attr.mode`.
    pub fn new_from_attr(attr: &Attr, is_dir: bool) -> Self {
        let perm = attr.mode & MODE_PERM_MASK;
        if is_dir {
            Inode::Directory(DirNode {
                mode: FileType::Directory.type_bits() | perm,
                uid: attr.uid,
                gid: attr.gid,
                atime: attr.atime,
                mtime: attr.mtime,
                ctime: attr.ctime,
                crtime: attr.crtime,
                entry_count: 0,
            })
        } else {
            Inode::File(FileNode {
                size: 0,
                mode: FileType::Regular.type_bits() | perm,
                uid: attr.uid,
                gid: attr.gid,
                atime: attr.atime,
                mtime: attr.mtime,
                ctime: attr.ctime,
                crtime: attr.crtime,
            })
        }
    }

    pub fn new_symlink(target: String, attr: &Attr) -> Self {
        Inode::Symlink(SymlinkNode {
            target,
            mode: FileType::Symlink.type_bits() | SYMLINK_DEFAULT_MODE,
            uid: attr.uid,
            gid: attr.gid,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.crtime,
        })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Inode::Directory(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Inode::File(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Inode::Symlink(_))
    }

    pub fn size(&self) -> u64 {
        match self {
            Inode::File(f) => f.size,
            Inode::Symlink(s) => s.target.len() as u64,
            Inode::Directory(_) => 0,
        }
    }

    pub fn attr(&self, inode: InodeId) -> Attr {
        match self {
            Inode::File(f) => Attr {
                inode,
                mode: f.mode,
                uid: f.uid,
                gid: f.gid,
                size: f.size,
                atime: f.atime,
                mtime: f.mtime,
                ctime: f.ctime,
                crtime: f.crtime,
            },
            Inode::Directory(d) => Attr {
                inode,
                mode: d.mode,
                uid: d.uid,
                gid: d.gid,
                size: 0,
                atime: d.atime,
                mtime: d.mtime,
                ctime: d.ctime,
                crtime: d.crtime,
            },
            Inode::Symlink(s) => Attr {
                inode,
                mode: s.mode,
                uid: s.uid,
                gid: s.gid,
                size: s.target.len() as u64,
                atime: s.atime,
                mtime: s.mtime,
                ctime: s.ctime,
                crtime: s.crtime,
            },
        }
    }

    /// Applies the fields flagged by `valid`; everything else is preserved.
    /// Type bits in the stored mode always survive a mode change.
    pub fn apply_setattr(
        &mut self,
        attr: &Attr,
        valid: SetAttrValid,
        now: i64,
    ) -> Result<(), FsError> {
        if valid.size() {
            match self {
                Inode::File(f) => f.size = attr.size,
                Inode::Directory(_) => return Err(FsError::IsDirectory),
                Inode::Symlink(_) => return Err(FsError::InvalidArgument),
            }
        }

        let (mode, uid, gid, atime, mtime, ctime) = match self {
            Inode::File(f) => (
                &mut f.mode,
                &mut f.uid,
                &mut f.gid,
                &mut f.atime,
                &mut f.mtime,
                &mut f.ctime,
            ),
            Inode::Directory(d) => (
                &mut d.mode,
                &mut d.uid,
                &mut d.gid,
                &mut d.atime,
                &mut d.mtime,
                &mut d.ctime,
            ),
            Inode::Symlink(s) => (
                &mut s.mode,
                &mut s.uid,
                &mut s.gid,
                &mut s.atime,
                &mut s.mtime,
                &mut s.ctime,
            ),
        };

        if valid.mode() {
            *mode = (*mode & !MODE_PERM_MASK) | (attr.mode & MODE_PERM_MASK);
        }
        if valid.uid() {
            *uid = attr.uid;
        }
        if valid.gid() {
            *gid = attr.gid;
        }
        if valid.atime() {
            *atime = attr.atime;
        }
        if valid.mtime() {
            *mtime = attr.mtime;
        }
        if !valid.is_empty() {
            *ctime = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::types::{S_IFDIR, S_IFREG};

    fn base_attr(mode: u32) -> Attr {
        Attr {
            inode: 7,
            mode,
            uid: 1000,
            gid: 1000,
            size: 0,
            atime: 100,
            mtime: 100,
            ctime: 100,
            crtime: 100,
        }
    }

    #[test]
    fn create_forces_type_bits() {
        let dir = Inode::new_from_attr(&base_attr(0o755), true);
        assert_eq!(dir.attr(7).mode & S_IFDIR, S_IFDIR);

        // Caller-supplied type bits never override the requested kind.
        let dir = Inode::new_from_attr(&base_attr(S_IFREG | 0o644), true);
        assert_eq!(dir.attr(7).mode, S_IFDIR | 0o644);

        let file = Inode::new_from_attr(&base_attr(S_IFDIR | 0o644), false);
        assert_eq!(file.attr(7).mode, S_IFREG | 0o644);
    }

    #[test]
    fn setattr_respects_mask() {
        let mut node = Inode::new_from_attr(&base_attr(0o644), false);
        let change = Attr {
            mode: 0o600,
            uid: 42,
            size: 4096,
            ..base_attr(0)
        };

        node.apply_setattr(&change, SetAttrValid::new(SetAttrValid::MODE), 200)
            .unwrap();
        let attr = node.attr(7);
        assert_eq!(attr.mode, S_IFREG | 0o600);
        assert_eq!(attr.uid, 1000, "uid not flagged, must be preserved");
        assert_eq!(attr.size, 0, "size not flagged, must be preserved");
        assert_eq!(attr.ctime, 200);

        node.apply_setattr(
            &change,
            SetAttrValid::new(SetAttrValid::UID | SetAttrValid::SIZE),
            201,
        )
        .unwrap();
        let attr = node.attr(7);
        assert_eq!(attr.uid, 42);
        assert_eq!(attr.size, 4096);
        assert_eq!(attr.mode, S_IFREG | 0o600);
    }

    #[test]
    fn setattr_size_on_directory_fails() {
        let mut node = Inode::new_from_attr(&base_attr(0o755), true);
        let err = node
            .apply_setattr(
                &base_attr(0),
                SetAttrValid::new(SetAttrValid::SIZE),
                200,
            )
            .unwrap_err();
        assert_eq!(err, FsError::IsDirectory);
    }

    #[test]
    fn symlink_size_tracks_target() {
        let link = Inode::new_symlink("/some/where".to_string(), &base_attr(0));
        assert_eq!(link.attr(9).size, 11);
    }
}
