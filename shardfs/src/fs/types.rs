use serde::{Deserialize, Serialize};

// File mode type bits (S_IF* constants)
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000; // Regular file
pub const S_IFDIR: u32 = 0o040000; // Directory
pub const S_IFLNK: u32 = 0o120000; // Symbolic link

// Permission bits preserved by SetAttr and creation-mode normalization
pub const MODE_PERM_MASK: u32 = 0o7777;

// Default permissions for symbolic links
pub const SYMLINK_DEFAULT_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

impl FileType {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            _ => FileType::Regular,
        }
    }

    pub fn type_bits(self) -> u32 {
        match self {
            FileType::Regular => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
        }
    }
}

/// The POSIX-style attribute record carried with every metadata response.
/// Timestamps are seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub inode: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub crtime: i64,
}

impl Attr {
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }
}

/// Bitset accompanying SetAttr: only flagged fields are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAttrValid(u32);

impl SetAttrValid {
    pub const MODE: u32 = 1 << 0;
    pub const UID: u32 = 1 << 1;
    pub const GID: u32 = 1 << 2;
    pub const SIZE: u32 = 1 << 3;
    pub const ATIME: u32 = 1 << 4;
    pub const MTIME: u32 = 1 << 5;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn mode(self) -> bool {
        self.0 & Self::MODE != 0
    }

    pub fn uid(self) -> bool {
        self.0 & Self::UID != 0
    }

    pub fn gid(self) -> bool {
        self.0 & Self::GID != 0
    }

    pub fn size(self) -> bool {
        self.0 & Self::SIZE != 0
    }

    pub fn atime(self) -> bool {
        self.0 & Self::ATIME != 0
    }

    pub fn mtime(self) -> bool {
        self.0 & Self::MTIME != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub attr: Attr,
}

/// Synthetic filesystem accounting; no real accounting is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatfsInfo {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

impl StatfsInfo {
    pub fn synthetic() -> Self {
        // 1 exbibyte at a 4K block size, 1 trillion inodes.
        Self {
            blocks: 1 << 48,
            bfree: 1 << 48,
            bavail: 1 << 48,
            files: 1_000_000_000_000,
            ffree: 1_000_000_000_000,
            bsize: 4096,
            namelen: 256,
            frsize: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_mode() {
        assert_eq!(FileType::from_mode(S_IFREG | 0o644), FileType::Regular);
        assert_eq!(FileType::from_mode(S_IFDIR | 0o755), FileType::Directory);
        assert_eq!(FileType::from_mode(S_IFLNK | 0o777), FileType::Symlink);
        assert_eq!(FileType::from_mode(0o644), FileType::Regular);
    }

    #[test]
    fn setattr_valid_bits() {
        let valid = SetAttrValid::new(SetAttrValid::MODE | SetAttrValid::SIZE);
        assert!(valid.mode());
        assert!(valid.size());
        assert!(!valid.uid());
        assert!(!valid.mtime());
        assert!(SetAttrValid::new(0).is_empty());
    }
}
