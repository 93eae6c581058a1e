pub mod errors;
pub mod flake;
pub mod inode;
pub mod key_codec;
pub mod lock;
pub mod store;
pub mod types;

use self::errors::FsError;
use self::inode::{Inode, InodeId};
use self::lock::LockManager;
use self::store::{DirectoryStore, InodeStore, XattrStore};
use self::types::{Attr, DirEntry, SetAttrValid};
use crate::kv::Kv;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const ROOT_INODE: InodeId = 1;
pub const NAME_MAX: usize = 255;
pub const ROOT_MODE: u32 = 0o755;

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidArgument);
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// Authoritative store of inode attributes, directory entries, symlink
/// targets, and extended attributes.
///
/// Mutations on the same inode or (parent, name) pair serialize on per-inode
/// locks; operations on disjoint keys do not interfere. Multi-inode
/// operations acquire their locks in ascending inode order after an
/// optimistic lookup and re-verify the entries once locked. Renames
/// additionally hold a service-wide lock, as the kernel VFS does.
pub struct DirService {
    inodes: InodeStore,
    entries: DirectoryStore,
    xattrs: XattrStore,
    locks: LockManager,
    rename_lock: Mutex<()>,
}

impl DirService {
    pub async fn new(kv: Arc<dyn Kv>) -> Result<Self, FsError> {
        let service = Self {
            inodes: InodeStore::new(kv.clone()),
            entries: DirectoryStore::new(kv.clone()),
            xattrs: XattrStore::new(kv),
            locks: LockManager::new(),
            rename_lock: Mutex::new(()),
        };
        service.ensure_root().await?;
        Ok(service)
    }

    async fn ensure_root(&self) -> Result<(), FsError> {
        if self.inodes.try_get(ROOT_INODE).await?.is_some() {
            return Ok(());
        }
        let now = unix_now();
        let attr = Attr {
            inode: ROOT_INODE,
            mode: ROOT_MODE,
            uid: 0,
            gid: 0,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
        };
        let root = Inode::new_from_attr(&attr, true);
        self.inodes.save(ROOT_INODE, &root).await?;
        debug!("created root inode {ROOT_INODE}");
        Ok(())
    }

    pub async fn getattr(&self, inode: InodeId) -> Result<Attr, FsError> {
        Ok(self.inodes.get(inode).await?.attr(inode))
    }

    pub async fn setattr(
        &self,
        inode: InodeId,
        attr: &Attr,
        valid: SetAttrValid,
    ) -> Result<Attr, FsError> {
        let _guard = self.locks.lock(inode).await;
        let mut record = self.inodes.get(inode).await?;
        record.apply_setattr(attr, valid, unix_now())?;
        self.inodes.save(inode, &record).await?;
        Ok(record.attr(inode))
    }

    pub async fn lookup(&self, parent: InodeId, name: &str) -> Result<(String, Attr), FsError> {
        validate_name(name)?;
        let child = self
            .entries
            .get(parent, name)
            .await?
            .ok_or(FsError::NotFound)?;
        let attr = self.getattr(child).await?;
        Ok((name.to_string(), attr))
    }

    /// Allocates the (parent, name) entry for a freshly minted inode. The
    /// record is stored before the entry so an entry never points at a
    /// missing inode.
    pub async fn create(
        &self,
        parent: InodeId,
        inode: InodeId,
        name: &str,
        attr: &Attr,
        is_dir: bool,
    ) -> Result<(String, Attr), FsError> {
        validate_name(name)?;
        let _guard = self.locks.lock(parent).await;

        let mut parent_record = self.inodes.get(parent).await?;
        let Inode::Directory(parent_dir) = &mut parent_record else {
            return Err(FsError::NotDirectory);
        };
        if self.entries.get(parent, name).await?.is_some() {
            return Err(FsError::Exists);
        }

        let record = Inode::new_from_attr(attr, is_dir);
        self.inodes.save(inode, &record).await?;
        self.entries.insert(parent, name, inode).await?;

        parent_dir.entry_count += 1;
        parent_dir.mtime = attr.crtime;
        parent_dir.ctime = attr.crtime;
        self.inodes.save(parent, &parent_record).await?;

        Ok((name.to_string(), record.attr(inode)))
    }

    pub async fn symlink(
        &self,
        parent: InodeId,
        name: &str,
        target: &str,
        attr: &Attr,
        inode: InodeId,
    ) -> Result<(String, Attr), FsError> {
        validate_name(name)?;
        let _guard = self.locks.lock(parent).await;

        let mut parent_record = self.inodes.get(parent).await?;
        let Inode::Directory(parent_dir) = &mut parent_record else {
            return Err(FsError::NotDirectory);
        };
        if self.entries.get(parent, name).await?.is_some() {
            return Err(FsError::Exists);
        }

        let record = Inode::new_symlink(target.to_string(), attr);
        self.inodes.save(inode, &record).await?;
        self.entries.insert(parent, name, inode).await?;

        parent_dir.entry_count += 1;
        parent_dir.mtime = attr.crtime;
        parent_dir.ctime = attr.crtime;
        self.inodes.save(parent, &parent_record).await?;

        Ok((name.to_string(), record.attr(inode)))
    }

    pub async fn readlink(&self, inode: InodeId) -> Result<String, FsError> {
        match self.inodes.get(inode).await? {
            Inode::Symlink(link) => Ok(link.target),
            _ => Err(FsError::NotSymlink),
        }
    }

    /// Unordered snapshot of a directory's entries.
    pub async fn readdir_all(&self, inode: InodeId) -> Result<Vec<DirEntry>, FsError> {
        let record = self.inodes.get(inode).await?;
        if !record.is_directory() {
            return Err(FsError::NotDirectory);
        }

        let listed = self.entries.list(inode).await?;
        let mut entries = Vec::with_capacity(listed.len());
        for (name, child) in listed {
            match self.inodes.try_get(child).await? {
                Some(child_record) => entries.push(DirEntry {
                    name,
                    attr: child_record.attr(child),
                }),
                // An entry must reference a live inode; a dangling one means
                // a concurrent remove raced the scan.
                None => warn!("dir {inode}: entry {name:?} points at missing inode {child}"),
            }
        }
        Ok(entries)
    }

    pub async fn remove(&self, parent: InodeId, name: &str) -> Result<(), FsError> {
        validate_name(name)?;
        loop {
            let child = self
                .entries
                .get(parent, name)
                .await?
                .ok_or(FsError::NotFound)?;

            let _guards = self.locks.lock_many(&[parent, child]).await;
            if self.entries.get(parent, name).await? != Some(child) {
                continue; // entry changed while acquiring locks
            }

            let mut parent_record = self.inodes.get(parent).await?;
            let Inode::Directory(parent_dir) = &mut parent_record else {
                return Err(FsError::NotDirectory);
            };

            let child_record = self.inodes.get(child).await?;
            if let Inode::Directory(dir) = &child_record {
                if dir.entry_count > 0 {
                    return Err(FsError::NotEmpty);
                }
            }

            // Entry first so no entry ever points at a missing inode; the
            // inode and its xattrs follow. Chunks are left for a sweeper.
            self.entries.remove(parent, name).await?;
            self.xattrs.remove_all(child).await?;
            self.inodes.delete(child).await?;

            let now = unix_now();
            parent_dir.entry_count = parent_dir.entry_count.saturating_sub(1);
            parent_dir.mtime = now;
            parent_dir.ctime = now;
            self.inodes.save(parent, &parent_record).await?;
            return Ok(());
        }
    }

    /// Atomic move of a directory entry. An existing target of a compatible
    /// type is overwritten and its inode destroyed; a non-empty target
    /// directory is never overwritten.
    pub async fn rename(
        &self,
        old_parent: InodeId,
        old_name: &str,
        new_parent: InodeId,
        new_name: &str,
    ) -> Result<(), FsError> {
        validate_name(old_name)?;
        validate_name(new_name)?;
        if old_parent == new_parent && old_name == new_name {
            self.entries
                .get(old_parent, old_name)
                .await?
                .ok_or(FsError::NotFound)?;
            return Ok(());
        }

        let _rename_guard = self.rename_lock.lock().await;
        loop {
            let child = self
                .entries
                .get(old_parent, old_name)
                .await?
                .ok_or(FsError::NotFound)?;
            let target = self.entries.get(new_parent, new_name).await?;

            let mut involved = vec![old_parent, new_parent, child];
            if let Some(target) = target {
                involved.push(target);
            }
            let _guards = self.locks.lock_many(&involved).await;

            // Entries may have moved between the optimistic lookup and the
            // lock acquisition; start over if so.
            if self.entries.get(old_parent, old_name).await? != Some(child)
                || self.entries.get(new_parent, new_name).await? != target
            {
                continue;
            }

            // Every record is validated before any entry moves, so a failed
            // rename leaves the tree untouched.
            let mut old_parent_record = self.inodes.get(old_parent).await?;
            if !old_parent_record.is_directory() {
                return Err(FsError::NotDirectory);
            }
            let mut new_parent_record = if old_parent == new_parent {
                None
            } else {
                let record = self.inodes.get(new_parent).await?;
                if !record.is_directory() {
                    return Err(FsError::NotDirectory);
                }
                Some(record)
            };

            let child_record = self.inodes.get(child).await?;
            if let Some(target_id) = target {
                let target_record = self.inodes.get(target_id).await?;
                match (child_record.is_directory(), target_record.is_directory()) {
                    (true, false) => return Err(FsError::NotDirectory),
                    (false, true) => return Err(FsError::IsDirectory),
                    _ => {}
                }
                if let Inode::Directory(dir) = &target_record {
                    if dir.entry_count > 0 {
                        return Err(FsError::NotEmpty);
                    }
                }
                self.xattrs.remove_all(target_id).await?;
                self.inodes.delete(target_id).await?;
            }

            self.entries.remove(old_parent, old_name).await?;
            self.entries.insert(new_parent, new_name, child).await?;

            let now = unix_now();
            if let Inode::Directory(old_dir) = &mut old_parent_record {
                if new_parent_record.is_some() {
                    old_dir.entry_count = old_dir.entry_count.saturating_sub(1);
                } else if target.is_some() {
                    // Same-parent move onto an existing entry merges two
                    // entries into one.
                    old_dir.entry_count = old_dir.entry_count.saturating_sub(1);
                }
                old_dir.mtime = now;
                old_dir.ctime = now;
            }
            self.inodes.save(old_parent, &old_parent_record).await?;

            if let Some(record) = new_parent_record.as_mut() {
                if let Inode::Directory(new_dir) = record {
                    if target.is_none() {
                        new_dir.entry_count += 1;
                    }
                    new_dir.mtime = now;
                    new_dir.ctime = now;
                }
                self.inodes.save(new_parent, record).await?;
            }
            return Ok(());
        }
    }

    pub async fn getxattr(&self, inode: InodeId, name: &str) -> Result<Bytes, FsError> {
        self.inodes.get(inode).await?;
        self.xattrs
            .get(inode, name)
            .await?
            .ok_or(FsError::XattrNotFound)
    }

    pub async fn setxattr(
        &self,
        inode: InodeId,
        name: &str,
        value: Bytes,
    ) -> Result<(), FsError> {
        validate_name(name)?;
        let _guard = self.locks.lock(inode).await;
        self.inodes.get(inode).await?;
        self.xattrs.set(inode, name, value).await
    }

    pub async fn listxattr(&self, inode: InodeId) -> Result<Vec<String>, FsError> {
        self.inodes.get(inode).await?;
        self.xattrs.list(inode).await
    }

    pub async fn removexattr(&self, inode: InodeId, name: &str) -> Result<(), FsError> {
        let _guard = self.locks.lock(inode).await;
        self.inodes.get(inode).await?;
        if !self.xattrs.remove(inode, name).await? {
            return Err(FsError::XattrNotFound);
        }
        Ok(())
    }

    /// Post-write metadata commit: the size never moves backwards, and the
    /// write's timestamp lands on mtime/ctime.
    pub async fn update(
        &self,
        inode: InodeId,
        block: u64,
        blocksize: u64,
        written: u64,
        ts: i64,
    ) -> Result<(), FsError> {
        let _guard = self.locks.lock(inode).await;
        let mut record = self.inodes.get(inode).await?;
        match &mut record {
            Inode::File(file) => {
                file.size = file.size.max(block * blocksize + written);
                file.mtime = ts;
                file.ctime = ts;
            }
            Inode::Directory(_) => return Err(FsError::IsDirectory),
            Inode::Symlink(_) => return Err(FsError::InvalidArgument),
        }
        self.inodes.save(inode, &record).await
    }
}
