use crate::fs::errors::FsError;
use crate::fs::inode::InodeId;
use crate::fs::key_codec::KeyCodec;
use crate::kv::Kv;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, warn};

/// Extended attributes: opaque byte values keyed by (inode, name). Their
/// lifetime is bound to the inode; `remove_all` runs at inode destruction.
#[derive(Clone)]
pub struct XattrStore {
    kv: Arc<dyn Kv>,
}

impl XattrStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, inode: InodeId, name: &str) -> Result<Option<Bytes>, FsError> {
        self.kv
            .get(&KeyCodec::xattr_key(inode, name))
            .await
            .map_err(|e| {
                error!("xattr ({inode}, {name:?}): backend get failed: {e}");
                FsError::Io
            })
    }

    pub async fn set(&self, inode: InodeId, name: &str, value: Bytes) -> Result<(), FsError> {
        self.kv
            .put(&KeyCodec::xattr_key(inode, name), value)
            .await
            .map_err(|e| {
                error!("xattr ({inode}, {name:?}): backend put failed: {e}");
                FsError::Io
            })
    }

    /// Returns whether the attribute existed.
    pub async fn remove(&self, inode: InodeId, name: &str) -> Result<bool, FsError> {
        if self.get(inode, name).await?.is_none() {
            return Ok(false);
        }
        self.kv
            .delete(&KeyCodec::xattr_key(inode, name))
            .await
            .map_err(|e| {
                error!("xattr ({inode}, {name:?}): backend delete failed: {e}");
                FsError::Io
            })?;
        Ok(true)
    }

    pub async fn list(&self, inode: InodeId) -> Result<Vec<String>, FsError> {
        let pairs = self
            .kv
            .scan_prefix(&KeyCodec::xattr_prefix(inode))
            .await
            .map_err(|e| {
                error!("xattrs for {inode}: backend scan failed: {e}");
                FsError::Io
            })?;

        let mut names = Vec::with_capacity(pairs.len());
        for (key, _) in pairs {
            match KeyCodec::name_from_key(&key) {
                Some(name) => names.push(name.to_string()),
                None => warn!("xattrs for {inode}: skipping undecodable name"),
            }
        }
        Ok(names)
    }

    pub async fn remove_all(&self, inode: InodeId) -> Result<(), FsError> {
        for name in self.list(inode).await? {
            self.remove(inode, &name).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn set_get_list_remove() {
        let store = XattrStore::new(Arc::new(MemoryKv::new()));

        assert!(store.get(5, "user.tag").await.unwrap().is_none());
        store
            .set(5, "user.tag", Bytes::from_static(b"blue"))
            .await
            .unwrap();
        store
            .set(5, "user.other", Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert_eq!(
            store.get(5, "user.tag").await.unwrap().unwrap().as_ref(),
            b"blue"
        );

        let mut names = store.list(5).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["user.other", "user.tag"]);

        assert!(store.remove(5, "user.tag").await.unwrap());
        assert!(!store.remove(5, "user.tag").await.unwrap());

        store.remove_all(5).await.unwrap();
        assert!(store.list(5).await.unwrap().is_empty());
    }
}
