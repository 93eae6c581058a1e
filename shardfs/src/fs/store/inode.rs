use crate::fs::errors::FsError;
use crate::fs::inode::{Inode, InodeId};
use crate::fs::key_codec::KeyCodec;
use crate::kv::Kv;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct InodeStore {
    kv: Arc<dyn Kv>,
}

impl InodeStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, inode: InodeId) -> Result<Inode, FsError> {
        self.try_get(inode).await?.ok_or(FsError::NotFound)
    }

    pub async fn try_get(&self, inode: InodeId) -> Result<Option<Inode>, FsError> {
        let data = self
            .kv
            .get(&KeyCodec::inode_key(inode))
            .await
            .map_err(|e| {
                error!("inode {inode}: backend get failed: {e}");
                FsError::Io
            })?;

        match data {
            None => Ok(None),
            Some(data) => bincode::deserialize(&data).map(Some).map_err(|e| {
                warn!("inode {inode}: undecodable record ({} bytes): {e}", data.len());
                FsError::Io
            }),
        }
    }

    pub async fn save(&self, inode: InodeId, record: &Inode) -> Result<(), FsError> {
        let data = bincode::serialize(record).map_err(|e| {
            error!("inode {inode}: serialization failed: {e}");
            FsError::Io
        })?;
        self.kv
            .put(&KeyCodec::inode_key(inode), Bytes::from(data))
            .await
            .map_err(|e| {
                error!("inode {inode}: backend put failed: {e}");
                FsError::Io
            })
    }

    pub async fn delete(&self, inode: InodeId) -> Result<(), FsError> {
        self.kv
            .delete(&KeyCodec::inode_key(inode))
            .await
            .map_err(|e| {
                error!("inode {inode}: backend delete failed: {e}");
                FsError::Io
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::types::Attr;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn save_get_delete() {
        let store = InodeStore::new(Arc::new(MemoryKv::new()));
        let attr = Attr {
            inode: 12,
            mode: 0o644,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 1,
            mtime: 1,
            ctime: 1,
            crtime: 1,
        };

        assert_eq!(store.get(12).await.unwrap_err(), FsError::NotFound);

        let record = Inode::new_from_attr(&attr, false);
        store.save(12, &record).await.unwrap();
        assert!(store.get(12).await.unwrap().is_file());

        store.delete(12).await.unwrap();
        assert_eq!(store.get(12).await.unwrap_err(), FsError::NotFound);
    }
}
