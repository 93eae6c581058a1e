use crate::fs::errors::FsError;
use crate::fs::inode::InodeId;
use crate::fs::key_codec::KeyCodec;
use crate::kv::Kv;
use std::sync::Arc;
use tracing::{error, warn};

/// Directory entries are stored one key per (parent, name) pair; enumeration
/// is a prefix scan over the parent's keyspace, collected up front so the
/// result is a stable snapshot.
#[derive(Clone)]
pub struct DirectoryStore {
    kv: Arc<dyn Kv>,
}

impl DirectoryStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, parent: InodeId, name: &str) -> Result<Option<InodeId>, FsError> {
        let data = self
            .kv
            .get(&KeyCodec::dir_entry_key(parent, name))
            .await
            .map_err(|e| {
                error!("dir entry ({parent}, {name:?}): backend get failed: {e}");
                FsError::Io
            })?;

        match data {
            None => Ok(None),
            Some(data) => match KeyCodec::decode_child(&data) {
                Some(child) => Ok(Some(child)),
                None => {
                    warn!("dir entry ({parent}, {name:?}): undecodable value");
                    Err(FsError::Io)
                }
            },
        }
    }

    pub async fn insert(
        &self,
        parent: InodeId,
        name: &str,
        child: InodeId,
    ) -> Result<(), FsError> {
        self.kv
            .put(
                &KeyCodec::dir_entry_key(parent, name),
                KeyCodec::encode_child(child),
            )
            .await
            .map_err(|e| {
                error!("dir entry ({parent}, {name:?}): backend put failed: {e}");
                FsError::Io
            })
    }

    pub async fn remove(&self, parent: InodeId, name: &str) -> Result<(), FsError> {
        self.kv
            .delete(&KeyCodec::dir_entry_key(parent, name))
            .await
            .map_err(|e| {
                error!("dir entry ({parent}, {name:?}): backend delete failed: {e}");
                FsError::Io
            })
    }

    pub async fn list(&self, parent: InodeId) -> Result<Vec<(String, InodeId)>, FsError> {
        let pairs = self
            .kv
            .scan_prefix(&KeyCodec::dir_entry_prefix(parent))
            .await
            .map_err(|e| {
                error!("dir {parent}: backend scan failed: {e}");
                FsError::Io
            })?;

        let mut entries = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let name = match KeyCodec::name_from_key(&key) {
                Some(name) => name.to_string(),
                None => {
                    warn!("dir {parent}: skipping entry with undecodable name");
                    continue;
                }
            };
            match KeyCodec::decode_child(&value) {
                Some(child) => entries.push((name, child)),
                None => warn!("dir {parent}: skipping entry {name:?} with undecodable value"),
            }
        }
        Ok(entries)
    }
}
