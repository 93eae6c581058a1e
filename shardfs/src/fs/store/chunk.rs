use crate::fs::errors::FsError;
use crate::fs::key_codec::{ChunkId, KeyCodec};
use crate::kv::Kv;
use bytes::Bytes;
use std::sync::Arc;
use tracing::error;

/// Narrow adapter over the durable blob store. Absence is `Ok(None)` so that
/// callers can tell a missing block apart from a transport failure.
#[derive(Clone)]
pub struct ChunkStore {
    kv: Arc<dyn Kv>,
}

impl ChunkStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, id: &ChunkId) -> Result<Option<Bytes>, FsError> {
        self.kv.get(&KeyCodec::chunk_key(id)).await.map_err(|e| {
            error!("failed to read chunk {id}: {e}");
            FsError::Io
        })
    }

    /// Replaces any existing blob under `id`. The backend's own atomicity is
    /// what makes a failed put leave the prior blob intact.
    pub async fn put(&self, id: &ChunkId, data: Bytes) -> Result<(), FsError> {
        self.kv
            .put(&KeyCodec::chunk_key(id), data)
            .await
            .map_err(|e| {
                error!("failed to write chunk {id}: {e}");
                FsError::Io
            })
    }
}
