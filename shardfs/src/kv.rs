//! Durable key-value backend shared by the chunk and metadata stores.
//!
//! Chunks and metadata live in one store under distinct key prefixes (see
//! `fs::key_codec`). Absence is always `Ok(None)`; only transport and
//! backend failures are errors.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv backend: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, KvError>;

    /// Replaces any existing value under `key`.
    async fn put(&self, key: &[u8], value: Bytes) -> Result<(), KvError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    /// All pairs whose key starts with `prefix`, in ascending key order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>, KvError>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Bytes>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, KvError> {
        Ok(self.map.read().get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: Bytes) -> Result<(), KvError> {
        self.map.write().insert(key.to_vec(), value);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.map.write().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>, KvError> {
        let map = self.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone()))
            .collect())
    }
}

/// On-disk store backed by rocksdb. rocksdb's API is synchronous, so every
/// call runs on the blocking pool; a disk-bound operation never occupies a
/// runtime worker that could be serving RPC traffic.
pub struct RocksKv {
    db: Arc<DB>,
}

impl RocksKv {
    pub fn open(path: &Path) -> Result<Self, KvError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, KvError>
    where
        F: FnOnce(&DB) -> Result<T, KvError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| KvError::Backend(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl Kv for RocksKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, KvError> {
        let key = key.to_vec();
        self.run_blocking(move |db| {
            db.get(&key)
                .map(|v| v.map(Bytes::from))
                .map_err(|e| KvError::Backend(e.to_string()))
        })
        .await
    }

    async fn put(&self, key: &[u8], value: Bytes) -> Result<(), KvError> {
        let key = key.to_vec();
        self.run_blocking(move |db| {
            db.put(&key, value)
                .map_err(|e| KvError::Backend(e.to_string()))
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        let key = key.to_vec();
        self.run_blocking(move |db| {
            db.delete(&key)
                .map_err(|e| KvError::Backend(e.to_string()))
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>, KvError> {
        let prefix = prefix.to_vec();
        self.run_blocking(move |db| {
            let mut out = Vec::new();
            let iter = db.iterator(IteratorMode::From(&prefix, Direction::Forward));
            for item in iter {
                let (key, value) = item.map_err(|e| KvError::Backend(e.to_string()))?;
                if !key.starts_with(&prefix) {
                    break;
                }
                out.push((Bytes::from(key.into_vec()), Bytes::from(value.into_vec())));
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        assert!(kv.get(b"k").await.unwrap().is_none());

        kv.put(b"k", Bytes::from_static(b"v1")).await.unwrap();
        assert_eq!(kv.get(b"k").await.unwrap().unwrap().as_ref(), b"v1");

        kv.put(b"k", Bytes::from_static(b"v2")).await.unwrap();
        assert_eq!(kv.get(b"k").await.unwrap().unwrap().as_ref(), b"v2");

        kv.delete(b"k").await.unwrap();
        assert!(kv.get(b"k").await.unwrap().is_none());
        kv.delete(b"k").await.unwrap();
    }

    #[tokio::test]
    async fn memory_kv_scan_prefix_is_ordered_and_bounded() {
        let kv = MemoryKv::new();
        kv.put(b"a/2", Bytes::from_static(b"2")).await.unwrap();
        kv.put(b"a/1", Bytes::from_static(b"1")).await.unwrap();
        kv.put(b"b/1", Bytes::from_static(b"x")).await.unwrap();

        let pairs = kv.scan_prefix(b"a/").await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0.as_ref(), b"a/1");
        assert_eq!(pairs[1].0.as_ref(), b"a/2");
    }

    #[tokio::test]
    async fn rocks_kv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let kv = RocksKv::open(dir.path()).unwrap();

        kv.put(b"chunk/1", Bytes::from_static(b"data"))
            .await
            .unwrap();
        kv.put(b"chunk/2", Bytes::from_static(b"more"))
            .await
            .unwrap();
        assert_eq!(
            kv.get(b"chunk/1").await.unwrap().unwrap().as_ref(),
            b"data"
        );
        assert!(kv.get(b"chunk/3").await.unwrap().is_none());

        let pairs = kv.scan_prefix(b"chunk/").await.unwrap();
        assert_eq!(pairs.len(), 2);
    }
}
