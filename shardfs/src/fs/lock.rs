use super::inode::InodeId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-inode mutation locks. Operations on disjoint inodes never contend;
/// multi-inode operations must acquire through [`LockManager::lock_many`] so
/// that locks are always taken in ascending inode order.
#[derive(Default)]
pub struct LockManager {
    locks: DashMap<InodeId, Arc<Mutex<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, inode: InodeId) -> Arc<Mutex<()>> {
        self.locks
            .entry(inode)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, inode: InodeId) -> OwnedMutexGuard<()> {
        self.slot(inode).lock_owned().await
    }

    pub async fn lock_many(&self, inodes: &[InodeId]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted = inodes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for inode in sorted {
            guards.push(self.lock(inode).await);
        }
        guards
    }
}
