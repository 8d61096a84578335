use super::{Pager, PhysicalKey};
use bytes::Bytes;
use mtree_result::{Error, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Pager holding every blob in process memory.
///
/// Keys start at 1 and are never reused, so a freed part can not be confused
/// with a later one.
#[derive(Debug)]
pub struct MemPager {
    next_key: AtomicU64,
    blobs: Mutex<BTreeMap<PhysicalKey, Bytes>>,
}

impl Default for MemPager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemPager {
    pub fn new() -> Self {
        Self {
            next_key: AtomicU64::new(1),
            blobs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Total size of the stored blobs.
    pub fn stored_bytes(&self) -> Result<usize> {
        Ok(self.blobs()?.values().map(Bytes::len).sum())
    }

    fn blobs(&self) -> Result<MutexGuard<'_, BTreeMap<PhysicalKey, Bytes>>> {
        self.blobs
            .lock()
            .map_err(|_| Error::Internal("MemPager blobs lock poisoned".into()))
    }
}

impl Pager for MemPager {
    fn put(&self, blob: Bytes) -> Result<PhysicalKey> {
        let key = self
            .next_key
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| cur.checked_add(1))
            .map_err(|_| Error::Internal("physical key space overflow".into()))?;
        self.blobs()?.insert(key, blob);
        Ok(key)
    }

    fn get(&self, key: PhysicalKey) -> Result<Option<Bytes>> {
        Ok(self.blobs()?.get(&key).cloned())
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<usize> {
        let mut blobs = self.blobs()?;
        Ok(keys.iter().filter(|k| blobs.remove(k).is_some()).count())
    }

    fn keys(&self) -> Result<Vec<PhysicalKey>> {
        Ok(self.blobs()?.keys().copied().collect())
    }
}
