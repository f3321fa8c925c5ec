//! Primary-side key stripe locks
//!
//! A primary applies a write and enqueues its backup forwards under the
//! key's stripe lock, so for any key the apply order equals the FIFO send
//! order backups observe. Batches take every stripe they touch in
//! ascending index order.

use std::sync::{Mutex, MutexGuard};

use crate::errors::{CacheError, CacheResult};

/// Fixed set of mutexes selected by key hash
#[derive(Debug)]
pub struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    /// Create `count` stripes. `count` must be a power of two.
    pub fn new(count: usize) -> CacheResult<Self> {
        if count == 0 || !count.is_power_of_two() {
            return Err(CacheError::Config(format!(
                "lock_stripes must be a power of two, got {}",
                count
            )));
        }
        Ok(Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        })
    }

    /// Number of stripes
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false; a lock set has at least one stripe
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    fn index(&self, key: &[u8]) -> usize {
        crc32fast::hash(key) as usize & (self.stripes.len() - 1)
    }

    fn acquire(&self, index: usize) -> MutexGuard<'_, ()> {
        self.stripes[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the stripe of one key
    pub fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.acquire(self.index(key))
    }

    /// Lock the stripes of several keys without deadlocking against other
    /// batches.
    pub fn lock_all<'a, I>(&self, keys: I) -> Vec<MutexGuard<'_, ()>>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut indices: Vec<usize> = keys.into_iter().map(|key| self.index(key)).collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|index| self.acquire(index)).collect()
    }
}
