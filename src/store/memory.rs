//! In-memory storage engine

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use super::{Applied, StorageEngine};
use crate::command::{BackupOp, Key, Metadata, Value, ValueMatcher, WriteKind};
use crate::errors::{CacheError, CacheResult};

/// A stored value with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Value
    pub value: Value,
    /// Metadata
    pub metadata: Metadata,
}

/// HashMap-backed storage engine
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<Key, StoredEntry>>,
    faulty_keys: Mutex<HashSet<Key>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `key` fail with a storage error.
    pub fn fail_writes_to(&self, key: &[u8]) {
        self.faulty_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_vec());
    }

    /// Undo [`InMemoryStore::fail_writes_to`]
    pub fn heal(&self, key: &[u8]) {
        self.faulty_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }

    /// Stored entry with metadata
    pub fn entry(&self, key: &[u8]) -> Option<StoredEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_fault(&self, key: &[u8]) -> CacheResult<()> {
        let faulty = self
            .faulty_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if faulty.contains(key) {
            return Err(CacheError::Storage(format!(
                "injected fault writing key {}",
                String::from_utf8_lossy(key)
            )));
        }
        Ok(())
    }

    fn store(
        entries: &mut HashMap<Key, StoredEntry>,
        key: &Key,
        value: &Value,
        metadata: &Metadata,
        matcher: &ValueMatcher,
    ) -> Applied {
        let existing = entries.get(key).map(|e| &e.value);
        if !matcher.matches(existing, Some(value)) {
            return Applied::rejected(existing.cloned());
        }

        let previous = if matcher.matched_by_new_value(existing, Some(value)) {
            matcher.expected().cloned()
        } else {
            existing.cloned()
        };

        entries.insert(
            key.clone(),
            StoredEntry {
                value: value.clone(),
                metadata: metadata.clone(),
            },
        );
        Applied::success(
            previous,
            BackupOp::Write {
                value: value.clone(),
                metadata: metadata.clone(),
            },
        )
    }
}

impl StorageEngine for InMemoryStore {
    fn apply_write(&self, kind: &WriteKind) -> CacheResult<Applied> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match kind {
            WriteKind::Put {
                key,
                value,
                metadata,
                matcher,
            }
            | WriteKind::Replace {
                key,
                value,
                metadata,
                matcher,
            } => {
                self.check_fault(key)?;
                Ok(Self::store(&mut entries, key, value, metadata, matcher))
            }
            WriteKind::Remove { key, matcher } => {
                self.check_fault(key)?;
                let existing = entries.get(key).map(|e| &e.value);
                if !matcher.matches(existing, None) {
                    return Ok(Applied::rejected(existing.cloned()));
                }
                if matcher.matched_by_new_value(existing, None) {
                    // An earlier attempt already removed it
                    return Ok(Applied::success(matcher.expected().cloned(), BackupOp::Remove));
                }
                match entries.remove(key) {
                    Some(previous) => Ok(Applied::success(Some(previous.value), BackupOp::Remove)),
                    None => Ok(Applied::rejected(None)),
                }
            }
            WriteKind::PutAll { .. } => Err(CacheError::Storage(
                "batch writes are applied entry by entry".to_string(),
            )),
        }
    }

    fn apply_backup_write(&self, key: &Key, op: &BackupOp) -> CacheResult<()> {
        self.check_fault(key)?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match op {
            BackupOp::Write { value, metadata } => {
                entries.insert(
                    key.clone(),
                    StoredEntry {
                        value: value.clone(),
                        metadata: metadata.clone(),
                    },
                );
            }
            BackupOp::Remove => {
                entries.remove(key);
            }
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Option<Value> {
        self.entry(key).map(|e| e.value)
    }
}
