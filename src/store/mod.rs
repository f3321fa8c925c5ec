//! Storage Engine Interface
//!
//! The write path needs two operations from local storage:
//! - `apply_write`: evaluate a command's matcher against the existing value
//!   and apply it atomically, reporting the previous value and success
//! - `apply_backup_write`: apply an already-decided change with no checks
//!
//! [`InMemoryStore`] is the engine used by local clusters and tests.

mod memory;

pub use memory::{InMemoryStore, StoredEntry};

use crate::command::{BackupOp, Key, Value, WriteKind};
use crate::errors::CacheResult;

/// Result of executing a write on the primary owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Value before the write (or the expected value when a retry found
    /// its own earlier effect)
    pub previous: Option<Value>,
    /// Whether the write took effect
    pub success: bool,
    /// Change backups must apply, present only on success
    pub backup: Option<BackupOp>,
}

impl Applied {
    /// A write that took effect
    pub fn success(previous: Option<Value>, backup: BackupOp) -> Self {
        Self {
            previous,
            success: true,
            backup: Some(backup),
        }
    }

    /// A write that did not take effect
    pub fn rejected(previous: Option<Value>) -> Self {
        Self {
            previous,
            success: false,
            backup: None,
        }
    }
}

/// Local key/value storage
pub trait StorageEngine: Send + Sync {
    /// Execute a single-key write as the primary owner.
    fn apply_write(&self, kind: &WriteKind) -> CacheResult<Applied>;

    /// Apply a change decided by the primary owner.
    fn apply_backup_write(&self, key: &Key, op: &BackupOp) -> CacheResult<()>;

    /// Local lookup
    fn get(&self, key: &[u8]) -> Option<Value>;
}
