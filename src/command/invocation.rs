//! Command invocation ids

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::topology::Address;

/// Globally unique id of one logical write.
///
/// Correlates the dispatch, every acknowledgment and every retry of that
/// write. Retries reuse the id with a new topology stamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandInvocationId {
    origin: Address,
    sequence: u64,
}

impl CommandInvocationId {
    /// Create an id for `origin`.
    pub fn new(origin: Address, sequence: u64) -> Self {
        Self { origin, sequence }
    }

    /// Node that issued the write and collects its acknowledgments
    pub fn origin(&self) -> &Address {
        &self.origin
    }

    /// Per-origin sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for CommandInvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.sequence)
    }
}

/// Hands out invocation ids for one node
#[derive(Debug)]
pub struct InvocationIdGenerator {
    origin: Address,
    next: AtomicU64,
}

impl InvocationIdGenerator {
    /// Create a generator starting at sequence 1.
    pub fn new(origin: Address) -> Self {
        Self {
            origin,
            next: AtomicU64::new(1),
        }
    }

    /// Next unused id
    pub fn next_id(&self) -> CommandInvocationId {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        CommandInvocationId::new(self.origin.clone(), sequence)
    }
}
