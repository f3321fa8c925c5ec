//! Write commands
//!
//! A command is stamped with the topology id it was dispatched under.
//! The retry supervisor re-stamps it and marks it as a retry, which
//! relaxes its value matcher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::invocation::CommandInvocationId;
use super::matcher::ValueMatcher;

/// Cache key
pub type Key = Vec<u8>;

/// Cache value
pub type Value = Vec<u8>;

/// Entry metadata stored alongside a value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Lifespan in milliseconds, `None` for immortal entries
    pub lifespan_ms: Option<u64>,
}

impl Metadata {
    /// Metadata with a lifespan
    pub fn with_lifespan(lifespan_ms: u64) -> Self {
        Self {
            lifespan_ms: Some(lifespan_ms),
        }
    }
}

/// Whether the caller waits for replica acknowledgments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Wait until the primary and every live backup acknowledged
    Sync,
    /// Send and return; nobody acknowledges
    Async,
}

impl Durability {
    /// Whether acknowledgments are collected
    pub fn is_sync(&self) -> bool {
        matches!(self, Durability::Sync)
    }
}

/// Per-command flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFlags {
    /// The caller does not need the previous value
    pub ignore_return_values: bool,
    /// Best-effort write that swallows every error
    pub put_for_external_read: bool,
}

/// One entry of a batch write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Key
    pub key: Key,
    /// Value
    pub value: Value,
    /// Metadata
    pub metadata: Metadata,
}

impl BatchEntry {
    /// Entry with default metadata
    pub fn new(key: Key, value: Value) -> Self {
        Self {
            key,
            value,
            metadata: Metadata::default(),
        }
    }
}

/// What a write does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    /// Store `value` if `matcher` holds
    Put {
        key: Key,
        value: Value,
        metadata: Metadata,
        matcher: ValueMatcher,
    },
    /// Remove the entry if `matcher` holds
    Remove { key: Key, matcher: ValueMatcher },
    /// Replace an existing value if `matcher` holds
    Replace {
        key: Key,
        value: Value,
        metadata: Metadata,
        matcher: ValueMatcher,
    },
    /// Unconditionally store every entry
    PutAll { entries: Vec<BatchEntry> },
}

impl WriteKind {
    /// Unconditional put
    pub fn put(key: Key, value: Value) -> Self {
        WriteKind::Put {
            key,
            value,
            metadata: Metadata::default(),
            matcher: ValueMatcher::Always,
        }
    }

    /// Put only when no value is present
    pub fn put_if_absent(key: Key, value: Value) -> Self {
        WriteKind::Put {
            key,
            value,
            metadata: Metadata::default(),
            matcher: ValueMatcher::Expected(None),
        }
    }

    /// Unconditional remove
    pub fn remove(key: Key) -> Self {
        WriteKind::Remove {
            key,
            matcher: ValueMatcher::Always,
        }
    }

    /// Remove only when the current value equals `expected`
    pub fn remove_if(key: Key, expected: Value) -> Self {
        WriteKind::Remove {
            key,
            matcher: ValueMatcher::Expected(Some(expected)),
        }
    }

    /// Replace whatever value is present
    pub fn replace(key: Key, value: Value) -> Self {
        WriteKind::Replace {
            key,
            value,
            metadata: Metadata::default(),
            matcher: ValueMatcher::NonNull,
        }
    }

    /// Replace only when the current value equals `expected`
    pub fn replace_if(key: Key, expected: Value, value: Value) -> Self {
        WriteKind::Replace {
            key,
            value,
            metadata: Metadata::default(),
            matcher: ValueMatcher::Expected(Some(expected)),
        }
    }

    /// Unconditional multi-key put
    pub fn put_all(entries: Vec<BatchEntry>) -> Self {
        WriteKind::PutAll { entries }
    }

    /// Attach metadata to a put or replace
    pub fn with_metadata(mut self, new_metadata: Metadata) -> Self {
        match &mut self {
            WriteKind::Put { metadata, .. } | WriteKind::Replace { metadata, .. } => {
                *metadata = new_metadata;
            }
            WriteKind::Remove { .. } | WriteKind::PutAll { .. } => {}
        }
        self
    }

    /// Key of a single-key write
    pub fn key(&self) -> Option<&Key> {
        match self {
            WriteKind::Put { key, .. }
            | WriteKind::Remove { key, .. }
            | WriteKind::Replace { key, .. } => Some(key),
            WriteKind::PutAll { .. } => None,
        }
    }

    /// Whether this write's outcome depends on the existing value
    pub fn is_conditional(&self) -> bool {
        match self {
            WriteKind::Put { matcher, .. }
            | WriteKind::Remove { matcher, .. }
            | WriteKind::Replace { matcher, .. } => *matcher != ValueMatcher::Always,
            WriteKind::PutAll { .. } => false,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            WriteKind::Put { .. } => "put",
            WriteKind::Remove { .. } => "remove",
            WriteKind::Replace { .. } => "replace",
            WriteKind::PutAll { .. } => "put_all",
        }
    }
}

/// A write travelling from the originator to a primary owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCommand {
    id: CommandInvocationId,
    topology_id: u64,
    kind: WriteKind,
    flags: CommandFlags,
    durability: Durability,
    retry: bool,
}

impl WriteCommand {
    /// Create a fresh (non-retry, unstamped) command.
    pub fn new(id: CommandInvocationId, kind: WriteKind) -> Self {
        Self {
            id,
            topology_id: 0,
            kind,
            flags: CommandFlags::default(),
            durability: Durability::Sync,
            retry: false,
        }
    }

    /// Set the flags
    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the durability
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Invocation id
    pub fn id(&self) -> &CommandInvocationId {
        &self.id
    }

    /// Topology id this attempt was dispatched under
    pub fn topology_id(&self) -> u64 {
        self.topology_id
    }

    /// Stamp the topology id of the current attempt
    pub fn set_topology_id(&mut self, topology_id: u64) {
        self.topology_id = topology_id;
    }

    /// The write itself
    pub fn kind(&self) -> &WriteKind {
        &self.kind
    }

    /// Flags
    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    /// Durability
    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Whether primaries and backups must acknowledge this write
    pub fn ack_required(&self) -> bool {
        self.durability.is_sync()
    }

    /// Whether this is a re-dispatch after a topology change
    pub fn is_retry(&self) -> bool {
        self.retry
    }

    /// Mark as a retry and relax the value matcher.
    ///
    /// Idempotent: relaxing an already relaxed matcher changes nothing.
    pub fn mark_retry(&mut self) {
        self.retry = true;
        match &mut self.kind {
            WriteKind::Put { matcher, .. }
            | WriteKind::Remove { matcher, .. }
            | WriteKind::Replace { matcher, .. } => {
                *matcher = matcher.for_retry();
            }
            WriteKind::PutAll { .. } => {}
        }
    }

    /// Same command restricted to a subset of a batch.
    ///
    /// Each primary of a batch receives only the entries it owns.
    pub fn with_entries(&self, entries: Vec<BatchEntry>) -> Self {
        Self {
            kind: WriteKind::PutAll { entries },
            ..self.clone()
        }
    }
}

/// Value handed back to the caller once a write completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnValue {
    /// Previous value of a single-key write
    Single(Option<Value>),
    /// Previous values of a batch write
    Map(BTreeMap<Key, Value>),
}

impl ReturnValue {
    /// Empty result of the same shape as `kind` produces
    pub fn empty_for(kind: &WriteKind) -> Self {
        match kind {
            WriteKind::PutAll { .. } => ReturnValue::Map(BTreeMap::new()),
            _ => ReturnValue::Single(None),
        }
    }

    /// The previous value of a single-key write
    pub fn into_single(self) -> Option<Value> {
        match self {
            ReturnValue::Single(value) => value,
            ReturnValue::Map(_) => None,
        }
    }

    /// The previous values of a batch write
    pub fn into_map(self) -> BTreeMap<Key, Value> {
        match self {
            ReturnValue::Map(values) => values,
            ReturnValue::Single(_) => BTreeMap::new(),
        }
    }
}
