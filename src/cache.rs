//! Cache API
//!
//! The upward surface of one node. Every write goes through the node's
//! retry supervisor; reads are local lookups.
//!
//! Conditional operations report whether they applied. Under `async`
//! durability the originator learns nothing back from a remote primary, so
//! they report `false` and previous values are `None`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::command::{
    BatchEntry, CommandFlags, Durability, Key, Metadata, Value, WriteCommand, WriteKind,
};
use crate::errors::CacheResult;
use crate::node::CacheNode;

/// Handle to a replicated cache through one node
#[derive(Debug, Clone)]
pub struct ReplicatedCache {
    node: Arc<CacheNode>,
    durability: Durability,
    flags: CommandFlags,
}

impl ReplicatedCache {
    /// Cache handle using the node's configured durability
    pub fn new(node: Arc<CacheNode>) -> Self {
        let durability = node.config().mode;
        Self {
            node,
            durability,
            flags: CommandFlags::default(),
        }
    }

    /// Same cache with a different durability
    pub fn with_durability(&self, durability: Durability) -> Self {
        Self {
            durability,
            ..self.clone()
        }
    }

    /// Same cache, not asking for previous values
    pub fn ignoring_return_values(&self) -> Self {
        let mut flags = self.flags;
        flags.ignore_return_values = true;
        Self {
            flags,
            ..self.clone()
        }
    }

    /// Node this handle writes through
    pub fn node(&self) -> &Arc<CacheNode> {
        &self.node
    }

    /// Local lookup
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.node.get(key)
    }

    /// Store `value`, returning the previous value
    pub async fn put(&self, key: Key, value: Value) -> CacheResult<Option<Value>> {
        self.single(WriteKind::put(key, value)).await
    }

    /// Store `value` with `metadata`, returning the previous value
    pub async fn put_with_metadata(
        &self,
        key: Key,
        value: Value,
        metadata: Metadata,
    ) -> CacheResult<Option<Value>> {
        self.single(WriteKind::put(key, value).with_metadata(metadata))
            .await
    }

    /// Store `value` unless a value is present.
    ///
    /// Returns the present value, or `None` when `value` was stored.
    pub async fn put_if_absent(&self, key: Key, value: Value) -> CacheResult<Option<Value>> {
        self.single(WriteKind::put_if_absent(key, value)).await
    }

    /// Replace a present value, returning it (`None`: nothing replaced)
    pub async fn replace(&self, key: Key, value: Value) -> CacheResult<Option<Value>> {
        self.single(WriteKind::replace(key, value)).await
    }

    /// Replace the value only if it equals `expected`
    pub async fn replace_if(&self, key: Key, expected: Value, value: Value) -> CacheResult<bool> {
        let previous = self
            .single(WriteKind::replace_if(key, expected.clone(), value))
            .await?;
        Ok(previous.as_ref() == Some(&expected))
    }

    /// Remove the entry, returning the removed value
    pub async fn remove(&self, key: Key) -> CacheResult<Option<Value>> {
        self.single(WriteKind::remove(key)).await
    }

    /// Remove the entry only if its value equals `expected`
    pub async fn remove_if(&self, key: Key, expected: Value) -> CacheResult<bool> {
        let previous = self
            .single(WriteKind::remove_if(key, expected.clone()))
            .await?;
        Ok(previous.as_ref() == Some(&expected))
    }

    /// Store every entry, returning the previous values of keys that had one
    pub async fn put_all(&self, entries: Vec<BatchEntry>) -> CacheResult<BTreeMap<Key, Value>> {
        let command = self.command(WriteKind::put_all(entries));
        Ok(self.node.execute(command).await?.into_map())
    }

    /// Best-effort store of a value read from an external source.
    ///
    /// Never overwrites a present value and never fails: errors are logged
    /// and dropped. Always asynchronous, whatever the handle's durability,
    /// so the caller never waits for acknowledgments.
    pub async fn put_for_external_read(&self, key: Key, value: Value) {
        let command = self
            .node
            .new_command(WriteKind::put_if_absent(key, value))
            .with_durability(Durability::Async)
            .with_flags(CommandFlags {
                ignore_return_values: true,
                put_for_external_read: true,
            });
        // The supervisor swallows every error of this command
        let _ = self.node.execute(command).await;
    }

    async fn single(&self, kind: WriteKind) -> CacheResult<Option<Value>> {
        let command = self.command(kind);
        Ok(self.node.execute(command).await?.into_single())
    }

    fn command(&self, kind: WriteKind) -> WriteCommand {
        self.node
            .new_command(kind)
            .with_durability(self.durability)
            .with_flags(self.flags)
    }
}

impl From<Arc<CacheNode>> for ReplicatedCache {
    fn from(node: Arc<CacheNode>) -> Self {
        Self::new(node)
    }
}
