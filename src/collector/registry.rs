//! Process-wide collector registry
//!
//! Maps each in-flight [`CommandInvocationId`] to its [`Collector`]. The
//! map lock only guards insert/lookup/remove; acknowledgments are applied
//! under the collector's own lock after the map lock is released, so
//! different operations never contend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use super::state::{AckOutcome, Collector, CompletionReceiver};
use crate::command::{CommandInvocationId, Key, ReturnValue, Value};
use crate::errors::{CacheError, CacheResult};
use crate::observability::{log_event, Event, ReplicationMetrics};
use crate::topology::{Address, Segment};

struct Entry {
    collector: Arc<Collector>,
    receiver: Mutex<Option<CompletionReceiver>>,
}

/// Registry of acknowledgment collectors on an originating node
pub struct CommandAckCollector {
    collectors: RwLock<HashMap<CommandInvocationId, Arc<Entry>>>,
    metrics: Arc<ReplicationMetrics>,
}

impl std::fmt::Debug for CommandAckCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAckCollector")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl CommandAckCollector {
    /// Create an empty registry reporting to `metrics`
    pub fn new(metrics: Arc<ReplicationMetrics>) -> Self {
        Self {
            collectors: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Number of registered collectors
    pub fn len(&self) -> usize {
        self.collectors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether no collector is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a collector is registered for `id`
    pub fn contains(&self, id: &CommandInvocationId) -> bool {
        self.lookup(id).is_some()
    }

    /// Register a single-key collector waiting for every owner.
    ///
    /// First writer wins: an existing collector for `id` is kept.
    pub fn create(
        &self,
        id: CommandInvocationId,
        owners: &[Address],
        topology_id: u64,
    ) -> CacheResult<()> {
        let (collector, receiver) =
            Collector::single(id, owners, topology_id).ok_or(CacheError::NoOwners(topology_id))?;
        self.register(collector, receiver);
        Ok(())
    }

    /// Register a single-key collector whose primary result is already
    /// known. Completes immediately when there are no backups.
    pub fn create_with_result(
        &self,
        id: CommandInvocationId,
        primary: Address,
        value: Option<Value>,
        backups: &[Address],
        topology_id: u64,
    ) {
        let (collector, receiver) = Collector::with_result(id, primary, value, backups, topology_id);
        self.register(collector, receiver);
    }

    /// Register a batch collector
    pub fn create_batch(
        &self,
        id: CommandInvocationId,
        primaries: BTreeMap<Address, BTreeSet<Segment>>,
        backups: BTreeMap<Address, BTreeSet<Segment>>,
        topology_id: u64,
    ) {
        let (collector, receiver) = Collector::batch(id, primaries, backups, topology_id);
        self.register(collector, receiver);
    }

    fn register(&self, collector: Collector, receiver: CompletionReceiver) {
        let id = collector.id().clone();
        let topology_id = collector.topology_id().to_string();
        let mut collectors = self
            .collectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if collectors.contains_key(&id) {
            log_event(Event::CollectorDuplicate, &[("id", &id.to_string())]);
            return;
        }
        collectors.insert(
            id.clone(),
            Arc::new(Entry {
                collector: Arc::new(collector),
                receiver: Mutex::new(Some(receiver)),
            }),
        );
        drop(collectors);

        log_event(
            Event::CollectorCreated,
            &[("id", &id.to_string()), ("topology_id", &topology_id)],
        );
    }

    fn lookup(&self, id: &CommandInvocationId) -> Option<Arc<Entry>> {
        self.collectors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    /// Remove `entry` if it is still the one registered for `id`
    fn remove(&self, id: &CommandInvocationId, entry: &Arc<Entry>) {
        let mut collectors = self
            .collectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if collectors
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            collectors.remove(id);
        }
    }

    /// Apply an acknowledgment to the collector for `id`, recording
    /// dropped acknowledgments.
    fn apply<F>(&self, id: &CommandInvocationId, from: &Address, topology_id: u64, ack: F) -> AckOutcome
    where
        F: FnOnce(&Collector) -> AckOutcome,
    {
        self.metrics.increment_acks_received();
        let Some(entry) = self.lookup(id) else {
            self.metrics.increment_orphaned_acks();
            log_event(
                Event::AckOrphaned,
                &[("from", from.as_str()), ("id", &id.to_string())],
            );
            return AckOutcome::Ignored;
        };

        let outcome = ack(&entry.collector);
        if outcome == AckOutcome::Stale {
            self.metrics.increment_stale_acks();
            log_event(
                Event::AckStale,
                &[
                    ("expected", &entry.collector.topology_id().to_string()),
                    ("from", from.as_str()),
                    ("id", &id.to_string()),
                    ("topology_id", &topology_id.to_string()),
                ],
            );
        }
        outcome
    }

    /// Primary acknowledgment of a single-key write
    pub fn primary_ack(
        &self,
        id: &CommandInvocationId,
        from: &Address,
        value: Option<Value>,
        success: bool,
        topology_id: u64,
    ) -> AckOutcome {
        self.apply(id, from, topology_id, |collector| {
            collector.primary_ack(from, value, success, topology_id)
        })
    }

    /// Backup acknowledgment of a single-key write
    pub fn backup_ack(&self, id: &CommandInvocationId, from: &Address, topology_id: u64) -> AckOutcome {
        self.apply(id, from, topology_id, |collector| {
            collector.backup_ack(from, topology_id)
        })
    }

    /// One primary's acknowledgment of its share of a batch
    pub fn batch_primary_ack(
        &self,
        id: &CommandInvocationId,
        from: &Address,
        segments: &BTreeSet<Segment>,
        previous: Vec<(Key, Value)>,
        topology_id: u64,
    ) -> AckOutcome {
        self.apply(id, from, topology_id, |collector| {
            collector.batch_primary_ack(from, segments, previous, topology_id)
        })
    }

    /// One backup's acknowledgment of some segments of a batch
    pub fn batch_backup_ack(
        &self,
        id: &CommandInvocationId,
        from: &Address,
        segments: &BTreeSet<Segment>,
        topology_id: u64,
    ) -> AckOutcome {
        self.apply(id, from, topology_id, |collector| {
            collector.batch_backup_ack(from, segments, topology_id)
        })
    }

    /// Fail the operation `id` with `error`
    pub fn complete_exceptionally(
        &self,
        id: &CommandInvocationId,
        from: &Address,
        error: CacheError,
        topology_id: u64,
    ) -> AckOutcome {
        self.apply(id, from, topology_id, |collector| {
            collector.complete_exceptionally(error, topology_id)
        })
    }

    /// Re-evaluate every live collector against the new member list.
    pub fn on_members_change(&self, live: &[Address]) {
        let entries: Vec<Arc<Entry>> = self
            .collectors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        for entry in entries {
            self.reevaluate(&entry, live);
        }
    }

    /// Re-evaluate the collector for `id` alone against `live`.
    ///
    /// For a collector registered after the view it was stamped with was
    /// already replaced: the membership listeners ran before it existed.
    pub fn catch_up_membership(&self, id: &CommandInvocationId, live: &[Address]) {
        if let Some(entry) = self.lookup(id) {
            self.reevaluate(&entry, live);
        }
    }

    fn reevaluate(&self, entry: &Entry, live: &[Address]) {
        let id = entry.collector.id().to_string();
        let outcome = entry.collector.on_members_change(live);
        if outcome.primary_departed {
            self.metrics.increment_primaries_departed();
            log_event(Event::PrimaryDeparted, &[("id", &id)]);
        }
        for backup in &outcome.waived {
            self.metrics.increment_backups_waived();
            log_event(
                Event::BackupWaived,
                &[("backup", backup.as_str()), ("id", &id)],
            );
        }
    }

    /// Wait for the operation `id` to complete.
    ///
    /// Returns `fallback` at once when no collector is registered (nothing
    /// is pending) or when another caller is already waiting on it. The
    /// collector is removed when this returns, whether it completed or
    /// timed out.
    pub async fn await_completion(
        &self,
        id: &CommandInvocationId,
        timeout: Duration,
        fallback: ReturnValue,
    ) -> CacheResult<ReturnValue> {
        let Some(entry) = self.lookup(id) else {
            return Ok(fallback);
        };
        let receiver = entry
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(receiver) = receiver else {
            return Ok(fallback);
        };

        let result = tokio::time::timeout(timeout, receiver).await;
        self.remove(id, &entry);

        match result {
            Ok(Ok(outcome)) => {
                match &outcome {
                    Ok(_) => log_event(Event::CollectorComplete, &[("id", &id.to_string())]),
                    Err(err) => log_event(
                        Event::CollectorFailed,
                        &[("error", err.code()), ("id", &id.to_string())],
                    ),
                }
                outcome
            }
            // Completion dropped: the collector was disposed
            Ok(Err(_)) => Err(CacheError::outdated_topology()),
            Err(_) => {
                self.metrics.increment_timeouts();
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                log_event(
                    Event::AckTimeout,
                    &[("id", &id.to_string()), ("timeout_ms", &timeout_ms.to_string())],
                );
                Err(CacheError::Timeout {
                    id: id.clone(),
                    timeout_ms,
                })
            }
        }
    }

    /// Remove the collector for `id` without completing it
    pub fn dispose(&self, id: &CommandInvocationId) {
        self.collectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }
}
