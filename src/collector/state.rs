//! Per-operation acknowledgment state
//!
//! A [`Collector`] is created once, mutated only under its own lock and
//! completed exactly once. The completion channel is consumed on the
//! terminal transition, so every later acknowledgment finds no sender and
//! is a no-op.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::command::{CommandInvocationId, Key, ReturnValue, Value};
use crate::errors::{CacheError, CacheResult};
use crate::topology::{Address, Segment};

pub(crate) type Completion = oneshot::Sender<CacheResult<ReturnValue>>;
pub(crate) type CompletionReceiver = oneshot::Receiver<CacheResult<ReturnValue>>;

/// Effect of one event on a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Accepted, acknowledgments still outstanding
    Pending,
    /// Accepted, and it completed the collector
    Completed,
    /// Tagged with a topology other than the collector's, dropped
    Stale,
    /// Duplicate, unexpected sender, or collector already terminal
    Ignored,
}

/// What a membership change did to a collector
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipOutcome {
    /// Backups whose acknowledgment is no longer awaited
    pub waived: Vec<Address>,
    /// The primary left, the collector failed with the retry signal
    pub primary_departed: bool,
    /// The collector reached a terminal state
    pub completed: bool,
}

/// Owners still expected to acknowledge
#[derive(Debug)]
enum Tracking {
    Single {
        primary: Address,
        primary_acked: bool,
        backups: HashSet<Address>,
    },
    Batch {
        primaries: BTreeMap<Address, BTreeSet<Segment>>,
        backups: BTreeMap<Address, BTreeSet<Segment>>,
    },
}

impl Tracking {
    fn is_done(&self) -> bool {
        match self {
            Tracking::Single {
                primary_acked,
                backups,
                ..
            } => *primary_acked && backups.is_empty(),
            Tracking::Batch { primaries, backups } => primaries.is_empty() && backups.is_empty(),
        }
    }

    fn clear(&mut self) {
        match self {
            Tracking::Single { backups, .. } => backups.clear(),
            Tracking::Batch { primaries, backups } => {
                primaries.clear();
                backups.clear();
            }
        }
    }
}

/// Remove `segments` from `address`'s pending set. Returns whether
/// anything was pending for that address.
fn remove_segments(
    pending: &mut BTreeMap<Address, BTreeSet<Segment>>,
    address: &Address,
    segments: &BTreeSet<Segment>,
) -> bool {
    let Some(outstanding) = pending.get_mut(address) else {
        return false;
    };
    let before = outstanding.len();
    outstanding.retain(|segment| !segments.contains(segment));
    let changed = outstanding.len() != before;
    if outstanding.is_empty() {
        pending.remove(address);
    }
    changed
}

#[derive(Debug)]
struct CollectorState {
    tracking: Tracking,
    value: ReturnValue,
    completion: Option<Completion>,
}

impl CollectorState {
    fn is_terminal(&self) -> bool {
        self.completion.is_none()
    }

    fn finish(&mut self, result: CacheResult<ReturnValue>) -> AckOutcome {
        self.tracking.clear();
        if let Some(completion) = self.completion.take() {
            // The awaiter may have timed out already
            let _ = completion.send(result);
        }
        AckOutcome::Completed
    }

    fn finish_if_done(&mut self) -> AckOutcome {
        if self.tracking.is_done() {
            let value = std::mem::replace(&mut self.value, ReturnValue::Single(None));
            self.finish(Ok(value))
        } else {
            AckOutcome::Pending
        }
    }
}

/// Acknowledgment state of one in-flight write
#[derive(Debug)]
pub struct Collector {
    id: CommandInvocationId,
    topology_id: u64,
    state: Mutex<CollectorState>,
}

impl Collector {
    fn build(
        id: CommandInvocationId,
        topology_id: u64,
        tracking: Tracking,
        value: ReturnValue,
    ) -> (Self, CompletionReceiver) {
        let (sender, receiver) = oneshot::channel();
        let mut state = CollectorState {
            tracking,
            value,
            completion: Some(sender),
        };
        state.finish_if_done();

        let collector = Self {
            id,
            topology_id,
            state: Mutex::new(state),
        };
        (collector, receiver)
    }

    /// Single-key collector waiting for the primary and every backup.
    ///
    /// `owners` is the ordered owner list, primary first.
    pub(crate) fn single(
        id: CommandInvocationId,
        owners: &[Address],
        topology_id: u64,
    ) -> Option<(Self, CompletionReceiver)> {
        let (primary, backups) = owners.split_first()?;
        let tracking = Tracking::Single {
            primary: primary.clone(),
            primary_acked: false,
            backups: backups.iter().filter(|b| *b != primary).cloned().collect(),
        };
        Some(Self::build(id, topology_id, tracking, ReturnValue::Single(None)))
    }

    /// Single-key collector whose primary result is already known
    pub(crate) fn with_result(
        id: CommandInvocationId,
        primary: Address,
        value: Option<Value>,
        backups: &[Address],
        topology_id: u64,
    ) -> (Self, CompletionReceiver) {
        let tracking = Tracking::Single {
            backups: backups.iter().filter(|b| **b != primary).cloned().collect(),
            primary,
            primary_acked: true,
        };
        Self::build(id, topology_id, tracking, ReturnValue::Single(value))
    }

    /// Batch collector tracking segments per primary and per backup
    pub(crate) fn batch(
        id: CommandInvocationId,
        primaries: BTreeMap<Address, BTreeSet<Segment>>,
        backups: BTreeMap<Address, BTreeSet<Segment>>,
        topology_id: u64,
    ) -> (Self, CompletionReceiver) {
        let tracking = Tracking::Batch { primaries, backups };
        Self::build(id, topology_id, tracking, ReturnValue::Map(BTreeMap::new()))
    }

    /// Operation this collector belongs to
    pub fn id(&self) -> &CommandInvocationId {
        &self.id
    }

    /// Topology the collector was created under
    pub fn topology_id(&self) -> u64 {
        self.topology_id
    }

    /// Whether a result or error has been delivered
    pub fn is_complete(&self) -> bool {
        self.lock().is_terminal()
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the state if the event is for this collector's topology and
    /// the collector is still collecting.
    fn live_state(&self, topology_id: u64) -> Result<MutexGuard<'_, CollectorState>, AckOutcome> {
        if topology_id != self.topology_id {
            return Err(AckOutcome::Stale);
        }
        let state = self.lock();
        if state.is_terminal() {
            return Err(AckOutcome::Ignored);
        }
        Ok(state)
    }

    /// Primary acknowledgment of a single-key write
    pub fn primary_ack(
        &self,
        from: &Address,
        value: Option<Value>,
        success: bool,
        topology_id: u64,
    ) -> AckOutcome {
        let mut state = match self.live_state(topology_id) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };
        let accepted = match &mut state.tracking {
            Tracking::Single {
                primary,
                primary_acked,
                ..
            } if primary == from && !*primary_acked => {
                *primary_acked = true;
                true
            }
            _ => false,
        };
        if !accepted {
            return AckOutcome::Ignored;
        }

        if !success {
            return state.finish(Ok(ReturnValue::Single(value)));
        }
        state.value = ReturnValue::Single(value);
        state.finish_if_done()
    }

    /// Backup acknowledgment of a single-key write
    pub fn backup_ack(&self, from: &Address, topology_id: u64) -> AckOutcome {
        let mut state = match self.live_state(topology_id) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };
        let accepted = match &mut state.tracking {
            Tracking::Single { backups, .. } => backups.remove(from),
            Tracking::Batch { .. } => false,
        };
        if !accepted {
            return AckOutcome::Ignored;
        }
        state.finish_if_done()
    }

    /// One primary's acknowledgment of its share of a batch
    pub fn batch_primary_ack(
        &self,
        from: &Address,
        segments: &BTreeSet<Segment>,
        previous: Vec<(Key, Value)>,
        topology_id: u64,
    ) -> AckOutcome {
        let mut state = match self.live_state(topology_id) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };
        let accepted = match &mut state.tracking {
            Tracking::Batch { primaries, .. } => remove_segments(primaries, from, segments),
            Tracking::Single { .. } => false,
        };
        if !accepted {
            return AckOutcome::Ignored;
        }
        if let ReturnValue::Map(values) = &mut state.value {
            values.extend(previous);
        }
        state.finish_if_done()
    }

    /// One backup's acknowledgment of some segments of a batch
    pub fn batch_backup_ack(
        &self,
        from: &Address,
        segments: &BTreeSet<Segment>,
        topology_id: u64,
    ) -> AckOutcome {
        let mut state = match self.live_state(topology_id) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };
        let accepted = match &mut state.tracking {
            Tracking::Batch { backups, .. } => remove_segments(backups, from, segments),
            Tracking::Single { .. } => false,
        };
        if !accepted {
            return AckOutcome::Ignored;
        }
        state.finish_if_done()
    }

    /// Fail the operation, discarding every outstanding expectation
    pub fn complete_exceptionally(&self, error: CacheError, topology_id: u64) -> AckOutcome {
        match self.live_state(topology_id) {
            Ok(mut state) => state.finish(Err(error)),
            Err(outcome) => outcome,
        }
    }

    /// React to a new live member list.
    pub fn on_members_change(&self, live: &[Address]) -> MembershipOutcome {
        let mut outcome = MembershipOutcome::default();
        let mut state = self.lock();
        if state.is_terminal() {
            return outcome;
        }

        let is_live = |address: &Address| live.contains(address);
        let primary_departed = match &mut state.tracking {
            Tracking::Single {
                primary, backups, ..
            } => {
                if !is_live(primary) {
                    true
                } else {
                    outcome.waived = backups.iter().filter(|b| !is_live(b)).cloned().collect();
                    backups.retain(|b| is_live(b));
                    false
                }
            }
            Tracking::Batch { primaries, backups } => {
                if primaries.keys().any(|p| !is_live(p)) {
                    true
                } else {
                    outcome.waived = backups.keys().filter(|b| !is_live(b)).cloned().collect();
                    backups.retain(|b, _| is_live(b));
                    false
                }
            }
        };

        if primary_departed {
            outcome.primary_departed = true;
            state.finish(Err(CacheError::outdated_topology()));
            outcome.completed = true;
        } else if !outcome.waived.is_empty() {
            outcome.completed = state.finish_if_done() == AckOutcome::Completed;
        }
        outcome
    }
}
