//! Replication counters
//!
//! - Counters only, monotonic, reset only on process start
//! - Thread-safe, lock-free (Relaxed atomics; exactness per counter,
//!   not across counters)

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one node's write path
#[derive(Debug, Default)]
pub struct ReplicationMetrics {
    writes_dispatched: AtomicU64,
    writes_completed: AtomicU64,
    writes_failed: AtomicU64,
    local_primary_executions: AtomicU64,
    remote_primary_executions: AtomicU64,
    conditional_mismatches: AtomicU64,
    backups_forwarded: AtomicU64,
    backups_applied: AtomicU64,
    acks_received: AtomicU64,
    stale_acks_dropped: AtomicU64,
    orphaned_acks_dropped: AtomicU64,
    backups_waived: AtomicU64,
    primaries_departed: AtomicU64,
    unsure_replies: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
}

macro_rules! counter {
    ($increment:ident, $get:ident, $field:ident) => {
        /// Increment the counter
        pub fn $increment(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        /// Current value of the counter
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl ReplicationMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    counter!(increment_writes_dispatched, writes_dispatched, writes_dispatched);
    counter!(increment_writes_completed, writes_completed, writes_completed);
    counter!(increment_writes_failed, writes_failed, writes_failed);
    counter!(increment_local_primary, local_primary_executions, local_primary_executions);
    counter!(increment_remote_primary, remote_primary_executions, remote_primary_executions);
    counter!(increment_conditional_mismatches, conditional_mismatches, conditional_mismatches);
    counter!(increment_backups_forwarded, backups_forwarded, backups_forwarded);
    counter!(increment_backups_applied, backups_applied, backups_applied);
    counter!(increment_acks_received, acks_received, acks_received);
    counter!(increment_stale_acks, stale_acks_dropped, stale_acks_dropped);
    counter!(increment_orphaned_acks, orphaned_acks_dropped, orphaned_acks_dropped);
    counter!(increment_backups_waived, backups_waived, backups_waived);
    counter!(increment_primaries_departed, primaries_departed, primaries_departed);
    counter!(increment_unsure_replies, unsure_replies, unsure_replies);
    counter!(increment_retries, retries, retries);
    counter!(increment_timeouts, timeouts, timeouts);

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            writes_dispatched: self.writes_dispatched(),
            writes_completed: self.writes_completed(),
            writes_failed: self.writes_failed(),
            local_primary_executions: self.local_primary_executions(),
            remote_primary_executions: self.remote_primary_executions(),
            conditional_mismatches: self.conditional_mismatches(),
            backups_forwarded: self.backups_forwarded(),
            backups_applied: self.backups_applied(),
            acks_received: self.acks_received(),
            stale_acks_dropped: self.stale_acks_dropped(),
            orphaned_acks_dropped: self.orphaned_acks_dropped(),
            backups_waived: self.backups_waived(),
            primaries_departed: self.primaries_departed(),
            unsure_replies: self.unsure_replies(),
            retries: self.retries(),
            timeouts: self.timeouts(),
        }
    }

    /// All counters as one JSON object
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub writes_dispatched: u64,
    pub writes_completed: u64,
    pub writes_failed: u64,
    pub local_primary_executions: u64,
    pub remote_primary_executions: u64,
    pub conditional_mismatches: u64,
    pub backups_forwarded: u64,
    pub backups_applied: u64,
    pub acks_received: u64,
    pub stale_acks_dropped: u64,
    pub orphaned_acks_dropped: u64,
    pub backups_waived: u64,
    pub primaries_departed: u64,
    pub unsure_replies: u64,
    pub retries: u64,
    pub timeouts: u64,
}

impl MetricsSnapshot {
    /// Sum of two snapshots, used to aggregate a cluster
    pub fn merged(&self, other: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            writes_dispatched: self.writes_dispatched + other.writes_dispatched,
            writes_completed: self.writes_completed + other.writes_completed,
            writes_failed: self.writes_failed + other.writes_failed,
            local_primary_executions: self.local_primary_executions
                + other.local_primary_executions,
            remote_primary_executions: self.remote_primary_executions
                + other.remote_primary_executions,
            conditional_mismatches: self.conditional_mismatches + other.conditional_mismatches,
            backups_forwarded: self.backups_forwarded + other.backups_forwarded,
            backups_applied: self.backups_applied + other.backups_applied,
            acks_received: self.acks_received + other.acks_received,
            stale_acks_dropped: self.stale_acks_dropped + other.stale_acks_dropped,
            orphaned_acks_dropped: self.orphaned_acks_dropped + other.orphaned_acks_dropped,
            backups_waived: self.backups_waived + other.backups_waived,
            primaries_departed: self.primaries_departed + other.primaries_departed,
            unsure_replies: self.unsure_replies + other.unsure_replies,
            retries: self.retries + other.retries,
            timeouts: self.timeouts + other.timeouts,
        }
    }

    /// Snapshot as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
