//! Topology provider
//!
//! The write path consumes topology through [`TopologyProvider`]: the
//! current snapshot, a bounded wait for a minimum topology id, and
//! membership-change notifications. [`TopologyManager`] is the in-process
//! implementation used by every node of a local cluster.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use super::address::Address;
use super::snapshot::Topology;
use crate::errors::{CacheError, CacheResult};
use crate::observability::{log_event, Event};

/// Callback invoked with the live member list after a membership change
pub type MembershipListener = Box<dyn Fn(&[Address]) + Send + Sync>;

/// Source of topology snapshots
pub trait TopologyProvider: Send + Sync {
    /// The current snapshot
    fn current_topology(&self) -> Arc<Topology>;

    /// Resolve once the topology id is at least `min_id`.
    ///
    /// Fails with [`CacheError::TopologyTimeout`] if that does not happen
    /// within `timeout`.
    fn wait_for_topology(
        &self,
        min_id: u64,
        timeout: Duration,
    ) -> BoxFuture<'_, CacheResult<Arc<Topology>>>;

    /// Register a callback for membership changes
    fn subscribe_membership_changes(&self, listener: MembershipListener);
}

/// In-process topology provider
pub struct TopologyManager {
    sender: watch::Sender<Arc<Topology>>,
    listeners: RwLock<Vec<MembershipListener>>,
}

impl std::fmt::Debug for TopologyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyManager")
            .field("topology_id", &self.sender.borrow().id())
            .finish_non_exhaustive()
    }
}

impl Default for TopologyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyManager {
    /// Create a manager holding the empty initial topology.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Arc::new(Topology::initial()));
        Self {
            sender,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Install a newer topology.
    ///
    /// Returns `false` (and changes nothing) if `topology` is not newer
    /// than the current one. Membership listeners run synchronously after
    /// the snapshot is visible, and only when the member set changed.
    pub fn install(&self, topology: Topology) -> bool {
        let id = topology.id();
        let members = topology.members().to_vec();
        let mut members_changed = false;
        let mut current_id = 0;

        // Check and replace under the channel's lock so concurrent installs
        // cannot go backwards.
        let accepted = self.sender.send_if_modified(|current| {
            current_id = current.id();
            if id <= current_id {
                return false;
            }
            members_changed = topology.members_differ(current);
            *current = Arc::new(topology);
            true
        });

        if !accepted {
            log_event(
                Event::TopologyRejected,
                &[
                    ("current", &current_id.to_string()),
                    ("offered", &id.to_string()),
                ],
            );
            return false;
        }

        log_event(
            Event::TopologyInstalled,
            &[
                ("members", &members.len().to_string()),
                ("topology_id", &id.to_string()),
            ],
        );

        if members_changed {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for listener in listeners.iter() {
                listener(&members);
            }
        }
        true
    }
}

impl TopologyProvider for TopologyManager {
    fn current_topology(&self) -> Arc<Topology> {
        Arc::clone(&self.sender.borrow())
    }

    fn wait_for_topology(
        &self,
        min_id: u64,
        timeout: Duration,
    ) -> BoxFuture<'_, CacheResult<Arc<Topology>>> {
        Box::pin(async move {
            let mut receiver = self.sender.subscribe();
            let reached = async {
                loop {
                    let topology = Arc::clone(&receiver.borrow_and_update());
                    if topology.id() >= min_id {
                        return Ok(topology);
                    }
                    if receiver.changed().await.is_err() {
                        return Err(CacheError::TopologyTimeout(min_id));
                    }
                }
            };

            match tokio::time::timeout(timeout, reached).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::TopologyTimeout(min_id)),
            }
        })
    }

    fn subscribe_membership_changes(&self, listener: MembershipListener) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }
}
