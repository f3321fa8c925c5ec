//! Triangle write path
//!
//! ```text
//!            Dispatch
//!  originator ───────► primary
//!      ▲  ▲               │ Backup (per-sender FIFO)
//!      │  └── PrimaryAck  ▼
//!      └──────────────── backup
//!            BackupAck
//! ```
//!
//! The originator sends the write to the primary owner, the primary
//! decides it and forwards the decided change to the backups, and both
//! acknowledge straight back to the originator. When the originator is
//! the primary the first leg and the primary acknowledgment stay
//! in-process.
//!
//! Components:
//! - [`WriteDispatcher`]: one attempt on the originator
//! - [`PrimaryExecutor`]: decide and forward on the primary
//! - [`BackupApplier`]: apply without re-checking on backups
//! - [`RetrySupervisor`]: re-dispatch after topology-retry signals

mod backup;
mod context;
mod dispatcher;
mod locks;
mod primary;
mod retry;

pub use backup::BackupApplier;
pub use context::NodeContext;
pub use dispatcher::WriteDispatcher;
pub use locks::StripedLocks;
pub use primary::{BatchApplied, PrimaryExecutor};
pub use retry::RetrySupervisor;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use super::{NodeContext, StripedLocks};
    use crate::collector::CommandAckCollector;
    use crate::command::Message;
    use crate::observability::ReplicationMetrics;
    use crate::store::{InMemoryStore, StorageEngine};
    use crate::topology::{Address, Topology, TopologyManager, TopologyProvider};
    use crate::transport::{LocalNetwork, MessageHandler};

    const SEGMENTS: u32 = 16;

    pub(crate) fn addr(name: &str) -> Address {
        Address::named(name)
    }

    /// Accepts and drops every message; the network still records it
    struct Sink;

    impl MessageHandler for Sink {
        fn handle(&self, _from: Address, _message: Message) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    /// One real node context whose peers are message sinks
    pub(crate) struct TestNode {
        pub ctx: Arc<NodeContext>,
        pub store: Arc<InMemoryStore>,
        pub network: LocalNetwork,
        pub manager: Arc<TopologyManager>,
        _sink: Arc<Sink>,
    }

    impl TestNode {
        pub fn new(local: &str, members: &[&str]) -> Self {
            Self::with_owners(local, members, 3)
        }

        pub fn with_owners(local: &str, members: &[&str], num_owners: usize) -> Self {
            let network = LocalNetwork::new(true);
            let sink = Arc::new(Sink);
            let weak_sink: Weak<Sink> = Arc::downgrade(&sink);

            for name in members.iter().filter(|name| **name != local) {
                network.join(addr(name), weak_sink.clone());
            }
            let transport = network.join(addr(local), weak_sink);

            let manager = Arc::new(TopologyManager::new());
            manager.install(Topology::balanced(
                1,
                members.iter().map(|name| addr(name)).collect(),
                SEGMENTS,
                num_owners,
            ));

            let store = Arc::new(InMemoryStore::new());
            let metrics = Arc::new(ReplicationMetrics::new());
            let ctx = Arc::new(NodeContext {
                address: addr(local),
                topology: Arc::clone(&manager) as Arc<dyn TopologyProvider>,
                transport: Arc::new(transport),
                storage: Arc::clone(&store) as Arc<dyn StorageEngine>,
                collectors: Arc::new(CommandAckCollector::new(Arc::clone(&metrics))),
                metrics,
                locks: StripedLocks::new(16).unwrap(),
                remote_timeout: Duration::from_millis(200),
            });

            Self {
                ctx,
                store,
                network,
                manager,
                _sink: sink,
            }
        }

        pub fn topology(&self) -> Arc<Topology> {
            self.manager.current_topology()
        }

        /// Install the same ownership under the next topology id
        pub fn advance_topology(&self) {
            self.manager.install(self.topology().bumped());
        }

        /// First generated key whose primary is `name`
        pub fn key_owned_by(&self, name: &str) -> Vec<u8> {
            let topology = self.topology();
            let owner = addr(name);
            (0..10_000)
                .map(|i| format!("key-{}", i).into_bytes())
                .find(|key| topology.primary(key) == Some(&owner))
                .unwrap()
        }

        pub fn received_count(&self, name: &str, kind: &str) -> usize {
            self.network.received_count(&addr(name), kind)
        }

        /// Let in-flight deliveries finish
        pub async fn settle(&self) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
