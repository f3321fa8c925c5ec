//! Cache node
//!
//! Wires one member's write path together and routes inbound messages:
//!
//! | Message        | Handled by                      |
//! |----------------|---------------------------------|
//! | `Dispatch`     | [`PrimaryExecutor`]             |
//! | `Backup`       | [`BackupApplier`]               |
//! | `PrimaryAck`   | the node's collector registry   |
//! | `BackupAck`    | the node's collector registry   |
//! | `ExceptionAck` | the node's collector registry   |
//!
//! Membership changes from the topology provider are fed to the registry
//! so collectors stop waiting on departed backups and fail when their
//! primary leaves.

use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;

use crate::collector::CommandAckCollector;
use crate::command::{
    InvocationIdGenerator, Message, PrimaryOutcome, ReturnValue, WriteCommand, WriteKind,
};
use crate::config::ReplicationConfig;
use crate::errors::CacheResult;
use crate::observability::{MetricsSnapshot, ReplicationMetrics};
use crate::store::{InMemoryStore, StorageEngine};
use crate::topology::{Address, TopologyProvider};
use crate::transport::{LocalNetwork, MessageHandler};
use crate::triangle::{
    BackupApplier, NodeContext, PrimaryExecutor, RetrySupervisor, StripedLocks, WriteDispatcher,
};

/// One member of a replicated cache
pub struct CacheNode {
    ctx: Arc<NodeContext>,
    primary: Arc<PrimaryExecutor>,
    backup: BackupApplier,
    supervisor: RetrySupervisor,
    ids: InvocationIdGenerator,
    store: Arc<InMemoryStore>,
    config: ReplicationConfig,
}

impl std::fmt::Debug for CacheNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("address", &self.ctx.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheNode {
    /// Start a node on `network` that follows `topology`.
    ///
    /// The configuration is validated first; an invalid one starts
    /// nothing.
    pub fn start(
        address: Address,
        config: ReplicationConfig,
        network: &LocalNetwork,
        topology: Arc<dyn TopologyProvider>,
    ) -> CacheResult<Arc<Self>> {
        config.validate()?;
        let locks = StripedLocks::new(config.lock_stripes)?;
        let metrics = Arc::new(ReplicationMetrics::new());
        let collectors = Arc::new(CommandAckCollector::new(Arc::clone(&metrics)));
        let store = Arc::new(InMemoryStore::new());

        let listener_collectors = Arc::clone(&collectors);
        topology.subscribe_membership_changes(Box::new(move |live: &[Address]| {
            listener_collectors.on_members_change(live)
        }));

        let node = Arc::new_cyclic(|weak: &Weak<CacheNode>| {
            let handler: Weak<dyn MessageHandler> = weak.clone();
            let transport = network.join(address.clone(), handler);

            let ctx = Arc::new(NodeContext {
                address: address.clone(),
                topology,
                transport: Arc::new(transport),
                storage: Arc::clone(&store) as Arc<dyn StorageEngine>,
                collectors,
                metrics,
                locks,
                remote_timeout: config.remote_timeout(),
            });
            let primary = Arc::new(PrimaryExecutor::new(Arc::clone(&ctx)));
            let dispatcher = WriteDispatcher::new(Arc::clone(&ctx), Arc::clone(&primary));

            CacheNode {
                backup: BackupApplier::new(Arc::clone(&ctx)),
                supervisor: RetrySupervisor::new(Arc::clone(&ctx), dispatcher),
                ids: InvocationIdGenerator::new(address.clone()),
                primary,
                ctx,
                store,
                config,
            }
        });

        Ok(node)
    }

    /// This node's address
    pub fn address(&self) -> &Address {
        &self.ctx.address
    }

    /// Configuration the node started with
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Local data
    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    /// Collectors of writes originated here
    pub fn collectors(&self) -> &Arc<CommandAckCollector> {
        &self.ctx.collectors
    }

    /// Node counters
    pub fn metrics(&self) -> &Arc<ReplicationMetrics> {
        &self.ctx.metrics
    }

    /// Point-in-time copy of the node counters
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// Topology source
    pub fn topology(&self) -> &Arc<dyn TopologyProvider> {
        &self.ctx.topology
    }

    /// New command originated here, with the configured durability
    pub fn new_command(&self, kind: WriteKind) -> WriteCommand {
        WriteCommand::new(self.ids.next_id(), kind).with_durability(self.config.mode)
    }

    /// Run a write to its final outcome
    pub async fn execute(&self, command: WriteCommand) -> CacheResult<ReturnValue> {
        self.supervisor.run(command).await
    }

    /// Local lookup
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.get(key)
    }

    async fn route(&self, from: Address, message: Message) {
        let collectors = &self.ctx.collectors;
        match message {
            Message::Dispatch(command) => self.primary.handle_dispatch(command).await,
            Message::Backup(write) => self.backup.apply(write),
            Message::PrimaryAck(ack) => {
                match ack.outcome {
                    PrimaryOutcome::Single { value, success } => {
                        collectors.primary_ack(&ack.id, &from, value, success, ack.topology_id)
                    }
                    PrimaryOutcome::Batch { segments, previous } => collectors
                        .batch_primary_ack(&ack.id, &from, &segments, previous, ack.topology_id),
                };
            }
            Message::BackupAck(ack) => {
                match ack.segments {
                    Some(segments) => {
                        collectors.batch_backup_ack(&ack.id, &from, &segments, ack.topology_id)
                    }
                    None => collectors.backup_ack(&ack.id, &from, ack.topology_id),
                };
            }
            Message::ExceptionAck(ack) => {
                if ack.error.is_topology_retry() {
                    self.ctx.metrics.increment_unsure_replies();
                }
                collectors.complete_exceptionally(&ack.id, &from, ack.error, ack.topology_id);
            }
        }
    }
}

impl MessageHandler for CacheNode {
    fn handle(&self, from: Address, message: Message) -> BoxFuture<'_, ()> {
        Box::pin(self.route(from, message))
    }
}
