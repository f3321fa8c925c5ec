//! Collaborators shared by the write-path components of one node

use std::sync::Arc;
use std::time::Duration;

use super::locks::StripedLocks;
use crate::collector::CommandAckCollector;
use crate::command::{CommandInvocationId, ExceptionAck, Message};
use crate::errors::CacheError;
use crate::observability::{log_event, Event, ReplicationMetrics};
use crate::store::StorageEngine;
use crate::topology::{Address, TopologyProvider};
use crate::transport::{DeliveryOrder, Transport};

/// Everything a node's write path reaches for
pub struct NodeContext {
    /// Local address
    pub address: Address,
    /// Topology source
    pub topology: Arc<dyn TopologyProvider>,
    /// Outbound messages
    pub transport: Arc<dyn Transport>,
    /// Local data
    pub storage: Arc<dyn StorageEngine>,
    /// Collectors of operations originated here
    pub collectors: Arc<CommandAckCollector>,
    /// Node counters
    pub metrics: Arc<ReplicationMetrics>,
    /// Primary-side key locks
    pub locks: StripedLocks,
    /// Bound on collector and topology waits
    pub remote_timeout: Duration,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("address", &self.address)
            .field("remote_timeout", &self.remote_timeout)
            .finish_non_exhaustive()
    }
}

impl NodeContext {
    /// Whether `address` is this node
    pub fn is_local(&self, address: &Address) -> bool {
        *address == self.address
    }

    /// Fail the originator's collector, in-process when the originator is
    /// this node.
    pub fn send_exception(&self, to: &Address, ack: ExceptionAck) {
        if self.is_local(to) {
            self.collectors
                .complete_exceptionally(&ack.id, &self.address, ack.error, ack.topology_id);
            return;
        }
        self.send_ack(to, Message::ExceptionAck(ack));
    }

    /// Send an acknowledgment to a remote originator. A lost
    /// acknowledgment is only logged: the originator recovers through its
    /// own timeout or membership change.
    pub fn send_ack(&self, to: &Address, message: Message) {
        let id = message.invocation_id().to_string();
        let kind = message.kind();
        if let Err(err) = self.transport.send_to(to, message, DeliveryOrder::Unordered) {
            log_event(
                Event::AckSendFailed,
                &[
                    ("error", &err.to_string()),
                    ("id", &id),
                    ("kind", kind),
                    ("to", to.as_str()),
                ],
            );
        }
    }

    /// The "unsure" reply sent by a node whose topology is ahead of a
    /// command's
    pub fn unsure(&self, id: CommandInvocationId, topology_id: u64) -> ExceptionAck {
        log_event(
            Event::CommandUnsure,
            &[("id", &id.to_string()), ("topology_id", &topology_id.to_string())],
        );
        ExceptionAck {
            id,
            topology_id,
            error: CacheError::outdated_topology(),
        }
    }
}
