//! Transport Interface
//!
//! The write path only needs to send a message to one address with a
//! chosen ordering and to receive messages through a handler. Primaries
//! forward to backups with per-sender FIFO ordering: backups apply without
//! re-checking conditions, so they must apply in the primary's order.
//! Everything else is unordered.

mod local;

pub use local::{Delivery, LocalNetwork, LocalTransport};

use futures_util::future::BoxFuture;

use crate::command::Message;
use crate::errors::CacheResult;
use crate::topology::Address;

/// Ordering guarantee requested for one send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOrder {
    /// No ordering relative to other messages
    Unordered,
    /// Delivered and handled in send order per (sender, receiver) pair
    PerSenderFifo,
}

/// Receives messages delivered to a node
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound message. Messages sent with
    /// [`DeliveryOrder::PerSenderFifo`] are handled one at a time, so the
    /// returned future completing is what releases the next one.
    fn handle(&self, from: Address, message: Message) -> BoxFuture<'_, ()>;
}

/// Sends messages to other cluster members
pub trait Transport: Send + Sync {
    /// Address of the local node
    fn local_address(&self) -> &Address;

    /// Send without waiting for delivery.
    ///
    /// Fails with [`crate::CacheError::PeerUnreachable`] when the target is
    /// known to be gone.
    fn send_to(&self, to: &Address, message: Message, order: DeliveryOrder) -> CacheResult<()>;
}
