//! In-process network
//!
//! Connects the nodes of a local cluster. Per-sender FIFO sends go through
//! one unbounded channel per (sender, receiver) pair, drained by a single
//! task, so they are handled strictly in send order. Unordered sends get a
//! task each.
//!
//! Fault injection: a crashed node neither sends nor receives, and a cut
//! link silently loses everything sent over it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;

use super::{DeliveryOrder, MessageHandler, Transport};
use crate::command::Message;
use crate::errors::{CacheError, CacheResult};
use crate::observability::{log_event, Event};
use crate::topology::Address;

/// A message as it travels between nodes
enum Payload {
    Encoded(Vec<u8>),
    Plain(Message),
}

type Link = (Address, Address);

/// A delivered message, recorded for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sender
    pub from: Address,
    /// Message kind, see [`Message::kind`]
    pub kind: &'static str,
}

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<Address, Weak<dyn MessageHandler>>,
    links: HashMap<Link, mpsc::UnboundedSender<Payload>>,
    crashed: HashSet<Address>,
    cut: HashSet<Link>,
    recording: bool,
    received: HashMap<Address, Vec<Delivery>>,
}

struct NetworkInner {
    state: Mutex<NetworkState>,
    encode_messages: bool,
}

impl NetworkInner {
    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn decode(&self, payload: Payload) -> CacheResult<Message> {
        match payload {
            Payload::Encoded(bytes) => Message::decode(&bytes),
            Payload::Plain(message) => Ok(message),
        }
    }

    async fn deliver(&self, from: Address, to: Address, payload: Payload) {
        let handler = {
            let state = self.state();
            if state.crashed.contains(&to) || state.crashed.contains(&from) {
                log_event(
                    Event::MessageDropped,
                    &[("from", from.as_str()), ("to", to.as_str())],
                );
                return;
            }
            state.handlers.get(&to).and_then(Weak::upgrade)
        };
        let Some(handler) = handler else {
            return;
        };

        let message = match self.decode(payload) {
            Ok(message) => message,
            Err(err) => {
                log_event(
                    Event::MessageDecodeFailed,
                    &[("error", &err.to_string()), ("from", from.as_str())],
                );
                return;
            }
        };

        {
            let mut state = self.state();
            if state.recording {
                state.received.entry(to.clone()).or_default().push(Delivery {
                    from: from.clone(),
                    kind: message.kind(),
                });
            }
        }

        handler.handle(from, message).await;
    }
}

/// The in-process network shared by every node of a local cluster
#[derive(Clone)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("encode_messages", &self.inner.encode_messages)
            .finish_non_exhaustive()
    }
}

impl LocalNetwork {
    /// Create a network. With `encode_messages` every message is
    /// serialized on send and deserialized on delivery.
    ///
    /// Deliveries are recorded until [`LocalNetwork::set_recording`] turns
    /// that off.
    pub fn new(encode_messages: bool) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                state: Mutex::new(NetworkState {
                    recording: true,
                    ..NetworkState::default()
                }),
                encode_messages,
            }),
        }
    }

    /// Turn the delivery log on or off. Turning it off drops what was
    /// recorded so far.
    pub fn set_recording(&self, enabled: bool) {
        let mut state = self.inner.state();
        state.recording = enabled;
        if !enabled {
            state.received.clear();
        }
    }

    /// Attach a node and get its transport.
    pub fn join(&self, address: Address, handler: Weak<dyn MessageHandler>) -> LocalTransport {
        let mut state = self.inner.state();
        state.crashed.remove(&address);
        state.handlers.insert(address.clone(), handler);
        log_event(Event::NodeStart, &[("address", address.as_str())]);

        LocalTransport {
            address,
            network: self.clone(),
        }
    }

    /// Crash a node: it stops sending and receiving, in-flight messages
    /// to and from it are lost.
    pub fn crash(&self, address: &Address) {
        let mut state = self.inner.state();
        state.crashed.insert(address.clone());
        state.links.retain(|(from, to), _| from != address && to != address);
    }

    /// Whether a node has crashed
    pub fn is_crashed(&self, address: &Address) -> bool {
        self.inner.state().crashed.contains(address)
    }

    /// Lose every message sent from `from` to `to`
    pub fn cut_link(&self, from: &Address, to: &Address) {
        self.inner.state().cut.insert((from.clone(), to.clone()));
    }

    /// Undo [`LocalNetwork::cut_link`]
    pub fn restore_link(&self, from: &Address, to: &Address) {
        self.inner.state().cut.remove(&(from.clone(), to.clone()));
    }

    /// Every message delivered to `address` while recording, in delivery
    /// order
    pub fn received(&self, address: &Address) -> Vec<Delivery> {
        self.inner
            .state()
            .received
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of messages of `kind` delivered to `address`
    pub fn received_count(&self, address: &Address, kind: &str) -> usize {
        self.received(address)
            .iter()
            .filter(|d| d.kind == kind)
            .count()
    }

    fn send(
        &self,
        from: &Address,
        to: &Address,
        message: Message,
        order: DeliveryOrder,
    ) -> CacheResult<()> {
        let payload = if self.inner.encode_messages {
            Payload::Encoded(message.encode()?)
        } else {
            Payload::Plain(message)
        };

        let mut state = self.inner.state();
        if state.crashed.contains(from) {
            return Ok(());
        }
        if state.crashed.contains(to) || !state.handlers.contains_key(to) {
            return Err(CacheError::PeerUnreachable(to.clone()));
        }
        let link = (from.clone(), to.clone());
        if state.cut.contains(&link) {
            log_event(
                Event::MessageDropped,
                &[("from", from.as_str()), ("to", to.as_str())],
            );
            return Ok(());
        }

        match order {
            DeliveryOrder::Unordered => {
                let inner = Arc::clone(&self.inner);
                let (from, to) = link;
                tokio::spawn(async move {
                    inner.deliver(from, to, payload).await;
                });
            }
            DeliveryOrder::PerSenderFifo => {
                let sender = state
                    .links
                    .entry(link.clone())
                    .or_insert_with(|| self.spawn_link(link));
                if sender.send(payload).is_err() {
                    return Err(CacheError::PeerUnreachable(to.clone()));
                }
            }
        }
        Ok(())
    }

    fn spawn_link(&self, link: Link) -> mpsc::UnboundedSender<Payload> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let inner: Weak<NetworkInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let (from, to) = link;
            while let Some(payload) = receiver.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.deliver(from.clone(), to.clone(), payload).await;
            }
        });
        sender
    }
}

/// One node's view of the [`LocalNetwork`]
#[derive(Debug, Clone)]
pub struct LocalTransport {
    address: Address,
    network: LocalNetwork,
}

impl LocalTransport {
    /// The network this transport is attached to
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }
}

impl Transport for LocalTransport {
    fn local_address(&self) -> &Address {
        &self.address
    }

    fn send_to(&self, to: &Address, message: Message, order: DeliveryOrder) -> CacheResult<()> {
        self.network.send(&self.address, to, message, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{BackupAck, CommandInvocationId};
    use futures_util::future::BoxFuture;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    impl MessageHandler for Recorder {
        fn handle(&self, _from: Address, message: Message) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                // Yield so unordered deliveries get a chance to interleave
                tokio::task::yield_now().await;
                self.seen.lock().unwrap().push(message.invocation_id().sequence());
            })
        }
    }

    fn ack(sequence: u64) -> Message {
        Message::BackupAck(BackupAck {
            id: CommandInvocationId::new(Address::named("a"), sequence),
            topology_id: 1,
            segments: None,
        })
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn handler(recorder: &Arc<Recorder>) -> Weak<dyn MessageHandler> {
        let weak: Weak<Recorder> = Arc::downgrade(recorder);
        weak
    }

    fn detached() -> Weak<dyn MessageHandler> {
        let weak: Weak<Recorder> = Weak::new();
        weak
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_fifo_link_preserves_order() {
        let network = LocalNetwork::new(true);
        let receiver = recorder();
        network.join(Address::named("b"), handler(&receiver));
        let sender = network.join(Address::named("a"), detached());

        for sequence in 1..=50 {
            sender
                .send_to(&Address::named("b"), ack(sequence), DeliveryOrder::PerSenderFifo)
                .unwrap();
        }
        settle().await;

        let seen = receiver.seen.lock().unwrap().clone();
        assert_eq!(seen, (1..=50).collect::<Vec<_>>());
        assert_eq!(network.received_count(&Address::named("b"), "backup_ack"), 50);
    }

    #[tokio::test]
    async fn test_send_to_crashed_node_fails() {
        let network = LocalNetwork::new(false);
        let receiver = recorder();
        network.join(Address::named("b"), handler(&receiver));
        let sender = network.join(Address::named("a"), detached());

        network.crash(&Address::named("b"));
        let err = sender
            .send_to(&Address::named("b"), ack(1), DeliveryOrder::Unordered)
            .unwrap_err();

        assert_eq!(err, CacheError::PeerUnreachable(Address::named("b")));
        assert!(network.is_crashed(&Address::named("b")));
    }

    #[tokio::test]
    async fn test_cut_link_loses_messages() {
        let network = LocalNetwork::new(false);
        let receiver = recorder();
        network.join(Address::named("b"), handler(&receiver));
        let sender = network.join(Address::named("a"), detached());

        network.cut_link(&Address::named("a"), &Address::named("b"));
        sender
            .send_to(&Address::named("b"), ack(1), DeliveryOrder::PerSenderFifo)
            .unwrap();
        settle().await;
        assert!(network.received(&Address::named("b")).is_empty());

        network.restore_link(&Address::named("a"), &Address::named("b"));
        sender
            .send_to(&Address::named("b"), ack(2), DeliveryOrder::Unordered)
            .unwrap();
        settle().await;
        assert_eq!(*receiver.seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_unknown_peer_is_unreachable() {
        let network = LocalNetwork::new(false);
        let sender = network.join(Address::named("a"), detached());
        assert!(sender
            .send_to(&Address::named("zz"), ack(1), DeliveryOrder::Unordered)
            .unwrap_err()
            .is_topology_retry());
    }

    #[tokio::test]
    async fn test_recording_can_be_turned_off() {
        let network = LocalNetwork::new(false);
        let receiver = recorder();
        network.join(Address::named("b"), handler(&receiver));
        let sender = network.join(Address::named("a"), detached());

        sender
            .send_to(&Address::named("b"), ack(1), DeliveryOrder::PerSenderFifo)
            .unwrap();
        settle().await;
        assert_eq!(network.received(&Address::named("b")).len(), 1);

        network.set_recording(false);
        assert!(network.received(&Address::named("b")).is_empty());
        sender
            .send_to(&Address::named("b"), ack(2), DeliveryOrder::PerSenderFifo)
            .unwrap();
        settle().await;

        // Still delivered, just not logged
        assert_eq!(*receiver.seen.lock().unwrap(), vec![1, 2]);
        assert!(network.received(&Address::named("b")).is_empty());
    }
}
