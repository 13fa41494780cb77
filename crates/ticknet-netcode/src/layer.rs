//! Message layer: typed send, handler dispatch, and reliable delivery
//!
//! [`MessageLayer`] sits between game code and a [`Transport`]. Outbound
//! messages pick their delivery guarantee from the static reliability table
//! in [`MessageKind::reliability`]. Inbound datagrams are decoded, reliable
//! ones are acknowledged and de-duplicated, and each message is handed to the
//! single handler registered for its kind.
//!
//! The layer never blocks and owns no timers; the owning loop calls
//! [`MessageLayer::poll`] regularly with the current time, which drains the
//! transport and runs the retry pass.

use crate::codec::{decode_packet, encode_packet};
use crate::config::ReliableConfig;
use crate::protocol::{Message, MessageId, MessageKind, Packet, PeerId};
use crate::reliable::{ReliableSender, RetryAction, SeenIds};
use crate::transport::{Address, Transport};
use crate::{Error, Result};
use std::collections::HashMap;
use ticknet_core::Millis;
use tracing::{debug, trace, warn};

/// Interval between prunes of the seen-id window
const PRUNE_INTERVAL_MS: Millis = 1_000;

/// Callback invoked with the sender address and the unwrapped message
pub type Handler = Box<dyn FnMut(&Address, Message)>;

/// Counters describing layer activity since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    /// Messages handed to the transport for the first time
    pub sent: u64,
    /// Reliable retransmissions
    pub resent: u64,
    /// Acknowledgments sent for inbound reliable messages
    pub acks_sent: u64,
    /// Outbound reliable messages confirmed by the peer
    pub acked: u64,
    /// Outbound reliable messages dropped after exhausting attempts
    pub abandoned: u64,
    /// Inbound messages passed to a handler
    pub delivered: u64,
    /// Inbound reliable messages absorbed as duplicates
    pub duplicates: u64,
    /// Inbound datagrams that failed to decode
    pub malformed: u64,
    /// Inbound messages with no registered handler
    pub unhandled: u64,
    /// Failed reads from the transport
    pub recv_errors: u64,
}

/// Typed, reliability-aware messaging over a datagram transport
pub struct MessageLayer<T: Transport> {
    transport: T,
    peer: PeerId,
    sender: ReliableSender,
    seen: SeenIds,
    handlers: HashMap<MessageKind, Handler>,
    stats: LayerStats,
    last_prune_ms: Millis,
}

impl<T: Transport> MessageLayer<T> {
    /// Create a layer sending as `peer`
    pub fn new(transport: T, peer: PeerId, config: ReliableConfig) -> Self {
        Self {
            transport,
            peer,
            seen: SeenIds::new(config.seen_id_window_ms),
            sender: ReliableSender::new(peer, config),
            handlers: HashMap::new(),
            stats: LayerStats::default(),
            last_prune_ms: 0,
        }
    }

    /// Register the handler for a message kind
    ///
    /// Each kind accepts exactly one handler.
    pub fn on_message<F>(&mut self, kind: MessageKind, handler: F) -> Result<()>
    where
        F: FnMut(&Address, Message) + 'static,
    {
        if self.handlers.contains_key(&kind) {
            return Err(Error::HandlerAlreadyRegistered(kind));
        }
        self.handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    /// Check if a handler is registered for `kind`
    pub fn has_handler(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Send a message to `to`
    ///
    /// Reliable kinds are assigned an id, transmitted, and retried from
    /// [`poll`](Self::poll) until acknowledged or abandoned; the id is
    /// returned. Unreliable kinds are transmitted once and return `None`.
    ///
    /// A reliable message whose first transmission fails at the transport is
    /// still tracked and will be retried.
    pub fn send(&mut self, to: &Address, message: Message, now: Millis) -> Result<Option<MessageId>> {
        let kind = message.kind();

        if !kind.is_reliable() {
            let bytes = encode_packet(&Packet::Message {
                reliable_id: None,
                message,
            })?;
            self.transport
                .send(&bytes, to)
                .map_err(|e| Error::Transport(e.to_string()))?;
            self.stats.sent += 1;
            trace!(?kind, to = %to, len = bytes.len(), "sent unreliable");
            return Ok(None);
        }

        let id = self.sender.next_id(now);
        let bytes = encode_packet(&Packet::Message {
            reliable_id: Some(id),
            message,
        })?;
        if let Err(e) = self.transport.send(&bytes, to) {
            warn!(%id, ?kind, to = %to, error = %e, "initial send failed, will retry");
        }
        self.sender.track(id, kind, to.clone(), bytes, now);
        self.stats.sent += 1;
        trace!(%id, ?kind, to = %to, "sent reliable");
        Ok(Some(id))
    }

    /// Drain the transport, dispatch messages, and run the retry pass
    ///
    /// A transport read error ends the drain for this call; retries and the
    /// seen-id prune still run. Returns the number of messages delivered to
    /// handlers.
    pub fn poll(&mut self, now: Millis) -> usize {
        let mut delivered = 0;

        loop {
            let (bytes, from) = match self.transport.recv() {
                Ok(Some(datagram)) => datagram,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "transport receive failed");
                    self.stats.recv_errors += 1;
                    break;
                }
            };
            if self.handle_datagram(&bytes, &from, now) {
                delivered += 1;
            }
        }

        self.retry(now);

        if now.saturating_sub(self.last_prune_ms) >= PRUNE_INTERVAL_MS {
            let pruned = self.seen.prune(now);
            if pruned > 0 {
                trace!(pruned, "pruned seen ids");
            }
            self.last_prune_ms = now;
        }

        delivered
    }

    /// Resend or abandon reliable messages that are due
    pub fn retry(&mut self, now: Millis) {
        for action in self.sender.poll(now) {
            match action {
                RetryAction::Resend { target, bytes } => {
                    if let Err(e) = self.transport.send(&bytes, &target) {
                        warn!(to = %target, error = %e, "retransmission failed");
                    }
                    self.stats.resent += 1;
                }
                RetryAction::Abandon(message) => {
                    warn!(
                        id = %message.id,
                        kind = ?message.kind,
                        to = %message.target,
                        attempts = message.attempts,
                        "reliable message abandoned without acknowledgment"
                    );
                    self.stats.abandoned += 1;
                }
            }
        }
    }

    /// Stop retrying every reliable message addressed to `peer`
    ///
    /// Returns the number of pending messages dropped.
    pub fn disconnect(&mut self, peer: &Address) -> usize {
        let dropped = self.sender.forget_target(peer);
        debug!(peer = %peer, dropped, "peer disconnected, retries aborted");
        dropped
    }

    fn handle_datagram(&mut self, bytes: &[u8], from: &Address, now: Millis) -> bool {
        let packet = match decode_packet(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed += 1;
                debug!(from = %from, error = %e, "dropping malformed datagram");
                return false;
            }
        };

        match packet {
            Packet::Ack { reliable_id } => {
                if self.sender.acknowledge(&reliable_id) {
                    self.stats.acked += 1;
                    trace!(id = %reliable_id, "acknowledged");
                } else {
                    trace!(id = %reliable_id, "ack for unknown message");
                }
                false
            }
            Packet::Message {
                reliable_id: Some(id),
                message,
            } => {
                // Always acknowledge; the previous ack may have been lost
                self.send_ack(id, from);

                let kind = message.kind();
                if !self.seen.first_sighting(kind, id, now) {
                    self.stats.duplicates += 1;
                    debug!(%id, ?kind, from = %from, "duplicate reliable message dropped");
                    return false;
                }
                self.dispatch(from, message)
            }
            Packet::Message {
                reliable_id: None,
                message,
            } => {
                if message.kind().is_reliable() {
                    self.stats.malformed += 1;
                    debug!(kind = ?message.kind(), from = %from, "reliable kind without id");
                    return false;
                }
                self.dispatch(from, message)
            }
        }
    }

    fn send_ack(&mut self, id: MessageId, to: &Address) {
        let bytes = match encode_packet(&Packet::Ack { reliable_id: id }) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%id, error = %e, "failed to encode ack");
                return;
            }
        };
        if let Err(e) = self.transport.send(&bytes, to) {
            warn!(%id, to = %to, error = %e, "failed to send ack");
            return;
        }
        self.stats.acks_sent += 1;
    }

    fn dispatch(&mut self, from: &Address, message: Message) -> bool {
        let kind = message.kind();
        match self.handlers.get_mut(&kind) {
            Some(handler) => {
                handler(from, message);
                self.stats.delivered += 1;
                true
            }
            None => {
                self.stats.unhandled += 1;
                debug!(?kind, from = %from, "no handler registered");
                false
            }
        }
    }

    /// Activity counters
    pub fn stats(&self) -> LayerStats {
        self.stats
    }

    /// Identity this layer sends as
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Reliable messages awaiting acknowledgment
    pub fn pending_reliable(&self) -> usize {
        self.sender.len()
    }

    /// Attempts made so far for a pending reliable message
    pub fn attempts(&self, id: &MessageId) -> Option<u32> {
        self.sender.get(id).map(|m| m.attempts)
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get mutable access to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for MessageLayer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLayer")
            .field("transport", &self.transport)
            .field("peer", &self.peer)
            .field("pending", &self.sender.len())
            .field("handlers", &self.handlers.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LinkConditions, MemoryNetwork, MemoryTransport};
    use std::cell::RefCell;
    use std::rc::Rc;
    use ticknet_core::{EntityId, PlayerId};

    fn pair(network: &MemoryNetwork) -> (MessageLayer<MemoryTransport>, MessageLayer<MemoryTransport>) {
        let config = ReliableConfig::default();
        let a = MessageLayer::new(
            network.endpoint("a", LinkConditions::perfect()),
            PeerId(1),
            config.clone(),
        );
        let b = MessageLayer::new(
            network.endpoint("b", LinkConditions::perfect()),
            PeerId(2),
            config,
        );
        (a, b)
    }

    fn record(layer: &mut MessageLayer<MemoryTransport>, kind: MessageKind) -> Rc<RefCell<Vec<Message>>> {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        layer
            .on_message(kind, move |_, message| sink.borrow_mut().push(message))
            .unwrap();
        received
    }

    #[test]
    fn test_second_handler_rejected() {
        let network = MemoryNetwork::new(1);
        let (mut a, _) = pair(&network);

        a.on_message(MessageKind::PlayerJoined, |_, _| {}).unwrap();
        assert!(matches!(
            a.on_message(MessageKind::PlayerJoined, |_, _| {}),
            Err(Error::HandlerAlreadyRegistered(MessageKind::PlayerJoined))
        ));
        assert!(a.has_handler(MessageKind::PlayerJoined));
        assert!(!a.has_handler(MessageKind::PlayerLeft));
    }

    #[test]
    fn test_unreliable_is_fire_and_forget() {
        let network = MemoryNetwork::new(1);
        let (mut a, mut b) = pair(&network);
        let received = record(&mut b, MessageKind::InputBatch);

        let id = a
            .send(&"b".into(), Message::InputBatch { inputs: Vec::new() }, 0)
            .unwrap();
        assert!(id.is_none());
        assert_eq!(a.pending_reliable(), 0);

        assert_eq!(b.poll(0), 1);
        assert_eq!(received.borrow().len(), 1);
        assert_eq!(b.stats().acks_sent, 0);
    }

    #[test]
    fn test_reliable_round_trip() {
        let network = MemoryNetwork::new(1);
        let (mut a, mut b) = pair(&network);
        let received = record(&mut b, MessageKind::PlayerJoined);
        let joined = Message::PlayerJoined {
            player: PlayerId::new(7),
            entity: EntityId::new(70),
        };

        let id = a.send(&"b".into(), joined.clone(), 0).unwrap().unwrap();
        assert_eq!(a.attempts(&id), Some(1));

        b.poll(5);
        a.poll(10);

        assert_eq!(*received.borrow(), vec![joined]);
        assert_eq!(a.pending_reliable(), 0);
        assert_eq!(a.stats().acked, 1);
        assert_eq!(b.stats().acks_sent, 1);
    }

    #[test]
    fn test_retry_until_ack() {
        let network = MemoryNetwork::new(1);
        let (mut a, mut b) = pair(&network);
        let received = record(&mut b, MessageKind::EntityDestroyed);

        a.transport_mut().set_conditions(LinkConditions::severed());
        let id = a
            .send(
                &"b".into(),
                Message::EntityDestroyed {
                    entity: EntityId::new(3),
                },
                0,
            )
            .unwrap()
            .unwrap();

        a.poll(100);
        assert_eq!(a.attempts(&id), Some(2));

        a.transport_mut().set_conditions(LinkConditions::perfect());
        a.poll(300);
        b.poll(300);
        a.poll(301);

        assert_eq!(received.borrow().len(), 1);
        assert_eq!(a.pending_reliable(), 0);
        assert_eq!(a.stats().resent, 2);
    }

    #[test]
    fn test_malformed_and_unhandled_counted() {
        let network = MemoryNetwork::new(1);
        let (_, mut b) = pair(&network);
        let mut raw = network.endpoint("raw", LinkConditions::perfect());

        raw.send(&[0xde, 0xad], &"b".into()).unwrap();
        let bytes = encode_packet(&Packet::Message {
            reliable_id: None,
            message: Message::InputBatch { inputs: Vec::new() },
        })
        .unwrap();
        raw.send(&bytes, &"b".into()).unwrap();

        assert_eq!(b.poll(0), 0);
        assert_eq!(b.stats().malformed, 1);
        assert_eq!(b.stats().unhandled, 1);
    }

    #[test]
    fn test_reliable_kind_without_id_rejected() {
        let network = MemoryNetwork::new(1);
        let (_, mut b) = pair(&network);
        let received = record(&mut b, MessageKind::PlayerLeft);
        let mut raw = network.endpoint("raw", LinkConditions::perfect());

        let bytes = encode_packet(&Packet::Message {
            reliable_id: None,
            message: Message::PlayerLeft {
                player: PlayerId::new(1),
            },
        })
        .unwrap();
        raw.send(&bytes, &"b".into()).unwrap();

        b.poll(0);
        assert!(received.borrow().is_empty());
        assert_eq!(b.stats().malformed, 1);
    }

    #[test]
    fn test_disconnect_aborts_retries() {
        let network = MemoryNetwork::new(1);
        let (mut a, _) = pair(&network);

        a.transport_mut().set_conditions(LinkConditions::severed());
        a.send(
            &"b".into(),
            Message::PlayerLeft {
                player: PlayerId::new(2),
            },
            0,
        )
        .unwrap();

        assert_eq!(a.disconnect(&"b".into()), 1);
        a.poll(10_000);
        assert_eq!(a.stats().resent, 0);
        assert_eq!(a.stats().abandoned, 0);
    }

    /// Transport whose reads always fail, as a UDP socket does after a
    /// port-unreachable reply
    struct ResetTransport {
        sent: usize,
    }

    impl Transport for ResetTransport {
        type Error = std::io::Error;

        fn send(&mut self, _data: &[u8], _target: &Address) -> std::io::Result<()> {
            self.sent += 1;
            Ok(())
        }

        fn recv(&mut self) -> std::io::Result<Option<(Vec<u8>, Address)>> {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
        }

        fn local_addr(&self) -> Option<Address> {
            None
        }
    }

    #[test]
    fn test_recv_error_does_not_stall_retries() {
        let mut layer = MessageLayer::new(
            ResetTransport { sent: 0 },
            PeerId(1),
            ReliableConfig::default(),
        );
        let id = layer
            .send(
                &"b".into(),
                Message::PlayerLeft {
                    player: PlayerId::new(2),
                },
                0,
            )
            .unwrap()
            .unwrap();

        for now in (100..=5_000).step_by(100) {
            assert_eq!(layer.poll(now), 0);
        }

        // Retries at 100, 300, 700 and 1500 ms, dropped at 3100 ms
        assert_eq!(layer.attempts(&id), None);
        assert_eq!(layer.stats().resent, 4);
        assert_eq!(layer.stats().abandoned, 1);
        assert_eq!(layer.stats().recv_errors, 50);
        assert_eq!(layer.transport().sent, 5);
    }
}
