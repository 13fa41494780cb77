//! Reliable delivery bookkeeping
//!
//! [`ReliableSender`] owns every reliable message until it is acknowledged or
//! its attempts run out. [`SeenIds`] remembers which ids a receiver has
//! already delivered so retransmissions are absorbed. Neither touches the
//! network; [`crate::MessageLayer`] drives both.

use crate::config::ReliableConfig;
use crate::protocol::{MessageId, MessageKind, PeerId};
use crate::transport::Address;
use indexmap::IndexMap;
use std::collections::HashMap;
use ticknet_core::Millis;

/// A reliable message awaiting acknowledgment
#[derive(Debug, Clone)]
pub struct PendingReliableMessage {
    pub id: MessageId,
    pub kind: MessageKind,
    pub target: Address,
    /// Encoded packet, resent byte for byte
    pub bytes: Vec<u8>,
    /// Transmissions so far, the first send included
    pub attempts: u32,
    /// Set by an ack; the entry is dropped on the next retry pass
    pub acknowledged: bool,
    /// When the next retransmission is due
    pub next_attempt_at: Millis,
}

/// What the retry pass decided for one pending message
#[derive(Debug, Clone)]
pub enum RetryAction {
    /// Transmit these bytes again
    Resend { target: Address, bytes: Vec<u8> },
    /// Attempts exhausted; the message is dropped
    Abandon(PendingReliableMessage),
}

/// Sender-side state for reliable messages
#[derive(Debug)]
pub struct ReliableSender {
    peer: PeerId,
    counter: u64,
    config: ReliableConfig,
    pending: IndexMap<MessageId, PendingReliableMessage>,
}

impl ReliableSender {
    /// Create a sender identified as `peer`
    pub fn new(peer: PeerId, config: ReliableConfig) -> Self {
        Self {
            peer,
            counter: 0,
            config,
            pending: IndexMap::new(),
        }
    }

    /// Allocate a fresh message id
    pub fn next_id(&mut self, now: Millis) -> MessageId {
        self.counter += 1;
        MessageId {
            sender: self.peer,
            counter: self.counter,
            timestamp: now,
        }
    }

    /// Start tracking a message that has just been transmitted once
    pub fn track(
        &mut self,
        id: MessageId,
        kind: MessageKind,
        target: Address,
        bytes: Vec<u8>,
        now: Millis,
    ) {
        self.pending.insert(
            id,
            PendingReliableMessage {
                id,
                kind,
                target,
                bytes,
                attempts: 1,
                acknowledged: false,
                next_attempt_at: now + self.config.retry_delay(1),
            },
        );
    }

    /// Record an acknowledgment
    ///
    /// Returns `false` for ids that are unknown, already acknowledged, or
    /// already abandoned.
    pub fn acknowledge(&mut self, id: &MessageId) -> bool {
        match self.pending.get_mut(id) {
            Some(message) if !message.acknowledged => {
                message.acknowledged = true;
                true
            }
            _ => false,
        }
    }

    /// Work out which pending messages are due at `now`
    ///
    /// Acknowledged entries are dropped. Due messages below the attempt
    /// ceiling are scheduled for resend with the delay doubled; the rest are
    /// removed and returned as abandoned.
    pub fn poll(&mut self, now: Millis) -> Vec<RetryAction> {
        let mut actions = Vec::new();
        let max_attempts = self.config.max_retries;
        let config = &self.config;

        self.pending.retain(|_, message| {
            if message.acknowledged || message.next_attempt_at > now {
                return !message.acknowledged;
            }
            if message.attempts >= max_attempts {
                actions.push(RetryAction::Abandon(message.clone()));
                return false;
            }
            message.attempts += 1;
            message.next_attempt_at = now + config.retry_delay(message.attempts);
            actions.push(RetryAction::Resend {
                target: message.target.clone(),
                bytes: message.bytes.clone(),
            });
            true
        });

        actions
    }

    /// Stop retrying everything addressed to `target`
    ///
    /// Returns the number of messages dropped.
    pub fn forget_target(&mut self, target: &Address) -> usize {
        let before = self.len();
        self.pending.retain(|_, message| &message.target != target);
        before - self.len()
    }

    /// Look up a pending message
    pub fn get(&self, id: &MessageId) -> Option<&PendingReliableMessage> {
        self.pending.get(id)
    }

    /// Number of messages awaiting acknowledgment
    pub fn len(&self) -> usize {
        self.pending.values().filter(|m| !m.acknowledged).count()
    }

    /// Check if nothing is awaiting acknowledgment
    pub fn is_empty(&self) -> bool {
        self.pending.values().all(|m| m.acknowledged)
    }
}

/// Receiver-side record of delivered reliable ids, per message kind
///
/// Entries expire after the configured window; a retransmission older than
/// the window would be delivered again, so the window must exceed the
/// sender's give-up time.
#[derive(Debug)]
pub struct SeenIds {
    window_ms: Millis,
    by_kind: HashMap<MessageKind, HashMap<MessageId, Millis>>,
}

impl SeenIds {
    /// Create an empty set with the given retention window
    pub fn new(window_ms: Millis) -> Self {
        Self {
            window_ms,
            by_kind: HashMap::new(),
        }
    }

    /// Record an id, returning `true` the first time it is seen
    pub fn first_sighting(&mut self, kind: MessageKind, id: MessageId, now: Millis) -> bool {
        let seen = self.by_kind.entry(kind).or_default();
        if seen.contains_key(&id) {
            return false;
        }
        seen.insert(id, now);
        true
    }

    /// Check if an id has been seen
    pub fn contains(&self, kind: MessageKind, id: &MessageId) -> bool {
        self.by_kind
            .get(&kind)
            .is_some_and(|seen| seen.contains_key(id))
    }

    /// Drop ids first seen more than the window ago
    pub fn prune(&mut self, now: Millis) -> usize {
        let cutoff = now.saturating_sub(self.window_ms);
        let mut removed = 0;
        for seen in self.by_kind.values_mut() {
            let before = seen.len();
            seen.retain(|_, first_seen| *first_seen >= cutoff);
            removed += before - seen.len();
        }
        self.by_kind.retain(|_, seen| !seen.is_empty());
        removed
    }

    /// Total ids remembered
    pub fn len(&self) -> usize {
        self.by_kind.values().map(HashMap::len).sum()
    }

    /// Check if nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}
