//! Wire protocol: message payloads, reliability table, and packet envelopes
//!
//! Every payload that crosses the network is a variant of [`Message`]. The
//! reliability of a message is a property of its kind, looked up in
//! [`MessageKind::reliability`], never chosen by the caller.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt;
use ticknet_core::{EntityId, Millis, PlayerId, Tick};

/// Identity of a sending endpoint, part of every reliable message id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// Unique id of one reliable message
///
/// Unique per sender, counter, and send timestamp, so ids stay distinct
/// across a sender restarting its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub sender: PeerId,
    pub counter: u64,
    pub timestamp: Millis,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.sender.0, self.counter, self.timestamp)
    }
}

/// Delivery guarantee for a message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reliability {
    /// Sent once; may be lost, duplicated, or reordered
    Unreliable,
    /// Acknowledged and retried until acknowledged or abandoned
    Reliable,
}

/// Discriminant of [`Message`], used for handler registration and
/// de-duplication bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    PlayerJoined,
    PlayerLeft,
    InputBatch,
    MovementUpdate,
    EntitySpawned,
    EntityDestroyed,
    ReloadStarted,
    ReloadCompleted,
}

impl MessageKind {
    /// Every message kind
    pub const ALL: [MessageKind; 8] = [
        MessageKind::PlayerJoined,
        MessageKind::PlayerLeft,
        MessageKind::InputBatch,
        MessageKind::MovementUpdate,
        MessageKind::EntitySpawned,
        MessageKind::EntityDestroyed,
        MessageKind::ReloadStarted,
        MessageKind::ReloadCompleted,
    ];

    /// Static reliability table
    ///
    /// High-frequency state is last-write-wins and goes unreliable; join,
    /// leave, and discrete gameplay events are reliable.
    pub fn reliability(self) -> Reliability {
        match self {
            MessageKind::InputBatch | MessageKind::MovementUpdate => Reliability::Unreliable,
            MessageKind::PlayerJoined
            | MessageKind::PlayerLeft
            | MessageKind::EntitySpawned
            | MessageKind::EntityDestroyed
            | MessageKind::ReloadStarted
            | MessageKind::ReloadCompleted => Reliability::Reliable,
        }
    }

    /// Check if this kind uses reliable delivery
    pub fn is_reliable(self) -> bool {
        self.reliability() == Reliability::Reliable
    }
}

/// One frame of player intent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementInput {
    /// Desired movement direction; zero means no movement key held
    pub direction: Vec2,
    /// Facing angle in radians
    pub rotation: f32,
}

/// Input sent from client to server
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEnvelope {
    /// Client timestamp at which the input was predicted
    pub timestamp: Millis,
    /// The input itself
    pub input: MovementInput,
    /// Client tick at which the input was predicted
    pub client_game_tick: Tick,
}

/// Authoritative movement state sent from server to client
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementUpdate {
    pub entity: EntityId,
    pub position: Vec2,
    pub rotation: f32,
    pub velocity: Vec2,
    /// Server timestamp at which the state was computed
    pub timestamp: Millis,
    /// Server tick at which the state was computed
    pub game_tick: Tick,
    /// Client timestamp this state correlates with
    pub prediction_timestamp: Millis,
    /// Client tick this state correlates with
    pub prediction_tick: Tick,
}

/// Every payload the netcode carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    PlayerJoined { player: PlayerId, entity: EntityId },
    PlayerLeft { player: PlayerId },
    /// Inputs accumulated since the previous batch, oldest first
    InputBatch { inputs: Vec<InputEnvelope> },
    MovementUpdate(MovementUpdate),
    EntitySpawned { entity: EntityId, position: Vec2 },
    EntityDestroyed { entity: EntityId },
    /// `tick` is the server tick the event happened on, used to discard
    /// events that arrive after a newer one
    ReloadStarted { entity: EntityId, tick: Tick },
    ReloadCompleted { entity: EntityId, tick: Tick },
}

impl Message {
    /// Kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::PlayerJoined { .. } => MessageKind::PlayerJoined,
            Message::PlayerLeft { .. } => MessageKind::PlayerLeft,
            Message::InputBatch { .. } => MessageKind::InputBatch,
            Message::MovementUpdate(_) => MessageKind::MovementUpdate,
            Message::EntitySpawned { .. } => MessageKind::EntitySpawned,
            Message::EntityDestroyed { .. } => MessageKind::EntityDestroyed,
            Message::ReloadStarted { .. } => MessageKind::ReloadStarted,
            Message::ReloadCompleted { .. } => MessageKind::ReloadCompleted,
        }
    }

    /// Delivery guarantee for this message
    pub fn reliability(&self) -> Reliability {
        self.kind().reliability()
    }
}

/// A datagram on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// A message, carrying an id when its kind is reliable
    Message {
        #[serde(rename = "_reliableId")]
        reliable_id: Option<MessageId>,
        message: Message,
    },
    /// Acknowledgment echoing a reliable message id verbatim
    Ack {
        #[serde(rename = "_reliableId")]
        reliable_id: MessageId,
    },
}
