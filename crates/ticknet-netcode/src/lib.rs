//! Ticknet Netcode - client/server synchronization on top of the tick core
//!
//! This crate provides the networked half of ticknet:
//!
//! - **Message layer**: typed messages over a datagram transport, with
//!   per-kind reliability, acknowledgments, retries, and de-duplication
//! - **Server input buffer**: per-player input history and prediction tagging
//!   of outgoing movement updates
//! - **Prediction**: apply local input immediately and record the result
//! - **Reconciliation**: compare server truth with recorded predictions and
//!   snap when they diverge too far
//! - **Interpolation**: smooth remote entities between updates
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── Client ────────────────────────┐
//! │  input ─▶ ClientPredictor ─▶ PredictionVault            │
//! │                 │  ▲                                     │
//! │     InputBatch  │  │ MovementUpdate (local entity)       │
//! │                 ▼  │                                     │
//! │            MessageLayer ◀── MovementUpdate (remote) ──▶ RemoteInterpolator
//! └─────────────────┬──▲────────────────────────────────────┘
//!                   │  │ datagrams
//! ┌─────────────────▼──┴─────── Server ────────────────────┐
//! │            MessageLayer ─▶ ServerInputBuffer             │
//! │                               │ prediction tag           │
//! │   Scheduler tick ─▶ simulate ─┴─▶ MovementUpdate         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use ticknet_netcode::{
//!     LinkConditions, MemoryNetwork, Message, MessageKind, MessageLayer, PeerId,
//!     ReliableConfig,
//! };
//! use ticknet_core::{EntityId, PlayerId};
//!
//! let network = MemoryNetwork::new(7);
//! let mut server = MessageLayer::new(
//!     network.endpoint("server", LinkConditions::perfect()),
//!     PeerId(0),
//!     ReliableConfig::default(),
//! );
//! let mut client = MessageLayer::new(
//!     network.endpoint("client", LinkConditions::perfect()),
//!     PeerId(1),
//!     ReliableConfig::default(),
//! );
//!
//! client
//!     .on_message(MessageKind::PlayerJoined, |_, message| println!("{message:?}"))
//!     .unwrap();
//!
//! let joined = Message::PlayerJoined {
//!     player: PlayerId::new(1),
//!     entity: EntityId::new(10),
//! };
//! server.send(&"client".into(), joined, 0).unwrap();
//!
//! assert_eq!(client.poll(5), 1);
//! server.poll(10);
//! assert_eq!(server.pending_reliable(), 0);
//! ```

mod codec;
mod config;
mod error;
mod input_buffer;
mod interpolation;
mod layer;
mod prediction;
mod protocol;
mod reconciliation;
mod reliable;
mod staleness;
mod transport;

pub use codec::{decode_packet, encode_packet, MAX_PACKET_BYTES};
pub use config::{NetcodeConfig, ReliableConfig};
pub use error::{Error, Result};
pub use input_buffer::{BufferedInput, PredictionTag, ServerInputBuffer};
pub use interpolation::RemoteInterpolator;
pub use layer::{Handler, LayerStats, MessageLayer};
pub use prediction::{ClientPredictor, InputProcessor, KinematicProcessor, LocalState};
pub use protocol::{
    InputEnvelope, Message, MessageId, MessageKind, MovementInput, MovementUpdate, Packet, PeerId,
    Reliability,
};
pub use reconciliation::{
    decide, PredictionMetrics, ReconcileOutcome, ReconciliationDecision, Reconciler, SkipReason,
};
pub use reliable::{PendingReliableMessage, ReliableSender, RetryAction, SeenIds};
pub use staleness::TickGate;
pub use transport::{Address, LinkConditions, MemoryNetwork, MemoryTransport, Transport, UdpTransport};

// Re-export the history types predictors are generic over
pub use ticknet_core::{PredictionHistory, PredictionSnapshot};
pub use ticknet_vault::PredictionVault;
