//! Server-side input buffering
//!
//! Keeps the most recent inputs received from each player and answers the
//! question the tick loop asks when it emits a movement update: which point
//! in the client's own prediction history does this state correspond to?

use crate::protocol::{InputEnvelope, MovementUpdate};
use std::collections::{HashMap, VecDeque};
use ticknet_core::{Millis, PlayerId, Tick};

/// An input as received by the server
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedInput {
    /// The envelope the client sent
    pub envelope: InputEnvelope,
    /// Server tick at which the input arrived
    pub received_at_tick: Tick,
    /// Server time at which the input arrived
    pub received_at_ms: Millis,
}

/// Client-side correlation keys attached to a movement update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionTag {
    pub timestamp: Millis,
    pub tick: Tick,
}

/// Per-player bounded input history
///
/// Each player owns an independent ring; once a ring holds `max_size`
/// inputs, adding another evicts the oldest.
#[derive(Debug)]
pub struct ServerInputBuffer {
    max_size: usize,
    players: HashMap<PlayerId, VecDeque<BufferedInput>>,
}

impl ServerInputBuffer {
    /// Create a buffer holding up to `max_size` inputs per player
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is 0.
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "input buffer size must be greater than 0");
        Self {
            max_size,
            players: HashMap::new(),
        }
    }

    /// Record one input arriving at the given server tick and time
    pub fn add_input(
        &mut self,
        player: PlayerId,
        envelope: InputEnvelope,
        received_at_tick: Tick,
        received_at_ms: Millis,
    ) {
        let max_size = self.max_size;
        let ring = self
            .players
            .entry(player)
            .or_insert_with(|| VecDeque::with_capacity(max_size));
        if ring.len() >= max_size {
            ring.pop_front();
        }
        ring.push_back(BufferedInput {
            envelope,
            received_at_tick,
            received_at_ms,
        });
    }

    /// Record a batch of inputs in the order the client sent them
    pub fn add_input_batch(
        &mut self,
        player: PlayerId,
        inputs: impl IntoIterator<Item = InputEnvelope>,
        received_at_tick: Tick,
        received_at_ms: Millis,
    ) {
        for envelope in inputs {
            self.add_input(player, envelope, received_at_tick, received_at_ms);
        }
    }

    /// Newest buffered input for a player, by client tick
    ///
    /// Input batches travel unreliably and can arrive out of order, so this
    /// is the input with the highest `client_game_tick`, not the last one to
    /// arrive. Ties go to the later arrival.
    pub fn latest_input(&self, player: PlayerId) -> Option<&BufferedInput> {
        self.players
            .get(&player)?
            .iter()
            .max_by_key(|input| input.envelope.client_game_tick)
    }

    /// Inputs with a client timestamp strictly after `timestamp`, oldest first
    pub fn inputs_since(
        &self,
        player: PlayerId,
        timestamp: Millis,
    ) -> impl Iterator<Item = &BufferedInput> + '_ {
        self.players
            .get(&player)
            .into_iter()
            .flatten()
            .filter(move |input| input.envelope.timestamp > timestamp)
    }

    /// Forget everything buffered for a player
    pub fn remove_player(&mut self, player: PlayerId) -> bool {
        self.players.remove(&player).is_some()
    }

    /// Correlation keys for an update computed at `update_tick`
    ///
    /// When the latest input arrived on `update_tick` the update is its
    /// direct result and carries the input's own timestamp and tick.
    /// Otherwise the update came from momentum or external forces, and the
    /// keys are advanced by the ticks elapsed since that input arrived,
    /// saturating rather than wrapping on client-supplied values.
    /// Returns `None` if the player has sent nothing.
    pub fn prediction_tag(
        &self,
        player: PlayerId,
        update_tick: Tick,
        tick_interval_ms: Millis,
    ) -> Option<PredictionTag> {
        let latest = self.latest_input(player)?;
        let envelope = &latest.envelope;

        if update_tick == latest.received_at_tick {
            return Some(PredictionTag {
                timestamp: envelope.timestamp,
                tick: envelope.client_game_tick,
            });
        }

        let elapsed = update_tick.saturating_sub(latest.received_at_tick);
        Some(PredictionTag {
            timestamp: envelope
                .timestamp
                .saturating_add(elapsed.saturating_mul(tick_interval_ms)),
            tick: envelope.client_game_tick.saturating_add(elapsed),
        })
    }

    /// Fill in the prediction keys of an outgoing update
    ///
    /// Uses `update.game_tick` as the update tick. Returns `false` and leaves
    /// the update untouched if the player has no buffered input.
    pub fn tag_update(
        &self,
        player: PlayerId,
        update: &mut MovementUpdate,
        tick_interval_ms: Millis,
    ) -> bool {
        match self.prediction_tag(player, update.game_tick, tick_interval_ms) {
            Some(tag) => {
                update.prediction_timestamp = tag.timestamp;
                update.prediction_tick = tag.tick;
                true
            }
            None => false,
        }
    }

    /// Inputs buffered for one player
    pub fn len(&self, player: PlayerId) -> usize {
        self.players.get(&player).map_or(0, VecDeque::len)
    }

    /// Players with at least one buffered input
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Get the per-player capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
