//! Prediction history trait for storing and retrieving predicted states
//!
//! This trait is used by:
//! - `ticknet-vault` for the bounded ring buffer kept by every client
//! - `ticknet-netcode` for reconciliation against authoritative updates
//!
//! Snapshots are looked up by the millisecond timestamp recorded when they
//! were predicted, because that is the correlation key the server echoes back.

use crate::time::{Millis, Tick};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Predicted state of the locally controlled entity at one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionSnapshot {
    /// Timestamp at which the prediction was made
    pub timestamp: Millis,
    /// Local tick the prediction belongs to
    pub tick: Tick,
    /// Predicted position
    pub position: Vec2,
}

impl PredictionSnapshot {
    /// Create a new snapshot
    pub fn new(timestamp: Millis, tick: Tick, position: Vec2) -> Self {
        Self {
            timestamp,
            tick,
            position,
        }
    }
}

/// Trait for storing and retrieving predicted states.
///
/// Implementations keep snapshots ordered by timestamp.
pub trait PredictionHistory {
    /// Record a snapshot.
    fn add(&mut self, snapshot: PredictionSnapshot);

    /// Get the snapshot whose timestamp is closest to `timestamp`.
    ///
    /// Ties resolve to the older snapshot. Returns `None` only when empty.
    fn get(&self, timestamp: Millis) -> Option<&PredictionSnapshot>;

    /// Get the most recent snapshot.
    fn latest(&self) -> Option<&PredictionSnapshot>;

    /// Remove every snapshot strictly older than `timestamp`.
    fn remove_older_than(&mut self, timestamp: Millis);

    /// Remove every snapshot at or before `timestamp`.
    fn remove_up_to(&mut self, timestamp: Millis);

    /// Clear all stored snapshots.
    fn clear(&mut self);

    /// Maximum number of snapshots retained.
    fn capacity(&self) -> usize;

    /// Number of snapshots currently stored.
    fn len(&self) -> usize;

    /// Check if the history is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp range of stored snapshots as `(oldest, newest)`.
    fn timestamp_range(&self) -> Option<(Millis, Millis)>;
}
