//! Ticknet Vault - Bounded history of client-side predictions
//!
//! The vault stores one [`PredictionSnapshot`] per local simulation step for
//! the entity the client controls. When an authoritative update arrives the
//! reconciler asks the vault what the client predicted at the update's
//! prediction timestamp.
//!
//! # Features
//!
//! - **Bounded memory**: at most `capacity` snapshots, oldest evicted first
//! - **O(1) insertion** for in-order timestamps
//! - **O(log n) nearest lookup** by timestamp
//! - **Cheap purging** of snapshots the server will never reference again
//!
//! # Example
//!
//! ```rust
//! use ticknet_core::{PredictionHistory, PredictionSnapshot, Vec2};
//! use ticknet_vault::PredictionVault;
//!
//! let mut vault = PredictionVault::new(120);
//!
//! vault.add(PredictionSnapshot::new(1000, 50, Vec2::new(100.0, 100.0)));
//! vault.add(PredictionSnapshot::new(1016, 51, Vec2::new(102.0, 100.0)));
//!
//! // Nearest snapshot to a timestamp the server echoed back
//! let matched = vault.get(1003).unwrap();
//! assert_eq!(matched.tick, 50);
//!
//! // Once consumed, older entries can go
//! vault.remove_older_than(1016);
//! assert_eq!(vault.len(), 1);
//! ```

use std::collections::VecDeque;
use ticknet_core::{Millis, PredictionHistory, PredictionSnapshot, Tick};

/// Default capacity: two seconds of history at 60 ticks per second
pub const DEFAULT_VAULT_CAPACITY: usize = 120;

/// A bounded, timestamp-ordered store of predicted states
///
/// Older snapshots are evicted when the vault is full.
#[derive(Debug, Clone)]
pub struct PredictionVault {
    /// Snapshots ordered by timestamp (oldest first)
    snapshots: VecDeque<PredictionSnapshot>,
    /// Capacity (max snapshots)
    capacity: usize,
}

impl PredictionVault {
    /// Create a new vault with the given capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of snapshots to keep; must cover the
    ///   longest expected round trip in ticks
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Iterate stored snapshots from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &PredictionSnapshot> {
        self.snapshots.iter()
    }

    /// Find the snapshot recorded for an exact local tick
    pub fn get_by_tick(&self, tick: Tick) -> Option<&PredictionSnapshot> {
        self.snapshots.iter().rev().find(|s| s.tick == tick)
    }

    /// Get the oldest snapshot
    pub fn oldest(&self) -> Option<&PredictionSnapshot> {
        self.snapshots.front()
    }

    /// Get statistics about the vault
    pub fn stats(&self) -> VaultStats {
        let (oldest, newest) = self.timestamp_range().unwrap_or((0, 0));
        VaultStats {
            capacity: self.capacity,
            count: self.snapshots.len(),
            oldest_timestamp: oldest,
            newest_timestamp: newest,
        }
    }
}

impl PredictionHistory for PredictionVault {
    fn add(&mut self, snapshot: PredictionSnapshot) {
        let in_order = self
            .snapshots
            .back()
            .map_or(true, |last| last.timestamp <= snapshot.timestamp);

        if in_order {
            self.snapshots.push_back(snapshot);
        } else {
            let index = self
                .snapshots
                .partition_point(|s| s.timestamp <= snapshot.timestamp);
            self.snapshots.insert(index, snapshot);
        }

        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    fn get(&self, timestamp: Millis) -> Option<&PredictionSnapshot> {
        let index = self.snapshots.partition_point(|s| s.timestamp < timestamp);
        let before = index.checked_sub(1).and_then(|i| self.snapshots.get(i));
        let after = self.snapshots.get(index);

        match (before, after) {
            (Some(b), Some(a)) => {
                if timestamp - b.timestamp <= a.timestamp - timestamp && a.timestamp != timestamp {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(b), None) => Some(b),
            (None, a) => a,
        }
    }

    fn latest(&self) -> Option<&PredictionSnapshot> {
        self.snapshots.back()
    }

    fn remove_older_than(&mut self, timestamp: Millis) {
        while self
            .snapshots
            .front()
            .is_some_and(|s| s.timestamp < timestamp)
        {
            self.snapshots.pop_front();
        }
    }

    fn remove_up_to(&mut self, timestamp: Millis) {
        while self
            .snapshots
            .front()
            .is_some_and(|s| s.timestamp <= timestamp)
        {
            self.snapshots.pop_front();
        }
    }

    fn clear(&mut self) {
        self.snapshots.clear();
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.snapshots.len()
    }

    fn timestamp_range(&self) -> Option<(Millis, Millis)> {
        let oldest = self.snapshots.front()?;
        let newest = self.snapshots.back()?;
        Some((oldest.timestamp, newest.timestamp))
    }
}

impl Default for PredictionVault {
    fn default() -> Self {
        Self::new(DEFAULT_VAULT_CAPACITY)
    }
}

/// Statistics about the vault
#[derive(Debug, Clone, Copy)]
pub struct VaultStats {
    /// Maximum capacity
    pub capacity: usize,
    /// Current number of stored snapshots
    pub count: usize,
    /// Oldest timestamp in the vault
    pub oldest_timestamp: Millis,
    /// Newest timestamp in the vault
    pub newest_timestamp: Millis,
}

impl VaultStats {
    /// Time covered by the stored snapshots
    pub fn span_ms(&self) -> Millis {
        if self.count == 0 {
            0
        } else {
            self.newest_timestamp - self.oldest_timestamp
        }
    }

    /// Get the fill percentage (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f32 {
        self.count as f32 / self.capacity as f32
    }
}
