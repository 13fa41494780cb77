//! Discarding out-of-order discrete events
//!
//! Reliable messages may arrive in any order. Events that carry the server
//! tick they happened on can be filtered through a [`TickGate`], which lets
//! through only events at least as new as the last one applied for the same
//! entity.

use std::collections::HashMap;
use ticknet_core::{EntityId, Tick};

/// Last applied tick per entity
#[derive(Debug, Default)]
pub struct TickGate {
    last_applied: HashMap<EntityId, Tick>,
}

impl TickGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an event at `tick` for `entity`
    ///
    /// Returns `false` if a newer event was already admitted. Events at the
    /// same tick are admitted so that start and finish on one tick both apply.
    pub fn admit(&mut self, entity: EntityId, tick: Tick) -> bool {
        match self.last_applied.get(&entity) {
            Some(&last) if tick < last => false,
            _ => {
                self.last_applied.insert(entity, tick);
                true
            }
        }
    }

    /// Last admitted tick for an entity
    pub fn last_applied(&self, entity: EntityId) -> Option<Tick> {
        self.last_applied.get(&entity).copied()
    }

    /// Forget an entity
    pub fn forget(&mut self, entity: EntityId) {
        self.last_applied.remove(&entity);
    }
}
