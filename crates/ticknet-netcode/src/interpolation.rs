//! Remote entity interpolation
//!
//! Entities this client does not control have no local input to predict
//! from. Each authoritative update starts a short linear glide from wherever
//! the entity is currently drawn to the new position.

use crate::protocol::MovementUpdate;
use glam::Vec2;
use std::collections::HashMap;
use std::f32::consts::{PI, TAU};
use ticknet_core::{EntityId, Millis, Tick};

#[derive(Debug, Clone, Copy)]
struct Track {
    from_position: Vec2,
    to_position: Vec2,
    from_rotation: f32,
    to_rotation: f32,
    started_at: Millis,
    game_tick: Tick,
}

impl Track {
    fn alpha(&self, now: Millis, duration_ms: Millis) -> f32 {
        if duration_ms == 0 {
            return 1.0;
        }
        (now.saturating_sub(self.started_at) as f32 / duration_ms as f32).clamp(0.0, 1.0)
    }
}

/// Smooths authoritative positions of remote entities for rendering
#[derive(Debug)]
pub struct RemoteInterpolator {
    duration_ms: Millis,
    tracks: HashMap<EntityId, Track>,
}

impl RemoteInterpolator {
    /// Create an interpolator gliding over `duration_ms`
    pub fn new(duration_ms: Millis) -> Self {
        Self {
            duration_ms,
            tracks: HashMap::new(),
        }
    }

    /// Start gliding toward a new authoritative update
    ///
    /// The first update for an entity places it directly. Updates whose
    /// `game_tick` is older than the last accepted one are ignored and
    /// `false` is returned.
    pub fn push(&mut self, update: &MovementUpdate, now: Millis) -> bool {
        let duration_ms = self.duration_ms;
        match self.tracks.get_mut(&update.entity) {
            Some(track) => {
                if update.game_tick < track.game_tick {
                    return false;
                }
                let alpha = track.alpha(now, duration_ms);
                track.from_position = track.from_position.lerp(track.to_position, alpha);
                track.from_rotation = lerp_angle(track.from_rotation, track.to_rotation, alpha);
                track.to_position = update.position;
                track.to_rotation = update.rotation;
                track.started_at = now;
                track.game_tick = update.game_tick;
            }
            None => {
                self.tracks.insert(
                    update.entity,
                    Track {
                        from_position: update.position,
                        to_position: update.position,
                        from_rotation: update.rotation,
                        to_rotation: update.rotation,
                        started_at: now,
                        game_tick: update.game_tick,
                    },
                );
            }
        }
        true
    }

    /// Position to draw an entity at
    pub fn sample(&self, entity: EntityId, now: Millis) -> Option<Vec2> {
        let track = self.tracks.get(&entity)?;
        Some(
            track
                .from_position
                .lerp(track.to_position, track.alpha(now, self.duration_ms)),
        )
    }

    /// Rotation to draw an entity with, turning the short way round
    pub fn sample_rotation(&self, entity: EntityId, now: Millis) -> Option<f32> {
        let track = self.tracks.get(&entity)?;
        Some(lerp_angle(
            track.from_rotation,
            track.to_rotation,
            track.alpha(now, self.duration_ms),
        ))
    }

    /// Stop tracking an entity
    pub fn remove(&mut self, entity: EntityId) -> bool {
        self.tracks.remove(&entity).is_some()
    }

    /// Number of tracked entities
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Check if no entity is tracked
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Forget every entity
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

fn lerp_angle(from: f32, to: f32, alpha: f32) -> f32 {
    let delta = (to - from + PI).rem_euclid(TAU) - PI;
    from + delta * alpha
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(entity: u64, game_tick: Tick, position: Vec2, rotation: f32) -> MovementUpdate {
        MovementUpdate {
            entity: EntityId::new(entity),
            position,
            rotation,
            velocity: Vec2::ZERO,
            timestamp: 0,
            game_tick,
            prediction_timestamp: 0,
            prediction_tick: 0,
        }
    }

    #[test]
    fn test_first_update_snaps() {
        let mut interpolator = RemoteInterpolator::new(100);
        interpolator.push(&update(1, 1, Vec2::new(10.0, 0.0), 0.0), 0);
        assert_eq!(interpolator.sample(EntityId::new(1), 0), Some(Vec2::new(10.0, 0.0)));
        assert_eq!(interpolator.sample(EntityId::new(2), 0), None);
    }

    #[test]
    fn test_linear_glide() {
        let mut interpolator = RemoteInterpolator::new(100);
        let entity = EntityId::new(1);
        interpolator.push(&update(1, 1, Vec2::ZERO, 0.0), 0);
        interpolator.push(&update(1, 2, Vec2::new(100.0, 0.0), 0.0), 1_000);

        assert_eq!(interpolator.sample(entity, 1_000), Some(Vec2::ZERO));
        assert_eq!(interpolator.sample(entity, 1_050), Some(Vec2::new(50.0, 0.0)));
        assert_eq!(interpolator.sample(entity, 1_100), Some(Vec2::new(100.0, 0.0)));
        assert_eq!(interpolator.sample(entity, 5_000), Some(Vec2::new(100.0, 0.0)));
    }

    #[test]
    fn test_retarget_mid_glide() {
        let mut interpolator = RemoteInterpolator::new(100);
        let entity = EntityId::new(1);
        interpolator.push(&update(1, 1, Vec2::ZERO, 0.0), 0);
        interpolator.push(&update(1, 2, Vec2::new(100.0, 0.0), 0.0), 0);
        interpolator.push(&update(1, 3, Vec2::new(100.0, 100.0), 0.0), 50);

        // Glide restarts from the drawn position, not the old target
        assert_eq!(interpolator.sample(entity, 50), Some(Vec2::new(50.0, 0.0)));
        assert_eq!(interpolator.sample(entity, 150), Some(Vec2::new(100.0, 100.0)));
    }

    #[test]
    fn test_stale_update_ignored() {
        let mut interpolator = RemoteInterpolator::new(100);
        let entity = EntityId::new(1);
        assert!(interpolator.push(&update(1, 5, Vec2::new(5.0, 0.0), 0.0), 0));
        assert!(!interpolator.push(&update(1, 4, Vec2::new(-100.0, 0.0), 0.0), 10));
        assert_eq!(interpolator.sample(entity, 500), Some(Vec2::new(5.0, 0.0)));
    }

    #[test]
    fn test_rotation_takes_short_way() {
        let mut interpolator = RemoteInterpolator::new(100);
        let entity = EntityId::new(1);
        interpolator.push(&update(1, 1, Vec2::ZERO, 3.0), 0);
        interpolator.push(&update(1, 2, Vec2::ZERO, -3.0), 0);

        let halfway = interpolator.sample_rotation(entity, 50).unwrap();
        // Crossing +/-PI rather than sweeping through zero
        assert!(halfway.abs() > 3.0, "rotation {halfway}");
    }

    #[test]
    fn test_remove_and_clear() {
        let mut interpolator = RemoteInterpolator::new(100);
        interpolator.push(&update(1, 1, Vec2::ZERO, 0.0), 0);
        interpolator.push(&update(2, 1, Vec2::ZERO, 0.0), 0);

        assert!(interpolator.remove(EntityId::new(1)));
        assert_eq!(interpolator.len(), 1);
        interpolator.clear();
        assert!(interpolator.is_empty());
    }
}
