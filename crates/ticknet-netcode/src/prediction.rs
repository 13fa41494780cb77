//! Client-side prediction
//!
//! The locally controlled entity is simulated ahead of the server. Every
//! tick the [`ClientPredictor`] applies the buffered input, records the
//! resulting position in its history, and queues the input for the server.
//! When the server's answer comes back, the recorded prediction for the same
//! moment is looked up and compared by the [`Reconciler`].

use crate::config::NetcodeConfig;
use crate::protocol::{InputEnvelope, Message, MovementInput, MovementUpdate};
use crate::reconciliation::{PredictionMetrics, ReconcileOutcome, Reconciler, SkipReason};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::mem;
use ticknet_core::{EntityId, Millis, PredictionHistory, PredictionSnapshot, Tick};
use ticknet_vault::PredictionVault;
use tracing::trace;

/// Movement state of one entity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub rotation: f32,
}

impl LocalState {
    /// State at rest at `position`
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// Movement simulation shared by client prediction and the server
///
/// Client and server must run the same processor so predictions only
/// diverge when the server sees something the client did not.
pub trait InputProcessor {
    /// Advance `state` by one tick of `dt_ms`
    ///
    /// `input` is `None` when no input was buffered for this tick.
    fn apply(&mut self, state: &mut LocalState, input: Option<&MovementInput>, dt_ms: Millis);
}

impl<F> InputProcessor for F
where
    F: FnMut(&mut LocalState, Option<&MovementInput>, Millis),
{
    fn apply(&mut self, state: &mut LocalState, input: Option<&MovementInput>, dt_ms: Millis) {
        self(state, input, dt_ms)
    }
}

/// Top-down movement at constant speed with per-tick friction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicProcessor {
    /// Units per second while a direction is held
    pub speed: f32,
    /// Fraction of velocity kept per tick without input
    pub friction: f32,
}

impl Default for KinematicProcessor {
    fn default() -> Self {
        Self {
            speed: 200.0,
            friction: 0.8,
        }
    }
}

impl InputProcessor for KinematicProcessor {
    fn apply(&mut self, state: &mut LocalState, input: Option<&MovementInput>, dt_ms: Millis) {
        match input {
            Some(input) => {
                state.velocity = input.direction.normalize_or_zero() * self.speed;
                state.rotation = input.rotation;
            }
            None => {
                state.velocity *= self.friction;
                if state.velocity.length_squared() < 1e-4 {
                    state.velocity = Vec2::ZERO;
                }
            }
        }
        state.position += state.velocity * (dt_ms as f32 / 1000.0);
    }
}

/// Prediction driver for the locally controlled entity
pub struct ClientPredictor<P, H = PredictionVault> {
    entity: EntityId,
    processor: P,
    state: LocalState,
    history: H,
    reconciler: Reconciler,
    buffered: Option<MovementInput>,
    outgoing: Vec<InputEnvelope>,
}

impl<P: InputProcessor> ClientPredictor<P, PredictionVault> {
    /// Create a predictor backed by a vault sized from `config`
    pub fn new(entity: EntityId, processor: P, initial: LocalState, config: &NetcodeConfig) -> Self {
        Self::with_history(
            entity,
            processor,
            initial,
            PredictionVault::new(config.vault_capacity.max(1)),
            Reconciler::new(config.reconciliation_threshold, config.tick_interval_ms),
        )
    }
}

impl<P: InputProcessor, H: PredictionHistory> ClientPredictor<P, H> {
    /// Create a predictor with an explicit history and reconciler
    pub fn with_history(
        entity: EntityId,
        processor: P,
        initial: LocalState,
        history: H,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            entity,
            processor,
            state: initial,
            history,
            reconciler,
            buffered: None,
            outgoing: Vec::new(),
        }
    }

    /// Buffer the input to apply on the next step
    ///
    /// A later call before the step replaces the earlier input.
    pub fn buffer_input(&mut self, input: MovementInput) {
        self.buffered = Some(input);
    }

    /// Run one local simulation tick
    ///
    /// Applies the buffered input, records a snapshot at `now`, and queues
    /// the input for the next batch sent to the server.
    pub fn step(&mut self, tick: Tick, now: Millis, dt_ms: Millis) -> PredictionSnapshot {
        let input = self.buffered.take();
        self.processor.apply(&mut self.state, input.as_ref(), dt_ms);

        if let Some(input) = input {
            self.outgoing.push(InputEnvelope {
                timestamp: now,
                input,
                client_game_tick: tick,
            });
        }

        let snapshot = PredictionSnapshot::new(now, tick, self.state.position);
        self.history.add(snapshot);
        trace!(entity = %self.entity, tick, position = ?snapshot.position, "predicted");
        snapshot
    }

    /// Drain queued inputs into one batch message, oldest first
    pub fn take_input_batch(&mut self) -> Option<Message> {
        if self.outgoing.is_empty() {
            return None;
        }
        Some(Message::InputBatch {
            inputs: mem::take(&mut self.outgoing),
        })
    }

    /// Reconcile an authoritative update
    ///
    /// Updates for other entities are skipped without touching metrics.
    pub fn on_authoritative(&mut self, update: &MovementUpdate) -> ReconcileOutcome {
        if update.entity != self.entity {
            return ReconcileOutcome::Skipped(SkipReason::OtherEntity);
        }
        self.reconciler
            .reconcile(&mut self.history, &mut self.state, update)
    }

    /// Entity being predicted
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Current predicted state
    pub fn state(&self) -> &LocalState {
        &self.state
    }

    /// Recorded predictions
    pub fn history(&self) -> &H {
        &self.history
    }

    /// Inputs queued but not yet batched
    pub fn queued_inputs(&self) -> &[InputEnvelope] {
        &self.outgoing
    }

    /// Reconciliation counters
    pub fn metrics(&self) -> &PredictionMetrics {
        self.reconciler.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Millis = 16;

    fn predictor() -> ClientPredictor<KinematicProcessor> {
        ClientPredictor::new(
            EntityId::new(1),
            KinematicProcessor {
                speed: 1000.0,
                friction: 0.5,
            },
            LocalState::at(Vec2::ZERO),
            &NetcodeConfig::default(),
        )
    }

    fn right() -> MovementInput {
        MovementInput {
            direction: Vec2::X,
            rotation: 0.0,
        }
    }

    #[test]
    fn test_step_applies_input_and_records() {
        let mut predictor = predictor();
        predictor.buffer_input(right());

        let snapshot = predictor.step(1, 1_000, DT);

        assert_eq!(snapshot.position, Vec2::new(16.0, 0.0));
        assert_eq!(predictor.state().velocity, Vec2::new(1000.0, 0.0));
        assert_eq!(predictor.history().len(), 1);
        assert_eq!(predictor.queued_inputs().len(), 1);
    }

    #[test]
    fn test_momentum_without_input() {
        let mut predictor = predictor();
        predictor.buffer_input(right());
        predictor.step(1, 1_000, DT);
        predictor.step(2, 1_016, DT);

        assert_eq!(predictor.state().position, Vec2::new(24.0, 0.0));
        // Only the tick that had input is sent
        assert_eq!(predictor.queued_inputs().len(), 1);
        assert_eq!(predictor.history().len(), 2);
    }

    #[test]
    fn test_input_batch_is_ordered_and_drained() {
        let mut predictor = predictor();
        for tick in 0..3 {
            predictor.buffer_input(right());
            predictor.step(tick, 1_000 + tick * DT, DT);
        }

        match predictor.take_input_batch() {
            Some(Message::InputBatch { inputs }) => {
                let ticks: Vec<_> = inputs.iter().map(|i| i.client_game_tick).collect();
                assert_eq!(ticks, vec![0, 1, 2]);
            }
            other => panic!("expected input batch, got {other:?}"),
        }
        assert!(predictor.take_input_batch().is_none());
    }

    #[test]
    fn test_other_entity_ignored() {
        let mut predictor = predictor();
        predictor.step(1, 1_000, DT);

        let update = MovementUpdate {
            entity: EntityId::new(2),
            position: Vec2::new(500.0, 0.0),
            rotation: 0.0,
            velocity: Vec2::ZERO,
            timestamp: 0,
            game_tick: 1,
            prediction_timestamp: 1_000,
            prediction_tick: 1,
        };
        assert_eq!(
            predictor.on_authoritative(&update),
            ReconcileOutcome::Skipped(SkipReason::OtherEntity)
        );
        assert_eq!(predictor.state().position, Vec2::ZERO);
        assert_eq!(predictor.metrics().skipped, 0);
    }

    #[test]
    fn test_closure_processor() {
        let mut predictor = ClientPredictor::new(
            EntityId::new(1),
            |state: &mut LocalState, _: Option<&MovementInput>, _: Millis| {
                state.position.y += 1.0;
            },
            LocalState::default(),
            &NetcodeConfig::default(),
        );
        predictor.step(0, 0, DT);
        predictor.step(1, DT, DT);
        assert_eq!(predictor.state().position, Vec2::new(0.0, 2.0));
    }
}
