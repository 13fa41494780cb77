//! Server state reconciliation
//!
//! Compares authoritative movement updates against the client's recorded
//! predictions and decides whether the local state needs correcting.

use crate::prediction::LocalState;
use crate::protocol::MovementUpdate;
use glam::Vec2;
use ticknet_core::{Millis, PredictionHistory, PredictionSnapshot};
use tracing::{debug, trace};

/// Outcome of comparing one prediction with authoritative state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationDecision {
    /// Prediction close enough; local state is left alone
    Accept,
    /// Prediction too far off; local state snaps to the server's
    Correct,
}

/// Decide how to treat a prediction given the authoritative position
///
/// Divergence at or above `threshold` requires a correction.
pub fn decide(
    authoritative: Vec2,
    snapshot: &PredictionSnapshot,
    threshold: f32,
) -> ReconciliationDecision {
    if authoritative.distance(snapshot.position) >= threshold {
        ReconciliationDecision::Correct
    } else {
        ReconciliationDecision::Accept
    }
}

/// Why an update was not reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing recorded yet
    NoSnapshot,
    /// The update refers to a time older than every retained snapshot
    Stale,
    /// The update is for an entity this client does not predict
    OtherEntity,
}

/// What reconciling one update did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    Accepted { divergence: f32 },
    Corrected { divergence: f32 },
    Skipped(SkipReason),
}

impl ReconcileOutcome {
    /// Check if local state was overwritten
    pub fn is_correction(&self) -> bool {
        matches!(self, ReconcileOutcome::Corrected { .. })
    }

    /// Divergence measured, if a snapshot was matched
    pub fn divergence(&self) -> Option<f32> {
        match self {
            ReconcileOutcome::Accepted { divergence } | ReconcileOutcome::Corrected { divergence } => {
                Some(*divergence)
            }
            ReconcileOutcome::Skipped(_) => None,
        }
    }
}

/// Running counters of reconciliation results
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PredictionMetrics {
    pub accepted: u64,
    pub corrected: u64,
    pub skipped: u64,
    pub max_divergence: f32,
    pub last_divergence: f32,
    total_divergence: f64,
}

impl PredictionMetrics {
    /// Fold one outcome into the counters
    pub fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Accepted { .. } => self.accepted += 1,
            ReconcileOutcome::Corrected { .. } => self.corrected += 1,
            ReconcileOutcome::Skipped(_) => self.skipped += 1,
        }
        if let Some(divergence) = outcome.divergence() {
            self.max_divergence = self.max_divergence.max(divergence);
            self.last_divergence = divergence;
            self.total_divergence += f64::from(divergence);
        }
    }

    /// Updates that were matched against a snapshot
    pub fn matched(&self) -> u64 {
        self.accepted + self.corrected
    }

    /// Mean divergence over matched updates
    pub fn mean_divergence(&self) -> f32 {
        match self.matched() {
            0 => 0.0,
            n => (self.total_divergence / n as f64) as f32,
        }
    }

    /// Fraction of matched updates that needed a correction
    pub fn correction_rate(&self) -> f32 {
        match self.matched() {
            0 => 0.0,
            n => self.corrected as f32 / n as f32,
        }
    }
}

/// Applies authoritative updates to a locally predicted entity
#[derive(Debug, Clone)]
pub struct Reconciler {
    threshold: f32,
    tolerance_ms: Millis,
    metrics: PredictionMetrics,
}

impl Reconciler {
    /// Create a reconciler
    ///
    /// `tolerance_ms` is how far before the oldest snapshot an update may
    /// point and still be matched; one tick interval absorbs clock rounding.
    pub fn new(threshold: f32, tolerance_ms: Millis) -> Self {
        Self {
            threshold,
            tolerance_ms,
            metrics: PredictionMetrics::default(),
        }
    }

    /// Reconcile one authoritative update against the history
    ///
    /// On accept, snapshots older than the update's prediction timestamp
    /// are purged since the server will not reference them again. On
    /// correct, position, velocity, and rotation are hard-set and every
    /// snapshot at or before the prediction timestamp is purged.
    pub fn reconcile<H: PredictionHistory>(
        &mut self,
        history: &mut H,
        state: &mut LocalState,
        update: &MovementUpdate,
    ) -> ReconcileOutcome {
        let outcome = self.evaluate(history, state, update);
        self.metrics.record(&outcome);
        outcome
    }

    fn evaluate<H: PredictionHistory>(
        &self,
        history: &mut H,
        state: &mut LocalState,
        update: &MovementUpdate,
    ) -> ReconcileOutcome {
        let Some((oldest, _)) = history.timestamp_range() else {
            trace!(entity = %update.entity, "no snapshots, skipping reconciliation");
            return ReconcileOutcome::Skipped(SkipReason::NoSnapshot);
        };
        if update.prediction_timestamp.saturating_add(self.tolerance_ms) < oldest {
            debug!(
                entity = %update.entity,
                prediction_timestamp = update.prediction_timestamp,
                oldest,
                "update predates retained history, skipping reconciliation"
            );
            return ReconcileOutcome::Skipped(SkipReason::Stale);
        }
        let Some(snapshot) = history.get(update.prediction_timestamp).copied() else {
            return ReconcileOutcome::Skipped(SkipReason::NoSnapshot);
        };

        let divergence = update.position.distance(snapshot.position);
        match decide(update.position, &snapshot, self.threshold) {
            ReconciliationDecision::Accept => {
                history.remove_older_than(update.prediction_timestamp);
                ReconcileOutcome::Accepted { divergence }
            }
            ReconciliationDecision::Correct => {
                debug!(
                    entity = %update.entity,
                    divergence,
                    predicted_tick = snapshot.tick,
                    server_tick = update.game_tick,
                    "correcting local prediction"
                );
                state.position = update.position;
                state.velocity = update.velocity;
                state.rotation = update.rotation;
                history.remove_up_to(update.prediction_timestamp);
                ReconcileOutcome::Corrected { divergence }
            }
        }
    }

    /// Counters accumulated so far
    pub fn metrics(&self) -> &PredictionMetrics {
        &self.metrics
    }

    /// Get the correction threshold
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Change the correction threshold
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticknet_core::{EntityId, Tick};
    use ticknet_vault::PredictionVault;

    const INTERVAL: Millis = 16;

    fn vault_with(positions: &[(Tick, Vec2)]) -> PredictionVault {
        let mut vault = PredictionVault::new(120);
        for &(tick, position) in positions {
            vault.add(PredictionSnapshot::new(tick * INTERVAL, tick, position));
        }
        vault
    }

    fn update_for(tick: Tick, position: Vec2) -> MovementUpdate {
        MovementUpdate {
            entity: EntityId::new(1),
            position,
            rotation: 0.5,
            velocity: Vec2::new(3.0, 0.0),
            timestamp: 9_999,
            game_tick: tick + 4,
            prediction_timestamp: tick * INTERVAL,
            prediction_tick: tick,
        }
    }

    fn state_at(position: Vec2) -> LocalState {
        LocalState {
            position,
            velocity: Vec2::ZERO,
            rotation: 0.0,
        }
    }

    #[test]
    fn test_decide_threshold_boundary() {
        let snapshot = PredictionSnapshot::new(0, 0, Vec2::ZERO);
        assert_eq!(
            decide(Vec2::new(29.9, 0.0), &snapshot, 30.0),
            ReconciliationDecision::Accept
        );
        assert_eq!(
            decide(Vec2::new(30.0, 0.0), &snapshot, 30.0),
            ReconciliationDecision::Correct
        );
    }

    #[test]
    fn test_small_divergence_accepted() {
        let predicted = Vec2::new(100.0, 100.0);
        let mut vault = vault_with(&[(49, Vec2::new(98.0, 100.0)), (50, predicted), (51, Vec2::new(102.0, 100.0))]);
        let mut state = state_at(Vec2::new(102.0, 100.0));
        let mut reconciler = Reconciler::new(30.0, INTERVAL);

        let outcome = reconciler.reconcile(&mut vault, &mut state, &update_for(50, Vec2::new(101.0, 100.0)));

        assert_eq!(outcome, ReconcileOutcome::Accepted { divergence: 1.0 });
        assert_eq!(state, state_at(Vec2::new(102.0, 100.0)));
        // Older entries go, the matched one stays
        assert_eq!(vault.oldest().map(|s| s.tick), Some(50));
    }

    #[test]
    fn test_large_divergence_corrected() {
        let mut vault = vault_with(&[(49, Vec2::new(98.0, 100.0)), (50, Vec2::new(100.0, 100.0)), (51, Vec2::new(102.0, 100.0))]);
        let mut state = state_at(Vec2::new(102.0, 100.0));
        let mut reconciler = Reconciler::new(30.0, INTERVAL);

        let update = update_for(50, Vec2::new(250.0, 100.0));
        let outcome = reconciler.reconcile(&mut vault, &mut state, &update);

        assert_eq!(outcome, ReconcileOutcome::Corrected { divergence: 150.0 });
        assert_eq!(state.position, Vec2::new(250.0, 100.0));
        assert_eq!(state.velocity, update.velocity);
        assert_eq!(state.rotation, update.rotation);
        assert_eq!(vault.len(), 1);
        assert_eq!(vault.oldest().map(|s| s.tick), Some(51));
    }

    #[test]
    fn test_empty_history_skipped() {
        let mut vault = PredictionVault::new(8);
        let mut state = state_at(Vec2::ZERO);
        let mut reconciler = Reconciler::new(30.0, INTERVAL);

        let outcome = reconciler.reconcile(&mut vault, &mut state, &update_for(3, Vec2::new(500.0, 0.0)));

        assert_eq!(outcome, ReconcileOutcome::Skipped(SkipReason::NoSnapshot));
        assert_eq!(state.position, Vec2::ZERO);
    }

    #[test]
    fn test_update_older_than_history_skipped() {
        let mut vault = vault_with(&[(100, Vec2::ZERO), (101, Vec2::ZERO)]);
        let mut state = state_at(Vec2::ZERO);
        let mut reconciler = Reconciler::new(30.0, INTERVAL);

        let outcome = reconciler.reconcile(&mut vault, &mut state, &update_for(90, Vec2::new(500.0, 0.0)));
        assert_eq!(outcome, ReconcileOutcome::Skipped(SkipReason::Stale));
        assert_eq!(state.position, Vec2::ZERO);
        assert_eq!(vault.len(), 2);

        // One tick early is within tolerance
        let outcome = reconciler.reconcile(&mut vault, &mut state, &update_for(99, Vec2::new(1.0, 0.0)));
        assert_eq!(outcome, ReconcileOutcome::Accepted { divergence: 1.0 });
    }

    #[test]
    fn test_extreme_prediction_timestamp_does_not_overflow() {
        let mut vault = vault_with(&[(100, Vec2::ZERO)]);
        let mut state = state_at(Vec2::ZERO);
        let mut reconciler = Reconciler::new(30.0, INTERVAL);

        let update = MovementUpdate {
            prediction_timestamp: u64::MAX,
            ..update_for(100, Vec2::ZERO)
        };
        let outcome = reconciler.reconcile(&mut vault, &mut state, &update);
        assert_eq!(outcome, ReconcileOutcome::Accepted { divergence: 0.0 });
    }

    #[test]
    fn test_metrics_accumulate() {
        let mut vault = vault_with(&[(1, Vec2::ZERO), (2, Vec2::ZERO), (3, Vec2::ZERO)]);
        let mut state = state_at(Vec2::ZERO);
        let mut reconciler = Reconciler::new(10.0, INTERVAL);

        reconciler.reconcile(&mut vault, &mut state, &update_for(1, Vec2::new(2.0, 0.0)));
        reconciler.reconcile(&mut vault, &mut state, &update_for(2, Vec2::new(40.0, 0.0)));
        reconciler.reconcile(&mut PredictionVault::new(4), &mut state, &update_for(3, Vec2::ZERO));

        let metrics = reconciler.metrics();
        assert_eq!(metrics.accepted, 1);
        assert_eq!(metrics.corrected, 1);
        assert_eq!(metrics.skipped, 1);
        assert_eq!(metrics.max_divergence, 40.0);
        assert_eq!(metrics.mean_divergence(), 21.0);
        assert_eq!(metrics.correction_rate(), 0.5);
    }
}
