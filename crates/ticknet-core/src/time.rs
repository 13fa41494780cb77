//! Time system for tick-based simulation
//!
//! Provides discrete time management shared by client and server loops:
//! - `Tick` - Logical time unit
//! - `Millis` - Millisecond timestamp used for prediction correlation
//! - `TickClock` - Current tick plus the timestamp at which it started
//!
//! Everything time-sensitive is keyed by tick (and, for prediction, by the
//! timestamp recorded at that tick). Wall-clock jitter only changes when a
//! tick starts, never which tick a piece of logic belongs to.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A discrete tick identifier (logical time unit)
pub type Tick = u64;

/// Milliseconds on the loop's monotonic time source
pub type Millis = u64;

/// Simulation clock state
///
/// Advanced exactly once per simulation step by the owning loop. On the
/// server this is ground truth; clients run their own instance locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickClock {
    /// Current tick number
    tick: Tick,
    /// Timestamp at which the current tick started
    tick_start_ms: Millis,
    /// Nominal duration of one tick
    tick_interval_ms: Millis,
    /// Whether the owning loop is paused
    paused: bool,
}

impl TickClock {
    /// Create a clock at tick 0 with the given tick interval
    pub fn new(tick_interval_ms: Millis) -> Result<Self> {
        Self::starting_at(0, 0, tick_interval_ms)
    }

    /// Create a clock positioned at an arbitrary tick
    pub fn starting_at(tick: Tick, now_ms: Millis, tick_interval_ms: Millis) -> Result<Self> {
        if tick_interval_ms == 0 {
            return Err(Error::InvalidTickInterval);
        }
        Ok(Self {
            tick,
            tick_start_ms: now_ms,
            tick_interval_ms,
            paused: false,
        })
    }

    /// Advance to the next tick, recording when it started
    pub fn advance(&mut self, now_ms: Millis) -> Tick {
        self.tick += 1;
        self.tick_start_ms = now_ms;
        self.tick
    }

    /// Current tick
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Timestamp at which the current tick started
    pub fn tick_start_ms(&self) -> Millis {
        self.tick_start_ms
    }

    /// Nominal tick duration
    pub fn tick_interval_ms(&self) -> Millis {
        self.tick_interval_ms
    }

    /// Ticks per second
    pub fn tick_rate_hz(&self) -> f64 {
        1000.0 / self.tick_interval_ms as f64
    }

    /// Number of whole ticks that should have started by `now_ms`
    ///
    /// A fixed-step loop calls `advance` this many times to catch up after a
    /// long frame.
    pub fn due_ticks(&self, now_ms: Millis) -> u64 {
        now_ms.saturating_sub(self.tick_start_ms) / self.tick_interval_ms
    }

    /// Convert a tick count into milliseconds
    pub fn ticks_to_ms(&self, ticks: u64) -> Millis {
        ticks * self.tick_interval_ms
    }

    /// Convert milliseconds into ticks, rounding up
    pub fn ms_to_ticks(&self, ms: Millis) -> u64 {
        ms.div_ceil(self.tick_interval_ms)
    }

    /// Smallest history length that still covers a round trip of `rtt_ms`
    ///
    /// Prediction vaults sized below this value lose the snapshot a late
    /// authoritative update refers to.
    pub fn recommended_vault_capacity(&self, rtt_ms: Millis) -> usize {
        self.ms_to_ticks(rtt_ms).max(1) as usize
    }

    /// Check if the owning loop is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause or resume the owning loop
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Toggle pause, returning the new paused state
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }
}

/// Number of ticks elapsed from `from` to `to`, zero if `to` is earlier
pub fn ticks_between(from: Tick, to: Tick) -> u64 {
    to.saturating_sub(from)
}
