//! Ticknet Core - Tick clock and deterministic task scheduling
//!
//! This crate provides the pieces every ticknet loop shares:
//! - Tick-based time (`Tick`, `Millis`, `TickClock`)
//! - A tick-indexed scheduler with priority bands and repeating tasks
//! - Identifier types for players, entities and tasks
//! - The `PredictionHistory` trait implemented by prediction vaults
//! - A deterministic RNG
//!
//! ## Ownership
//!
//! There is no global scheduler. Each game session constructs its own
//! [`Scheduler`] and [`TickClock`] and hands them to its collaborators:
//!
//! ```rust
//! use ticknet_core::{Priority, Scheduler, TickClock};
//!
//! let mut clock = TickClock::new(16).unwrap();
//! let mut scheduler = Scheduler::starting_at(clock.tick());
//!
//! scheduler
//!     .schedule_repeating(|tick| { let _ = tick; Ok(()) }, 10, 0, Priority::Normal)
//!     .unwrap();
//!
//! for now in (16..=160).step_by(16) {
//!     scheduler.process_tasks();
//!     clock.advance(now);
//! }
//! assert_eq!(scheduler.current_tick(), clock.tick());
//! ```

mod error;
pub mod history;
mod identity;
mod rng;
pub mod scheduler;
pub mod time;

pub use error::{Error, Result};
pub use history::{PredictionHistory, PredictionSnapshot};
pub use identity::{EntityId, PlayerId, TaskId};
pub use rng::GameRng;
pub use scheduler::{Priority, Scheduler, TaskError, TaskResult, TickReport};
pub use time::{ticks_between, Millis, Tick, TickClock};

pub use glam::Vec2;
