//! Error types for ticknet-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Repeat interval must be at least one tick")]
    InvalidInterval,

    #[error("Tick interval must be greater than zero milliseconds")]
    InvalidTickInterval,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
