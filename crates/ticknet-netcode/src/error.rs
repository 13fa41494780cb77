//! Error types for ticknet-netcode

use crate::protocol::MessageKind;
use thiserror::Error;

/// Netcode error type
#[derive(Debug, Error)]
pub enum Error {
    /// Packet could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Inbound datagram did not decode into a known packet
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// A second handler was registered for the same message kind
    #[error("Handler already registered for {0:?}")]
    HandlerAlreadyRegistered(MessageKind),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] ticknet_core::Error),
}

/// Result type for netcode operations
pub type Result<T> = std::result::Result<T, Error>;
