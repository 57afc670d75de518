//! Engine error types.

use conveyor_transport::{TransportError, ValidationError};
use thiserror::Error;

/// Errors surfaced by the engine's public operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport operation failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid engine configuration: {0}")]
    Configuration(#[from] ValidationError),
}

impl EngineError {
    /// Check if the underlying failure is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Serialization(_) => false,
            Self::Transport(error) => error.is_transient(),
            Self::Configuration(_) => false,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
