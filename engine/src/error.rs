//! Engine error taxonomy

use thiserror::Error;

use crate::broker::BrokerError;

/// Errors surfaced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(BrokerError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Topology error: {0}")]
    Topology(BrokerError),

    #[error("Publish error: {0}")]
    Publish(BrokerError),

    #[error("Subscribe error: {0}")]
    Subscribe(BrokerError),

    /// Only ever logged, never returned to a caller
    #[error("Cleanup error: {0}")]
    Cleanup(BrokerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Underlying human-readable message, without the category prefix
    pub fn message(&self) -> String {
        match self {
            EngineError::Connection(e)
            | EngineError::Topology(e)
            | EngineError::Publish(e)
            | EngineError::Subscribe(e)
            | EngineError::Cleanup(e) => e.message.clone(),
            EngineError::InvalidArgument(msg) | EngineError::Config(msg) => msg.clone(),
            EngineError::Io(e) => e.to_string(),
        }
    }

    /// Broker reply code if the failure carried one, else 0
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Connection(e)
            | EngineError::Topology(e)
            | EngineError::Publish(e)
            | EngineError::Subscribe(e)
            | EngineError::Cleanup(e) => e.code.unwrap_or(0),
            _ => 0,
        }
    }
}
