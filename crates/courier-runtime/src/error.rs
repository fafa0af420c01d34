//! Runtime error types.

use thiserror::Error;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Route table or component wiring is invalid.
    #[error("Invalid setup: {0}")]
    Setup(#[from] courier_core::ConfigError),

    /// The broker failed.
    #[error("Broker error: {0}")]
    Broker(#[from] courier_core::BrokerError),

    /// A required builder part is missing.
    #[error("Runtime builder is missing {0}")]
    Missing(&'static str),

    /// A consumer task failed to join.
    #[error("Consumer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
