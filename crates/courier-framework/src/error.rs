//! Error types for the Courier framework.

use courier_core::{BrokerError, CodecError, ErrorKind, ProcessingError};
use thiserror::Error;

/// Errors that can occur while extracting handler parameters.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The payload does not match the shape the handler expects.
    #[error("payload does not match '{expected}': {reason}")]
    PayloadMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Deserializer message.
        reason: String,
    },

    /// No value of the requested type was stored in the context.
    #[error("no state of type '{0}' in context")]
    MissingState(&'static str),

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

impl From<ExtractError> for ProcessingError {
    fn from(err: ExtractError) -> Self {
        ProcessingError::from_error(ErrorKind::Extract, err)
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Why sending to one destination failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The payload could not be encoded.
    #[error(transparent)]
    Encode(#[from] CodecError),

    /// The broker refused the message.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
