//! Unified error types for the Courier core.
//!
//! This module provides the error taxonomy shared by every layer:
//! registration ([`ConfigError`]), consume-side routing ([`RoutingError`]),
//! payload encoding ([`CodecError`]), the broker collaborator
//! ([`BrokerError`]) and chain execution ([`ProcessingError`]).

use std::fmt;

use thiserror::Error;

/// A boxed, thread-safe error used as the source of a [`ProcessingError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors raised while building or freezing a route table.
///
/// These surface synchronously to the registering caller and are meant to halt
/// startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The event identifier was empty.
    #[error("event identifier must not be empty")]
    EmptyEventId,

    /// The destination address was empty.
    #[error("destination address for '{event_id}' must not be empty")]
    EmptyAddress {
        /// Event the destination was registered for.
        event_id: String,
    },

    /// A destination referenced a middleware name that was never registered.
    #[error("unknown middleware '{name}' referenced by '{event_id}'")]
    UnknownMiddleware {
        /// The unresolved middleware name.
        name: String,
        /// Event the destination was registered for.
        event_id: String,
    },

    /// A named middleware was registered twice.
    #[error("middleware '{0}' is already registered")]
    DuplicateMiddleware(String),

    /// The same event was bound to the same address twice.
    #[error("'{event_id}' is already bound to '{address}'")]
    DuplicateBinding {
        /// Event identifier.
        event_id: String,
        /// Destination address.
        address: String,
    },

    /// A destination was registered without a terminal handler.
    #[error("destination '{address}' for '{event_id}' has no handler")]
    MissingHandler {
        /// Event identifier.
        event_id: String,
        /// Destination address.
        address: String,
    },

    /// The event identifier does not belong to the table's service scope.
    #[error("'{event_id}' does not include the service routing key '{scope}'")]
    OutOfScope {
        /// Event identifier.
        event_id: String,
        /// Required routing key segment.
        scope: String,
    },

    /// The route table was already frozen.
    #[error("route table is frozen; registration is closed")]
    Frozen,

    /// The route table was used before being frozen.
    #[error("route table is not ready; call freeze() before dispatching")]
    NotReady,

    /// Any other invalid registration value.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Creates a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

// =============================================================================
// Routing Errors
// =============================================================================

/// Raised when an inbound delivery matches no binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No binding for the route key on the consumer's address.
    #[error("no binding for route key '{route_key}' on '{address}'")]
    NoBinding {
        /// The consumer's bound address.
        address: String,
        /// The delivery's route key.
        route_key: String,
    },
}

// =============================================================================
// Codec Errors
// =============================================================================

/// Errors raised by a [`Codec`](crate::Codec).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The value could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// The bytes could not be decoded.
    #[error("failed to decode payload: {0}")]
    Decode(String),
}

// =============================================================================
// Broker Errors
// =============================================================================

/// Errors reported by the broker-client collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Connecting to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A send to a destination failed.
    #[error("send to '{address}' failed: {reason}")]
    SendFailed {
        /// Destination address.
        address: String,
        /// Reason for failure.
        reason: String,
    },

    /// Subscribing to an address failed.
    #[error("subscribe to '{address}' failed: {reason}")]
    SubscribeFailed {
        /// Address being subscribed.
        address: String,
        /// Reason for failure.
        reason: String,
    },

    /// An acknowledgment action failed.
    #[error("acknowledgment failed: {0}")]
    AckFailed(String),

    /// The broker connection or subscription is closed.
    #[error("broker closed: {0}")]
    Closed(String),
}

impl BrokerError {
    /// Creates a send error.
    pub fn send(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a subscribe error.
    pub fn subscribe(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Processing Errors
// =============================================================================

/// Where a [`ProcessingError`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The terminal handler raised.
    Handler,
    /// A middleware phase raised.
    Middleware,
    /// A handler parameter could not be extracted.
    Extract,
    /// The chain did not finish within the configured timeout.
    Timeout,
    /// The chain was cancelled from outside.
    Cancelled,
    /// The chain panicked.
    Panic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Handler => "handler",
            Self::Middleware => "middleware",
            Self::Extract => "extract",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Panic => "panic",
        };
        f.write_str(s)
    }
}

/// A classified failure raised by a handler or middleware.
///
/// Every failure is either *retryable* or *permanent*. Errors are permanent
/// unless the raising code opts in with [`ProcessingError::retryable`] or
/// [`ProcessingError::retry`], so a forgotten classification never causes an
/// unbounded redelivery loop.
#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct ProcessingError {
    kind: ErrorKind,
    retryable: bool,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ProcessingError {
    /// Creates a permanent error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: false,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a permanent handler error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message)
    }

    /// Creates a retryable handler error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message).retry()
    }

    /// Creates a permanent handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message)
    }

    /// Creates a permanent middleware error.
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Middleware, message)
    }

    /// Creates a permanent extraction error.
    pub fn extract(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Extract, message)
    }

    /// Wraps an arbitrary error as a permanent error of the given kind.
    pub fn from_error<E>(kind: ErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            retryable: false,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Marks this error as retryable.
    pub fn retry(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Marks this error as permanent.
    pub fn permanent_now(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Re-tags the kind of this error.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns `true` if redelivery may succeed.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<CodecError> for ProcessingError {
    fn from(err: CodecError) -> Self {
        Self::from_error(ErrorKind::Handler, err)
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(ErrorKind::Handler, err)
    }
}

impl From<String> for ProcessingError {
    fn from(message: String) -> Self {
        Self::handler(message)
    }
}

impl From<&str> for ProcessingError {
    fn from(message: &str) -> Self {
        Self::handler(message)
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for registration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Result type for handler and middleware phases.
pub type ProcessingResult<T> = Result<T, ProcessingError>;
