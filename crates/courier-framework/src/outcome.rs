//! The result of running one middleware chain.

use std::fmt;

use courier_core::ProcessingError;

/// Which phase raised a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The terminal handler.
    Handler,
    /// The `before` phase of the middleware at this position.
    Before(usize),
    /// The `after` phase of the middleware at this position.
    After(usize),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler => f.write_str("handler"),
            Self::Before(i) => write!(f, "middleware[{i}].before"),
            Self::After(i) => write!(f, "middleware[{i}].after"),
        }
    }
}

/// A failure that escaped the chain.
#[derive(Debug)]
pub struct Failure {
    /// The cause, possibly transformed by `on_failure` phases.
    pub error: ProcessingError,
    /// The phase that raised it.
    pub origin: Origin,
    /// Position of the last middleware whose `on_failure` saw it.
    pub last_touched: Option<usize>,
}

impl Failure {
    /// Returns `true` if redelivery may succeed.
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

/// How a chain execution ended.
#[derive(Debug)]
pub enum Outcome {
    /// The chain completed or a failure was suppressed.
    Success,
    /// A failure escaped the chain.
    Failure(Failure),
}

impl Outcome {
    /// Creates a failure outcome attributed to the handler.
    ///
    /// When returned from a short-circuiting `before`, the chain re-stamps the
    /// origin with the middleware's position.
    pub fn failed(error: ProcessingError) -> Self {
        Self::failure_at(error, Origin::Handler)
    }

    /// Creates a failure outcome with an explicit origin.
    pub fn failure_at(error: ProcessingError, origin: Origin) -> Self {
        Self::Failure(Failure {
            error,
            origin,
            last_touched: None,
        })
    }

    /// Returns `true` for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the failure, if any.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success => None,
            Self::Failure(f) => Some(f),
        }
    }
}
