//! Onion-style middleware chain around a terminal handler.
//!
//! # Execution order
//!
//! ```text
//! M1.before ─▶ M2.before ─▶ M3.before ─▶ handler
//!                                           │
//! M1.after  ◀─ M2.after  ◀─ M3.after  ◀─────┘
//! ```
//!
//! A middleware is *open* once its `before` has returned and until it exits.
//! Every open middleware exits exactly once: through `after` while the chain
//! is unwinding with an outcome, or through `on_failure` while it is
//! unwinding with a raised failure. A middleware whose own phase raised has
//! already exited and does not see that failure.
//!
//! # Tower Service Integration
//!
//! `MiddlewareChain` implements `tower::Service<Inbound>`, running each call
//! against a fresh [`Context`]:
//!
//! ```rust,ignore
//! use tower::ServiceExt;
//!
//! let outcome = chain.oneshot(Inbound::new("orders.created", payload)).await?;
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::task::Poll;

use courier_core::{BoxFuture, Context, ErrorKind, Inbound, ProcessingError};
use tower::Service;
use tracing::trace;

use crate::handler::{BoxedHandler, ErasedHandler, into_handler};
use crate::middleware::{BoxedMiddleware, Flow, Middleware, Recovery};
use crate::outcome::{Failure, Origin, Outcome};

/// State carried while unwinding.
enum Unwind {
    /// Unwinding with a result; open middlewares run `after`.
    Value(Outcome),
    /// Unwinding with a raised failure; open middlewares run `on_failure`.
    Raised(Failure),
}

/// An ordered list of middlewares around a terminal handler.
///
/// Chains are immutable after construction and cheap to clone. One chain may
/// run concurrently against independent contexts.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<[BoxedMiddleware]>,
    handler: BoxedHandler,
}

impl MiddlewareChain {
    /// Creates a chain from resolved middlewares and a boxed handler.
    pub fn new(middlewares: Vec<BoxedMiddleware>, handler: BoxedHandler) -> Self {
        Self {
            middlewares: middlewares.into(),
            handler,
        }
    }

    /// Creates a chain around a handler function.
    pub fn with_handler<F, T>(middlewares: Vec<BoxedMiddleware>, handler: F) -> Self
    where
        F: crate::handler::Handler<T>,
        T: 'static,
    {
        Self::new(middlewares, into_handler(handler))
    }

    /// Returns the middlewares in registration order.
    pub fn middlewares(&self) -> &[BoxedMiddleware] {
        &self.middlewares
    }

    /// Runs the chain for one delivery.
    pub async fn execute(&self, ctx: &mut Context, msg: &Inbound) -> Outcome {
        let mut open = 0;
        let mut unwind = None;

        for (i, middleware) in self.middlewares.iter().enumerate() {
            trace!(middleware = middleware.name(), position = i, "before");
            match middleware.before(ctx, msg).await {
                Ok(Flow::Continue) => open = i + 1,
                Ok(Flow::ShortCircuit(outcome)) => {
                    open = i + 1;
                    let outcome = match outcome {
                        Outcome::Failure(failure) => {
                            Outcome::Failure(raised_by_middleware(failure.error, Origin::Before(i)))
                        }
                        success => success,
                    };
                    unwind = Some(Unwind::Value(outcome));
                    break;
                }
                Err(error) => {
                    unwind = Some(Unwind::Raised(raised_by_middleware(error, Origin::Before(i))));
                    break;
                }
            }
        }

        let mut unwind = match unwind {
            Some(unwind) => unwind,
            None => match ErasedHandler::call(&*self.handler, ctx, msg).await {
                Ok(()) => Unwind::Value(Outcome::Success),
                Err(error) => Unwind::Raised(Failure {
                    error,
                    origin: Origin::Handler,
                    last_touched: None,
                }),
            },
        };

        for i in (0..open).rev() {
            let middleware = &self.middlewares[i];
            unwind = match unwind {
                Unwind::Value(outcome) => {
                    trace!(middleware = middleware.name(), position = i, "after");
                    match middleware.after(ctx, msg, &outcome).await {
                        Ok(()) => Unwind::Value(outcome),
                        Err(error) => Unwind::Raised(raised_by_middleware(error, Origin::After(i))),
                    }
                }
                Unwind::Raised(failure) => {
                    trace!(middleware = middleware.name(), position = i, "on_failure");
                    match middleware.on_failure(ctx, msg, failure.error).await {
                        Recovery::Propagate(error) => Unwind::Raised(Failure {
                            error,
                            origin: failure.origin,
                            last_touched: Some(i),
                        }),
                        Recovery::Suppress => Unwind::Value(Outcome::Success),
                    }
                }
            };
        }

        match unwind {
            Unwind::Value(outcome) => outcome,
            Unwind::Raised(failure) => Outcome::Failure(failure),
        }
    }
}

/// Attributes a failure to a middleware phase. Errors built with the handler
/// constructors (`permanent`, `retryable`) take the middleware kind.
fn raised_by_middleware(error: ProcessingError, origin: Origin) -> Failure {
    let error = match error.kind() {
        ErrorKind::Handler => error.with_kind(ErrorKind::Middleware),
        _ => error,
    };
    Failure {
        error,
        origin,
        last_touched: None,
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("MiddlewareChain")
            .field("middlewares", &names)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tower Service Implementation for MiddlewareChain
// ============================================================================

impl Service<Inbound> for MiddlewareChain {
    type Response = Outcome;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Outcome, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, msg: Inbound) -> Self::Future {
        let chain = self.clone();

        Box::pin(async move {
            let mut ctx = Context::new();
            Ok(chain.execute(&mut ctx, &msg).await)
        })
    }
}
