//! The middleware contract.
//!
//! A [`Middleware`] wraps a terminal handler with three optional phases:
//!
//! - `before` runs on the way in and may stop the chain with
//!   [`Flow::ShortCircuit`].
//! - `after` runs on the way out and observes the [`Outcome`].
//! - `on_failure` runs instead of `after` when a failure unwinds past the
//!   middleware, and may transform or suppress it.
//!
//! Each phase defaults to a no-op, so implementations override only what they
//! need.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_framework::{Flow, Middleware};
//!
//! struct Tenant;
//!
//! #[async_trait::async_trait]
//! impl Middleware for Tenant {
//!     async fn before(&self, ctx: &mut Context, msg: &Inbound) -> ProcessingResult<Flow> {
//!         let tenant = msg.metadata.headers.get("x-tenant").cloned().unwrap_or_default();
//!         ctx.insert(TenantId(tenant));
//!         Ok(Flow::Continue)
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Context, Inbound, ProcessingError, ProcessingResult};

use crate::outcome::Outcome;

/// What `before` decided.
#[derive(Debug)]
pub enum Flow {
    /// Proceed to the next middleware or the handler.
    Continue,
    /// Stop here: skip inner middlewares and the handler, then unwind with
    /// this outcome.
    ShortCircuit(Outcome),
}

/// What `on_failure` decided.
#[derive(Debug)]
pub enum Recovery {
    /// Keep unwinding with this (possibly transformed) error.
    Propagate(ProcessingError),
    /// Swallow the failure; outer middlewares see a success.
    Suppress,
}

/// A middleware wrapping a terminal handler.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Runs before inner middlewares and the handler.
    async fn before(&self, _ctx: &mut Context, _msg: &Inbound) -> ProcessingResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Runs after inner middlewares and the handler finished without an
    /// unwinding failure.
    async fn after(
        &self,
        _ctx: &mut Context,
        _msg: &Inbound,
        _outcome: &Outcome,
    ) -> ProcessingResult<()> {
        Ok(())
    }

    /// Runs when a failure unwinds past this middleware.
    async fn on_failure(
        &self,
        _ctx: &mut Context,
        _msg: &Inbound,
        error: ProcessingError,
    ) -> Recovery {
        Recovery::Propagate(error)
    }
}

/// A shared, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;
