use async_trait::async_trait;
use courier_core::{Context, Inbound, ProcessingError, ProcessingResult};
use tracing::{debug, info, warn};

use crate::middleware::{Flow, Middleware, Recovery};
use crate::outcome::Outcome;

/// Logs every delivery that passes through it.
///
/// Payloads are logged at `DEBUG`, or at `INFO` once [`with_payloads`] is set.
///
/// [`with_payloads`]: LoggingMiddleware::with_payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware {
    payloads: bool,
}

impl LoggingMiddleware {
    /// Creates a logging middleware.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs payloads at `INFO` as well.
    pub fn with_payloads(mut self) -> Self {
        self.payloads = true;
        self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before(&self, _ctx: &mut Context, msg: &Inbound) -> ProcessingResult<Flow> {
        info!(
            route_key = %msg.route_key,
            message_id = msg.metadata.message_id_or_dash(),
            retry_count = msg.metadata.retry_count,
            "Received"
        );
        if self.payloads {
            info!(route_key = %msg.route_key, payload = %msg.payload, "Payload");
        } else {
            debug!(route_key = %msg.route_key, payload = %msg.payload, "Payload");
        }
        Ok(Flow::Continue)
    }

    async fn after(&self, ctx: &mut Context, msg: &Inbound, outcome: &Outcome) -> ProcessingResult<()> {
        let elapsed_ms = ctx.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Outcome::Success => info!(
                route_key = %msg.route_key,
                message_id = msg.metadata.message_id_or_dash(),
                elapsed_ms,
                "Processed"
            ),
            Outcome::Failure(failure) => debug!(
                route_key = %msg.route_key,
                message_id = msg.metadata.message_id_or_dash(),
                elapsed_ms,
                error = %failure.error,
                "Short-circuited with failure"
            ),
        }
        Ok(())
    }

    async fn on_failure(&self, ctx: &mut Context, msg: &Inbound, error: ProcessingError) -> Recovery {
        warn!(
            route_key = %msg.route_key,
            message_id = msg.metadata.message_id_or_dash(),
            elapsed_ms = ctx.elapsed().as_secs_f64() * 1000.0,
            retryable = error.is_retryable(),
            %error,
            "Processing failed"
        );
        Recovery::Propagate(error)
    }
}
