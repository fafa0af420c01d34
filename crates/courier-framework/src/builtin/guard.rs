use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Context, Inbound, ProcessingError, ProcessingResult};
use tracing::debug;

use crate::middleware::{Flow, Middleware};
use crate::outcome::Outcome;

type Predicate = Arc<dyn Fn(&Context, &Inbound) -> bool + Send + Sync>;

/// Lets a delivery through only if a predicate holds.
///
/// Rejected deliveries short-circuit with a permanent middleware failure, so
/// the dispatcher rejects them without requeue.
///
/// ```rust,ignore
/// let only_eu = Guard::new("only-eu", |_ctx, msg| {
///     msg.metadata.headers.get("region").is_some_and(|r| r == "eu")
/// });
/// ```
#[derive(Clone)]
pub struct Guard {
    name: String,
    predicate: Predicate,
}

impl Guard {
    /// Creates a guard.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Context, &Inbound) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Middleware for Guard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before(&self, ctx: &mut Context, msg: &Inbound) -> ProcessingResult<Flow> {
        if (self.predicate)(ctx, msg) {
            return Ok(Flow::Continue);
        }
        debug!(guard = %self.name, route_key = %msg.route_key, "Guard rejected delivery");
        Ok(Flow::ShortCircuit(Outcome::failed(ProcessingError::middleware(
            format!("rejected by guard '{}'", self.name),
        ))))
    }
}
