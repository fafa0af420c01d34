//! Consume-side dispatcher.
//!
//! A [`Dispatcher`] serves one consumer address. For each delivery it:
//!
//! 1. Resolves the binding for `(address, route_key)`; a miss is rejected.
//! 2. Decodes the payload with the codec; a decode error is rejected.
//! 3. Runs the binding's chain against a fresh [`Context`], guarded by panic
//!    capture, an optional timeout and an optional cancellation token.
//! 4. Maps the outcome to exactly one acknowledgment:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | success | ack |
//! | retryable failure, `retry_count < max_retries` | requeue |
//! | retryable failure, retries exhausted | reject |
//! | permanent failure | reject |
//!
//! Errors never propagate to the caller; they are reported to the
//! [`DispatchObserver`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_core::{
    AckAction, Address, BoxedCodec, BrokerError, ConfigError, ConfigResult, Context, ErrorKind, Inbound,
    JsonCodec, ProcessingError, RawDelivery, RoutingError,
};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info_span};

use crate::chain::MiddlewareChain;
use crate::observer::{BoxedObserver, DispatchEvent, TracingObserver};
use crate::outcome::{Origin, Outcome};
use crate::route::RouteTable;

/// Bounds redelivery of retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries whose retry count has reached this value are rejected.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Default number of redeliveries.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Creates a policy allowing `max_retries` redeliveries.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Never redeliver.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    /// Decides the action for a retryable failure.
    pub fn decide(&self, retry_count: u32) -> AckAction {
        if retry_count < self.max_retries {
            AckAction::Requeue
        } else {
            AckAction::Reject
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

/// Why a delivery was settled the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionReason {
    /// The chain succeeded.
    Success,
    /// No binding matched the route key.
    NoBinding,
    /// The payload could not be decoded.
    DecodeFailed,
    /// A permanent failure escaped the chain.
    PermanentFailure,
    /// A retryable failure was requeued.
    RetryScheduled,
    /// A retryable failure exhausted its retries.
    RetriesExhausted,
}

/// The acknowledgment chosen for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    /// The action sent to the broker.
    pub action: AckAction,
    /// Why.
    pub reason: DispositionReason,
}

impl Disposition {
    fn new(action: AckAction, reason: DispositionReason) -> Self {
        Self { action, reason }
    }
}

/// Runs deliveries of one consumer address through their chains.
///
/// `Dispatcher` is cheap to clone and can be shared across tasks.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
    address: Address,
    codec: BoxedCodec,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    observer: BoxedObserver,
}

impl Dispatcher {
    /// Creates a dispatcher for `address` over a frozen table.
    pub fn new(table: Arc<RouteTable>, address: impl Into<Address>) -> ConfigResult<Self> {
        if !table.is_ready() {
            return Err(ConfigError::NotReady);
        }
        let address = address.into();
        if address.is_empty() {
            return Err(ConfigError::validation("consumer address must not be empty"));
        }

        Ok(Self {
            table,
            address,
            codec: JsonCodec::shared(),
            retry: RetryPolicy::default(),
            timeout: None,
            observer: Arc::new(TracingObserver),
        })
    }

    /// Sets the payload codec.
    pub fn with_codec(mut self, codec: BoxedCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bounds each chain execution; a timeout is a retryable failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the observer.
    pub fn with_observer(mut self, observer: BoxedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the consumer address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns the retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Processes and settles one delivery.
    pub async fn on_delivery(&self, delivery: RawDelivery) -> Disposition {
        self.process(delivery, None).await
    }

    /// Like [`on_delivery`](Self::on_delivery), but cancelling `token`
    /// abandons the chain and rejects the delivery.
    pub async fn on_delivery_cancellable(
        &self,
        delivery: RawDelivery,
        token: &CancellationToken,
    ) -> Disposition {
        self.process(delivery, Some(token)).await
    }

    async fn process(&self, delivery: RawDelivery, token: Option<&CancellationToken>) -> Disposition {
        let span = info_span!(
            "dispatch",
            address = %self.address,
            route_key = %delivery.route_key,
            message_id = delivery.metadata.message_id_or_dash(),
        );

        async move {
            let started = Instant::now();
            let disposition = self.evaluate(&delivery, token).await;
            self.settle(delivery, disposition, started).await
        }
        .instrument(span)
        .await
    }

    async fn evaluate(&self, delivery: &RawDelivery, token: Option<&CancellationToken>) -> Disposition {
        let Some(binding) = self
            .table
            .resolve_for_delivery(self.address.as_str(), &delivery.route_key)
        else {
            let error = RoutingError::NoBinding {
                address: self.address.to_string(),
                route_key: delivery.route_key.clone(),
            };
            self.notify(&DispatchEvent::NoBinding {
                error: &error,
                metadata: &delivery.metadata,
            });
            return Disposition::new(AckAction::Reject, DispositionReason::NoBinding);
        };

        let payload = match self.codec.decode(&delivery.payload) {
            Ok(payload) => payload,
            Err(error) => {
                self.notify(&DispatchEvent::DecodeFailed {
                    route_key: &delivery.route_key,
                    error: &error,
                    metadata: &delivery.metadata,
                });
                return Disposition::new(AckAction::Reject, DispositionReason::DecodeFailed);
            }
        };

        let inbound = Inbound {
            route_key: binding.event_id.clone(),
            payload,
            metadata: delivery.metadata.clone(),
        };

        match self.run_chain(&binding.chain, &inbound, token).await {
            Outcome::Success => Disposition::new(AckAction::Ack, DispositionReason::Success),
            Outcome::Failure(failure) => {
                self.notify(&DispatchEvent::ChainFailed {
                    route_key: &delivery.route_key,
                    failure: &failure,
                    metadata: &delivery.metadata,
                });
                if !failure.is_retryable() {
                    return Disposition::new(AckAction::Reject, DispositionReason::PermanentFailure);
                }
                match self.retry.decide(delivery.metadata.retry_count) {
                    AckAction::Requeue => {
                        Disposition::new(AckAction::Requeue, DispositionReason::RetryScheduled)
                    }
                    action => Disposition::new(action, DispositionReason::RetriesExhausted),
                }
            }
        }
    }

    async fn run_chain(
        &self,
        chain: &MiddlewareChain,
        msg: &Inbound,
        token: Option<&CancellationToken>,
    ) -> Outcome {
        let mut ctx = Context::new();

        let guarded = async {
            match AssertUnwindSafe(chain.execute(&mut ctx, msg))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => Outcome::failure_at(
                    ProcessingError::new(ErrorKind::Panic, panic_message(panic.as_ref())),
                    Origin::Handler,
                ),
            }
        };

        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(outcome) => outcome,
                    Err(_) => Outcome::failure_at(
                        ProcessingError::new(
                            ErrorKind::Timeout,
                            format!("chain did not finish within {limit:?}"),
                        )
                        .retry(),
                        Origin::Handler,
                    ),
                },
                None => guarded.await,
            }
        };

        match token {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Outcome::failure_at(
                    ProcessingError::new(ErrorKind::Cancelled, "delivery cancelled"),
                    Origin::Handler,
                ),
                outcome = bounded => outcome,
            },
            None => bounded.await,
        }
    }

    async fn settle(
        &self,
        delivery: RawDelivery,
        disposition: Disposition,
        started: Instant,
    ) -> Disposition {
        let route_key = delivery.route_key.clone();
        let settled = AssertUnwindSafe(delivery.settle(disposition.action))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(BrokerError::AckFailed(format!(
                    "acknowledger panicked: {}",
                    panic_payload(panic.as_ref())
                )))
            });
        if let Err(error) = settled {
            self.notify(&DispatchEvent::AckFailed {
                route_key: &route_key,
                action: disposition.action,
                error: &error,
            });
        }
        self.notify(&DispatchEvent::Settled {
            route_key: &route_key,
            disposition: &disposition,
            elapsed: started.elapsed(),
        });
        disposition
    }

    /// Reports `event`, containing a panicking observer so the delivery is
    /// still settled.
    fn notify(&self, event: &DispatchEvent<'_>) {
        let reported = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.observer.on_event(&self.address, event)
        }));
        if let Err(panic) = reported {
            error!(
                address = %self.address,
                panic = %panic_payload(panic.as_ref()),
                "Dispatch observer panicked"
            );
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("address", &self.address)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    format!("handler panicked: {}", panic_payload(panic))
}

fn panic_payload(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string payload>"
    }
}
