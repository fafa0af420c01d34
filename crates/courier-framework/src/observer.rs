//! Observability hook for the dispatcher.
//!
//! The dispatcher never propagates consume-side errors to its caller. Instead
//! it reports them, and every final disposition, to a [`DispatchObserver`].
//! The default [`TracingObserver`] logs through `tracing`.

use std::sync::Arc;
use std::time::Duration;

use courier_core::{AckAction, Address, BrokerError, CodecError, DeliveryMetadata, RoutingError};
use tracing::{debug, error, info, warn};

use crate::dispatcher::Disposition;
use crate::outcome::Failure;

/// Something worth reporting about one delivery.
#[derive(Debug)]
pub enum DispatchEvent<'a> {
    /// No binding matched the route key.
    NoBinding {
        /// The routing error.
        error: &'a RoutingError,
        /// Delivery metadata.
        metadata: &'a DeliveryMetadata,
    },
    /// The payload could not be decoded.
    DecodeFailed {
        /// Route key of the delivery.
        route_key: &'a str,
        /// The codec error.
        error: &'a CodecError,
        /// Delivery metadata.
        metadata: &'a DeliveryMetadata,
    },
    /// A failure escaped the chain.
    ChainFailed {
        /// Route key of the delivery.
        route_key: &'a str,
        /// The failure.
        failure: &'a Failure,
        /// Delivery metadata.
        metadata: &'a DeliveryMetadata,
    },
    /// The delivery was settled.
    Settled {
        /// Route key of the delivery.
        route_key: &'a str,
        /// Chosen disposition.
        disposition: &'a Disposition,
        /// Time spent in the dispatcher.
        elapsed: Duration,
    },
    /// The acknowledgment itself failed.
    AckFailed {
        /// Route key of the delivery.
        route_key: &'a str,
        /// The attempted action.
        action: AckAction,
        /// The broker error.
        error: &'a BrokerError,
    },
}

/// Receives dispatch events.
pub trait DispatchObserver: Send + Sync {
    /// Called once per event; `address` is the consumer's bound address.
    fn on_event(&self, address: &Address, event: &DispatchEvent<'_>);
}

/// A shared, type-erased observer.
pub type BoxedObserver = Arc<dyn DispatchObserver>;

/// Logs dispatch events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_event(&self, address: &Address, event: &DispatchEvent<'_>) {
        match event {
            DispatchEvent::NoBinding { error, metadata } => warn!(
                %address,
                message_id = metadata.message_id_or_dash(),
                %error,
                "Rejecting unroutable delivery"
            ),
            DispatchEvent::DecodeFailed {
                route_key,
                error,
                metadata,
            } => warn!(
                %address,
                route_key,
                message_id = metadata.message_id_or_dash(),
                %error,
                "Rejecting undecodable delivery"
            ),
            DispatchEvent::ChainFailed {
                route_key,
                failure,
                metadata,
            } => warn!(
                %address,
                route_key,
                message_id = metadata.message_id_or_dash(),
                retry_count = metadata.retry_count,
                origin = %failure.origin,
                retryable = failure.is_retryable(),
                error = %failure.error,
                "Delivery failed"
            ),
            DispatchEvent::Settled {
                route_key,
                disposition,
                elapsed,
            } => {
                if disposition.action == AckAction::Ack {
                    debug!(%address, route_key, elapsed_ms = elapsed.as_millis() as u64, "Delivery acknowledged");
                } else {
                    info!(
                        %address,
                        route_key,
                        action = %disposition.action,
                        reason = ?disposition.reason,
                        "Delivery settled"
                    );
                }
            }
            DispatchEvent::AckFailed {
                route_key,
                action,
                error,
            } => error!(%address, route_key, %action, %error, "Acknowledgment failed"),
        }
    }
}
