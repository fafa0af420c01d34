//! Deliveries and their acknowledgment handles.
//!
//! A [`RawDelivery`] is the unit of work handed over by the broker
//! collaborator. It owns a boxed [`Acknowledger`] whose actions consume the
//! handle, so every delivery can be settled at most once; the dispatcher
//! guarantees it is settled at least once.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::foundation::error::BrokerResult;
use crate::foundation::ident::EventId;

/// Header carrying the number of times a delivery was requeued.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Header carrying the event identifier when the broker routes by address.
pub const ROUTE_KEY_HEADER: &str = "x-route-key";

/// Broker metadata attached to a delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryMetadata {
    /// Broker or publisher assigned message id.
    pub message_id: Option<String>,
    /// Correlation id for request/response style flows.
    pub correlation_id: Option<String>,
    /// MIME content type of the payload.
    pub content_type: Option<String>,
    /// Message priority (0-9).
    pub priority: Option<u8>,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
    /// How many times this message has been requeued after a retryable failure.
    pub retry_count: u32,
    /// Remaining application headers.
    pub headers: HashMap<String, String>,
}

impl DeliveryMetadata {
    /// Returns the message id or `"-"` for logging.
    pub fn message_id_or_dash(&self) -> &str {
        self.message_id.as_deref().unwrap_or("-")
    }
}

/// The terminal acknowledgment chosen for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckAction {
    /// Processing succeeded; remove the message.
    Ack,
    /// Negative acknowledgment with requeue.
    Requeue,
    /// Reject without requeue (dead-letter).
    Reject,
}

impl fmt::Display for AckAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ack => "ack",
            Self::Requeue => "requeue",
            Self::Reject => "reject",
        };
        f.write_str(s)
    }
}

/// The acknowledgment handle of one delivery.
///
/// Each action consumes the handle.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledges the delivery.
    async fn ack(self: Box<Self>) -> BrokerResult<()>;

    /// Negatively acknowledges the delivery and asks the broker to redeliver
    /// it with its retry count incremented.
    async fn requeue(self: Box<Self>) -> BrokerResult<()>;

    /// Rejects the delivery without requeue.
    async fn reject(self: Box<Self>) -> BrokerResult<()>;
}

/// A delivery as received from the broker collaborator.
pub struct RawDelivery {
    /// Key identifying the route (normally the event identifier).
    pub route_key: String,
    /// Encoded payload.
    pub payload: Bytes,
    /// Broker metadata.
    pub metadata: DeliveryMetadata,
    acker: Box<dyn Acknowledger>,
}

impl RawDelivery {
    /// Creates a delivery with its acknowledgment handle.
    pub fn new<A>(
        route_key: impl Into<String>,
        payload: impl Into<Bytes>,
        metadata: DeliveryMetadata,
        acker: A,
    ) -> Self
    where
        A: Acknowledger + 'static,
    {
        Self {
            route_key: route_key.into(),
            payload: payload.into(),
            metadata,
            acker: Box::new(acker),
        }
    }

    /// Settles the delivery with the given action, consuming it.
    pub async fn settle(self, action: AckAction) -> BrokerResult<()> {
        match action {
            AckAction::Ack => self.acker.ack().await,
            AckAction::Requeue => self.acker.requeue().await,
            AckAction::Reject => self.acker.reject().await,
        }
    }
}

impl fmt::Debug for RawDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDelivery")
            .field("route_key", &self.route_key)
            .field("payload_len", &self.payload.len())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A decoded delivery handed to a middleware chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Route key the delivery arrived with.
    pub route_key: EventId,
    /// Decoded payload.
    pub payload: Value,
    /// Broker metadata.
    pub metadata: DeliveryMetadata,
}

impl Inbound {
    /// Creates an inbound message with empty metadata.
    pub fn new(route_key: impl Into<EventId>, payload: Value) -> Self {
        Self {
            route_key: route_key.into(),
            payload,
            metadata: DeliveryMetadata::default(),
        }
    }

    /// Attaches broker metadata.
    pub fn with_metadata(mut self, metadata: DeliveryMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAcker(Arc<AtomicUsize>, AckAction);

    #[async_trait]
    impl Acknowledger for CountingAcker {
        async fn ack(self: Box<Self>) -> BrokerResult<()> {
            assert_eq!(self.1, AckAction::Ack);
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn requeue(self: Box<Self>) -> BrokerResult<()> {
            assert_eq!(self.1, AckAction::Requeue);
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn reject(self: Box<Self>) -> BrokerResult<()> {
            assert_eq!(self.1, AckAction::Reject);
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_settle_routes_to_matching_action() {
        for action in [AckAction::Ack, AckAction::Requeue, AckAction::Reject] {
            let count = Arc::new(AtomicUsize::new(0));
            let delivery = RawDelivery::new(
                "orders.created",
                Bytes::from_static(b"{}"),
                DeliveryMetadata::default(),
                CountingAcker(Arc::clone(&count), action),
            );
            delivery.settle(action).await.unwrap();
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }
}
