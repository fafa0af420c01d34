//! Broker-client collaborator interface.
//!
//! Courier does not talk to a broker directly. It relies on a
//! [`BrokerClient`] that can send encoded bytes to a destination address and
//! stream [`RawDelivery`] values for an address it subscribes to.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::foundation::delivery::{DeliveryMetadata, RawDelivery};
use crate::foundation::error::BrokerResult;
use crate::foundation::ident::{Address, EventId};

/// One outgoing message addressed to a single destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Destination address.
    pub address: Address,
    /// Event identifier, delivered to the consumer as the route key.
    pub route_key: EventId,
    /// Encoded payload.
    pub payload: Bytes,
    /// Message metadata (message id, content type, headers, ...).
    pub metadata: DeliveryMetadata,
}

/// The stream of deliveries for one subscribed address.
pub type DeliveryStream = BoxStream<'static, BrokerResult<RawDelivery>>;

/// The publish/consume primitives Courier needs from a broker client.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Sends one envelope to its destination.
    async fn send(&self, envelope: Envelope) -> BrokerResult<()>;

    /// Subscribes to an address and returns its delivery stream.
    async fn subscribe(&self, address: &Address) -> BrokerResult<DeliveryStream>;
}

/// A shared, type-erased broker client.
pub type BoxedBroker = Arc<dyn BrokerClient>;
