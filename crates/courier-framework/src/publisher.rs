//! Publish-side fan-out.
//!
//! [`Publisher::publish`] sends one payload to every destination bound to an
//! event identifier. Sends run concurrently and independently: one failing
//! destination never prevents the others from being attempted. The result is
//! a [`PublishReport`] with one entry per destination, in registration order.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::{
    Address, BoxedBroker, BoxedCodec, CodecError, ConfigError, ConfigResult, DeliveryMetadata,
    Envelope, EventId, RETRY_COUNT_HEADER,
};
use futures::future::join_all;
use serde::Serialize;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::error::PublishError;
use crate::route::RouteTable;

/// Highest accepted message priority.
pub const MAX_PRIORITY: u8 = 9;

/// Per-publish message options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    message_id: Option<String>,
    correlation_id: Option<String>,
    priority: Option<u8>,
    headers: HashMap<String, String>,
}

impl PublishOptions {
    /// Creates empty options; a message id is generated when none is set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit message id.
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the priority (0-9).
    pub fn priority(mut self, priority: u8) -> ConfigResult<Self> {
        if priority > MAX_PRIORITY {
            return Err(ConfigError::validation(format!(
                "priority must be between 0 and {MAX_PRIORITY}, got {priority}"
            )));
        }
        self.priority = Some(priority);
        Ok(self)
    }

    /// Adds an application header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// The result of sending to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    /// The destination.
    pub address: Address,
    /// `Ok` if the broker accepted the message.
    pub result: Result<(), PublishError>,
}

/// Per-destination results of one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// The published event.
    pub event_id: EventId,
    /// Message id shared by every copy.
    pub message_id: String,
    /// One entry per bound destination, in registration order.
    pub results: Vec<DeliveryResult>,
}

impl PublishReport {
    /// Number of destinations attempted.
    pub fn recipients(&self) -> usize {
        self.results.len()
    }

    /// Number of destinations that accepted the message.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.result.is_ok()).count()
    }

    /// Number of destinations that failed.
    pub fn failed(&self) -> usize {
        self.recipients() - self.succeeded()
    }

    /// Returns `true` if every destination accepted the message.
    ///
    /// An event with no bindings counts as a complete success.
    pub fn is_complete_success(&self) -> bool {
        self.failed() == 0
    }

    /// Iterates over the failed destinations and their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&Address, &PublishError)> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (&r.address, e)))
    }
}

/// Fans published events out to their bound destinations.
#[derive(Clone)]
pub struct Publisher {
    table: Arc<RouteTable>,
    broker: BoxedBroker,
    codec: BoxedCodec,
}

impl Publisher {
    /// Creates a publisher over a frozen table.
    pub fn new(table: Arc<RouteTable>, broker: BoxedBroker, codec: BoxedCodec) -> ConfigResult<Self> {
        if !table.is_ready() {
            return Err(ConfigError::NotReady);
        }
        Ok(Self {
            table,
            broker,
            codec,
        })
    }

    /// Publishes `payload` to every destination bound to `event_id`.
    pub async fn publish<T>(&self, event_id: impl Into<EventId>, payload: &T) -> PublishReport
    where
        T: Serialize + ?Sized,
    {
        self.publish_with(event_id, payload, PublishOptions::new())
            .await
    }

    /// Publishes with explicit message options.
    pub async fn publish_with<T>(
        &self,
        event_id: impl Into<EventId>,
        payload: &T,
        options: PublishOptions,
    ) -> PublishReport
    where
        T: Serialize + ?Sized,
    {
        let event_id = event_id.into();
        let message_id = options
            .message_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let bindings = self.table.resolve(event_id.as_str());

        let span = info_span!(
            "publish",
            event_id = %event_id,
            message_id = %message_id,
            recipients = bindings.len(),
        );

        let encoded = serde_json::to_value(payload)
            .map_err(|e| CodecError::Encode(e.to_string()))
            .and_then(|value| self.codec.encode(&value));

        let metadata = self.metadata(&message_id, options);

        let sends = bindings.iter().map(|binding| {
            let address = binding.address.clone();
            let envelope = encoded.clone().map(|payload| Envelope {
                address: address.clone(),
                route_key: event_id.clone(),
                payload,
                metadata: metadata.clone(),
            });
            async move {
                let result = match envelope {
                    Ok(envelope) => self.broker.send(envelope).await.map_err(PublishError::from),
                    Err(e) => Err(PublishError::from(e)),
                };
                if let Err(error) = &result {
                    warn!(%address, %error, "Send failed");
                }
                DeliveryResult { address, result }
            }
        });
        let sends: Vec<_> = sends.collect();

        let results = join_all(sends).instrument(span.clone()).await;
        let report = PublishReport {
            event_id,
            message_id,
            results,
        };
        span.in_scope(|| {
            debug!(
                succeeded = report.succeeded(),
                failed = report.failed(),
                "Published"
            )
        });
        report
    }

    fn metadata(&self, message_id: &str, options: PublishOptions) -> DeliveryMetadata {
        let mut headers = options.headers;
        headers.insert(RETRY_COUNT_HEADER.to_string(), "0".to_string());

        DeliveryMetadata {
            message_id: Some(message_id.to_string()),
            correlation_id: options.correlation_id,
            content_type: Some(self.codec.content_type().to_string()),
            priority: options.priority,
            redelivered: false,
            retry_count: 0,
            headers,
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("table", &self.table)
            .field("content_type", &self.codec.content_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_is_bounded() {
        assert!(PublishOptions::new().priority(9).is_ok());
        assert!(matches!(
            PublishOptions::new().priority(10),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_report_is_complete_success() {
        let report = PublishReport {
            event_id: EventId::new("nobody.listens"),
            message_id: "m".into(),
            results: Vec::new(),
        };
        assert_eq!(report.recipients(), 0);
        assert!(report.is_complete_success());
    }
}
