//! Mapping between Courier metadata and AMQP message properties.
//!
//! Messages are routed by destination address, so the event identifier
//! travels in the [`ROUTE_KEY_HEADER`] header and the retry count in
//! [`RETRY_COUNT_HEADER`]. Other application headers are carried as long
//! strings.

use std::collections::HashMap;

use courier_core::{DeliveryMetadata, Envelope, RETRY_COUNT_HEADER, ROUTE_KEY_HEADER};
use lapin::BasicProperties;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Builds the properties for publishing `envelope`.
pub fn properties_for(envelope: &Envelope) -> BasicProperties {
    let metadata = &envelope.metadata;

    let mut headers = FieldTable::default();
    for (key, value) in &metadata.headers {
        headers.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }
    headers.insert(
        ShortString::from(ROUTE_KEY_HEADER),
        AMQPValue::LongString(LongString::from(envelope.route_key.to_string())),
    );
    set_retry_count(&mut headers, metadata.retry_count);

    let mut properties = BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_headers(headers);
    if let Some(content_type) = &metadata.content_type {
        properties = properties.with_content_type(ShortString::from(content_type.clone()));
    }
    if let Some(message_id) = &metadata.message_id {
        properties = properties.with_message_id(ShortString::from(message_id.clone()));
    }
    if let Some(correlation_id) = &metadata.correlation_id {
        properties = properties.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(priority) = metadata.priority {
        properties = properties.with_priority(priority);
    }
    properties
}

/// Extracts delivery metadata from received properties.
pub fn metadata_from(properties: &BasicProperties, redelivered: bool) -> DeliveryMetadata {
    let headers: HashMap<String, String> = properties
        .headers()
        .as_ref()
        .map(|table| {
            table
                .inner()
                .iter()
                .filter(|(key, _)| key.as_str() != ROUTE_KEY_HEADER)
                .filter_map(|(key, value)| header_string(value).map(|v| (key.as_str().to_string(), v)))
                .collect()
        })
        .unwrap_or_default();

    let retry_count = headers
        .get(RETRY_COUNT_HEADER)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    DeliveryMetadata {
        message_id: properties.message_id().as_ref().map(|s| s.as_str().to_string()),
        correlation_id: properties
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        content_type: properties.content_type().as_ref().map(|s| s.as_str().to_string()),
        priority: *properties.priority(),
        redelivered,
        retry_count,
        headers,
    }
}

/// Returns the event identifier of a delivery, falling back to the AMQP
/// routing key when the header is absent.
pub fn route_key_from(properties: &BasicProperties, routing_key: &str) -> String {
    properties
        .headers()
        .as_ref()
        .and_then(|table| table.inner().get(&ShortString::from(ROUTE_KEY_HEADER)))
        .and_then(header_string)
        .unwrap_or_else(|| routing_key.to_string())
}

/// Returns a copy of `properties` with the retry count set to `count`.
pub fn with_retry_count(properties: &BasicProperties, count: u32) -> BasicProperties {
    let mut headers = properties.headers().clone().unwrap_or_default();
    set_retry_count(&mut headers, count);
    properties.clone().with_headers(headers)
}

fn set_retry_count(headers: &mut FieldTable, count: u32) {
    headers.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongLongInt(i64::from(count)),
    );
}

fn header_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        AMQPValue::Boolean(b) => Some(b.to_string()),
        AMQPValue::ShortShortInt(n) => Some(n.to_string()),
        AMQPValue::ShortShortUInt(n) => Some(n.to_string()),
        AMQPValue::ShortInt(n) => Some(n.to_string()),
        AMQPValue::ShortUInt(n) => Some(n.to_string()),
        AMQPValue::LongInt(n) => Some(n.to_string()),
        AMQPValue::LongUInt(n) => Some(n.to_string()),
        AMQPValue::LongLongInt(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use courier_core::{Address, EventId};

    fn envelope() -> Envelope {
        let mut headers = HashMap::new();
        headers.insert("tenant".to_string(), "eu-1".to_string());
        headers.insert(RETRY_COUNT_HEADER.to_string(), "0".to_string());
        Envelope {
            address: Address::new("billing"),
            route_key: EventId::new("orders.created"),
            payload: Bytes::from_static(b"{}"),
            metadata: DeliveryMetadata {
                message_id: Some("m-1".into()),
                correlation_id: Some("c-1".into()),
                content_type: Some("application/json".into()),
                priority: Some(5),
                redelivered: false,
                retry_count: 0,
                headers,
            },
        }
    }

    #[test]
    fn test_properties_carry_route_key_and_metadata() {
        let properties = properties_for(&envelope());
        assert_eq!(*properties.delivery_mode(), Some(PERSISTENT));
        assert_eq!(route_key_from(&properties, "billing"), "orders.created");

        let metadata = metadata_from(&properties, false);
        assert_eq!(metadata.message_id.as_deref(), Some("m-1"));
        assert_eq!(metadata.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(metadata.priority, Some(5));
        assert_eq!(metadata.retry_count, 0);
        assert_eq!(metadata.headers.get("tenant").map(String::as_str), Some("eu-1"));
        assert!(!metadata.headers.contains_key(ROUTE_KEY_HEADER));
    }

    #[test]
    fn test_route_key_falls_back_to_routing_key() {
        assert_eq!(
            route_key_from(&BasicProperties::default(), "orders.created"),
            "orders.created"
        );
    }

    #[test]
    fn test_retry_count_accepts_foreign_encodings() {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(RETRY_COUNT_HEADER),
            AMQPValue::LongString(LongString::from("2".to_string())),
        );
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(metadata_from(&properties, true).retry_count, 2);

        let bumped = with_retry_count(&properties, 3);
        let metadata = metadata_from(&bumped, false);
        assert_eq!(metadata.retry_count, 3);
        assert!(!metadata.redelivered);
    }
}
