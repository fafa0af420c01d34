use std::sync::Arc;

use courier_core::{Address, BrokerError, JsonCodec, MemoryBroker, RETRY_COUNT_HEADER};
use courier_framework::{Destination, PublishError, PublishOptions, Publisher, RouteTable};
use serde_json::json;

fn fanout_table() -> Arc<RouteTable> {
    let mut table = RouteTable::new();
    for address in ["billing", "shipping", "analytics"] {
        table
            .register("orders.created", Destination::new(address).handler(|| async {}))
            .unwrap();
    }
    table.freeze();
    Arc::new(table)
}

#[tokio::test]
async fn one_failing_destination_does_not_stop_the_others() {
    let broker = MemoryBroker::new();
    broker.fail_sends_to("shipping");
    let publisher = Publisher::new(fanout_table(), Arc::new(broker.clone()), JsonCodec::shared()).unwrap();

    let report = publisher.publish("orders.created", &json!({"id": 1})).await;

    assert_eq!(report.recipients(), 3);
    assert_eq!(report.succeeded(), 2);
    assert!(!report.is_complete_success());

    let addresses: Vec<_> = report.results.iter().map(|r| r.address.as_str()).collect();
    assert_eq!(addresses, ["billing", "shipping", "analytics"]);

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, &Address::new("shipping"));
    assert!(matches!(
        failures[0].1,
        PublishError::Broker(BrokerError::SendFailed { .. })
    ));

    let sent: Vec<_> = broker.sent().into_iter().map(|e| e.address).collect();
    assert_eq!(sent, [Address::new("billing"), Address::new("analytics")]);
}

#[tokio::test]
async fn unbound_event_reaches_nobody() {
    let broker = MemoryBroker::new();
    let publisher = Publisher::new(fanout_table(), Arc::new(broker.clone()), JsonCodec::shared()).unwrap();

    let report = publisher.publish("orders.deleted", &json!({})).await;

    assert_eq!(report.recipients(), 0);
    assert!(report.is_complete_success());
    assert!(broker.sent().is_empty());
}

#[tokio::test]
async fn every_copy_shares_message_metadata() {
    let broker = MemoryBroker::new();
    let publisher = Publisher::new(fanout_table(), Arc::new(broker.clone()), JsonCodec::shared()).unwrap();

    let options = PublishOptions::new()
        .message_id("order-1")
        .correlation_id("checkout-9")
        .priority(5)
        .unwrap()
        .header("tenant", "acme");
    let report = publisher
        .publish_with("orders.created", &json!({"id": 1}), options)
        .await;

    assert_eq!(report.message_id, "order-1");
    let sent = broker.sent();
    assert_eq!(sent.len(), 3);
    for envelope in sent {
        assert_eq!(envelope.route_key.as_str(), "orders.created");
        assert_eq!(envelope.metadata.message_id.as_deref(), Some("order-1"));
        assert_eq!(envelope.metadata.correlation_id.as_deref(), Some("checkout-9"));
        assert_eq!(envelope.metadata.priority, Some(5));
        assert_eq!(envelope.metadata.content_type.as_deref(), Some("application/json"));
        assert_eq!(envelope.metadata.headers.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(envelope.metadata.headers.get(RETRY_COUNT_HEADER).map(String::as_str), Some("0"));
        assert_eq!(&envelope.payload[..], br#"{"id":1}"#);
    }
}

#[tokio::test]
async fn publisher_requires_frozen_table() {
    let table = Arc::new(RouteTable::new());
    let result = Publisher::new(table, Arc::new(MemoryBroker::new()), JsonCodec::shared());
    assert!(result.is_err());
}
