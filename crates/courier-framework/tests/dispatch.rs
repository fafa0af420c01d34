mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{Trace, recorders};
use courier_core::{
    AckAction, Acknowledger, Address, BrokerClient, BrokerResult, DeliveryMetadata, Envelope,
    EventId, JsonCodec, MemoryBroker, ProcessingError, RawDelivery,
};
use courier_framework::{
    DispatchEvent, DispatchObserver, Destination, Dispatcher, DispositionReason, Guard, Json,
    LoggingMiddleware, Publisher, RetryPolicy, RouteTable,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct Order {
    id: u64,
}

async fn accept(Json(order): Json<Order>) -> Result<(), ProcessingError> {
    if order.id == 0 {
        return Err(ProcessingError::permanent("order id must be positive"));
    }
    Ok(())
}

async fn flaky() -> Result<(), ProcessingError> {
    Err(ProcessingError::retryable("inventory unavailable"))
}

async fn explode() {
    if true {
        panic!("handler blew up");
    }
}

async fn slow() {
    tokio::time::sleep(Duration::from_secs(60)).await;
}

struct Harness {
    broker: MemoryBroker,
    publisher: Publisher,
    table: Arc<RouteTable>,
}

impl Harness {
    fn new(table: RouteTable) -> Self {
        let mut table = table;
        table.freeze();
        let table = Arc::new(table);
        let broker = MemoryBroker::new();
        let publisher = Publisher::new(
            Arc::clone(&table),
            Arc::new(broker.clone()),
            JsonCodec::shared(),
        )
        .unwrap();
        Self {
            broker,
            publisher,
            table,
        }
    }

    fn dispatcher(&self, address: &str) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.table), address).unwrap()
    }

    async fn next(&self, stream: &mut courier_core::DeliveryStream) -> RawDelivery {
        stream.next().await.unwrap().unwrap()
    }
}

fn raw_envelope(address: &str, route_key: &str, payload: &'static [u8]) -> Envelope {
    Envelope {
        address: Address::new(address),
        route_key: EventId::new(route_key),
        payload: Bytes::from_static(payload),
        metadata: DeliveryMetadata::default(),
    }
}

#[tokio::test]
async fn success_is_acked_once() {
    let mut table = RouteTable::new();
    table
        .register(
            "orders.created",
            Destination::new("billing")
                .middleware(LoggingMiddleware::new())
                .handler(accept),
        )
        .unwrap();
    let h = Harness::new(table);
    let mut stream = h.broker.subscribe(&Address::new("billing")).await.unwrap();

    h.publisher.publish("orders.created", &json!({"id": 7})).await;
    let disposition = h.dispatcher("billing").on_delivery(h.next(&mut stream).await).await;

    assert_eq!(disposition.action, AckAction::Ack);
    assert_eq!(disposition.reason, DispositionReason::Success);
    let acks = h.broker.acknowledgments();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].action, AckAction::Ack);
}

#[tokio::test]
async fn permanent_failure_is_rejected_after_full_unwind() {
    let trace = Trace::default();
    let mut table = RouteTable::new();
    let mut dest = Destination::new("billing");
    for m in recorders(&trace, &["M1", "M2", "M3"]) {
        dest = dest.middleware_arc(m);
    }
    table.register("orders.created", dest.handler(accept)).unwrap();
    let h = Harness::new(table);
    let mut stream = h.broker.subscribe(&Address::new("billing")).await.unwrap();

    h.publisher.publish("orders.created", &json!({"id": 0})).await;
    let disposition = h.dispatcher("billing").on_delivery(h.next(&mut stream).await).await;

    assert_eq!(disposition.action, AckAction::Reject);
    assert_eq!(disposition.reason, DispositionReason::PermanentFailure);
    assert_eq!(
        trace.entries(),
        [
            "M1.before",
            "M2.before",
            "M3.before",
            "M3.failure",
            "M2.failure",
            "M1.failure"
        ]
    );
    assert_eq!(h.broker.dead_letters().len(), 1);
    assert_eq!(h.broker.acknowledgments().len(), 1);
}

#[tokio::test]
async fn retryable_failure_requeues_until_bound() {
    let mut table = RouteTable::new();
    table
        .register("stock.reserve", Destination::new("inventory").handler(flaky))
        .unwrap();
    let h = Harness::new(table);
    let dispatcher = h
        .dispatcher("inventory")
        .with_retry_policy(RetryPolicy::new(3));
    let mut stream = h.broker.subscribe(&Address::new("inventory")).await.unwrap();

    h.publisher.publish("stock.reserve", &json!({})).await;

    let mut reasons = Vec::new();
    for _ in 0..4 {
        let delivery = h.next(&mut stream).await;
        reasons.push(dispatcher.on_delivery(delivery).await.reason);
    }

    assert_eq!(
        reasons,
        [
            DispositionReason::RetryScheduled,
            DispositionReason::RetryScheduled,
            DispositionReason::RetryScheduled,
            DispositionReason::RetriesExhausted
        ]
    );
    let acks = h.broker.acknowledgments();
    let retry_counts: Vec<_> = acks.iter().map(|a| a.retry_count).collect();
    assert_eq!(retry_counts, [0, 1, 2, 3]);
    assert_eq!(acks.last().map(|a| a.action), Some(AckAction::Reject));
    assert_eq!(h.broker.dead_letters().len(), 1);
}

#[tokio::test]
async fn unroutable_and_undecodable_deliveries_are_rejected() {
    let mut table = RouteTable::new();
    table
        .register("orders.created", Destination::new("billing").handler(accept))
        .unwrap();
    let h = Harness::new(table);
    let mut stream = h.broker.subscribe(&Address::new("billing")).await.unwrap();
    let dispatcher = h.dispatcher("billing");

    h.broker
        .inject(raw_envelope("billing", "orders.deleted", b"{}"))
        .unwrap();
    h.broker
        .inject(raw_envelope("billing", "orders.created", b"{oops"))
        .unwrap();

    let unroutable = dispatcher.on_delivery(h.next(&mut stream).await).await;
    let undecodable = dispatcher.on_delivery(h.next(&mut stream).await).await;

    assert_eq!(unroutable.reason, DispositionReason::NoBinding);
    assert_eq!(undecodable.reason, DispositionReason::DecodeFailed);
    let actions: Vec<_> = h.broker.acknowledgments().iter().map(|a| a.action).collect();
    assert_eq!(actions, [AckAction::Reject, AckAction::Reject]);
}

#[tokio::test]
async fn panicking_handler_is_rejected() {
    let mut table = RouteTable::new();
    table
        .register("orders.created", Destination::new("billing").handler(explode))
        .unwrap();
    let h = Harness::new(table);
    let mut stream = h.broker.subscribe(&Address::new("billing")).await.unwrap();

    h.publisher.publish("orders.created", &json!({})).await;
    let disposition = h.dispatcher("billing").on_delivery(h.next(&mut stream).await).await;

    assert_eq!(disposition.action, AckAction::Reject);
    assert_eq!(h.broker.acknowledgments().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_retryable() {
    let mut table = RouteTable::new();
    table
        .register("orders.created", Destination::new("billing").handler(slow))
        .unwrap();
    let h = Harness::new(table);
    let mut stream = h.broker.subscribe(&Address::new("billing")).await.unwrap();

    h.publisher.publish("orders.created", &json!({})).await;
    let disposition = h
        .dispatcher("billing")
        .with_timeout(Duration::from_millis(50))
        .on_delivery(h.next(&mut stream).await)
        .await;

    assert_eq!(disposition.action, AckAction::Requeue);
    assert_eq!(h.broker.acknowledgments().len(), 1);
}

#[tokio::test]
async fn cancelled_delivery_is_rejected_once() {
    let mut table = RouteTable::new();
    table
        .register("orders.created", Destination::new("billing").handler(slow))
        .unwrap();
    let h = Harness::new(table);
    let mut stream = h.broker.subscribe(&Address::new("billing")).await.unwrap();

    h.publisher.publish("orders.created", &json!({})).await;
    let token = CancellationToken::new();
    token.cancel();
    let disposition = h
        .dispatcher("billing")
        .on_delivery_cancellable(h.next(&mut stream).await, &token)
        .await;

    assert_eq!(disposition.action, AckAction::Reject);
    assert_eq!(h.broker.acknowledgments().len(), 1);
}

#[tokio::test]
async fn guard_short_circuit_rejects_without_calling_handler() {
    let mut table = RouteTable::new();
    table
        .register_middleware(
            "vip-only",
            Guard::new("vip-only", |_ctx, msg| msg.payload["vip"] == json!(true)),
        )
        .unwrap();
    table
        .register(
            "orders.created",
            Destination::new("billing").named("vip-only").handler(accept),
        )
        .unwrap();
    let h = Harness::new(table);
    let mut stream = h.broker.subscribe(&Address::new("billing")).await.unwrap();
    let dispatcher = h.dispatcher("billing");

    h.publisher
        .publish("orders.created", &json!({"id": 1, "vip": true}))
        .await;
    h.publisher
        .publish("orders.created", &json!({"id": 2}))
        .await;

    let vip = dispatcher.on_delivery(h.next(&mut stream).await).await;
    let regular = dispatcher.on_delivery(h.next(&mut stream).await).await;

    assert_eq!(vip.action, AckAction::Ack);
    assert_eq!(regular.action, AckAction::Reject);
    assert_eq!(regular.reason, DispositionReason::PermanentFailure);
}

struct PanickingAcker;

#[async_trait::async_trait]
impl Acknowledger for PanickingAcker {
    async fn ack(self: Box<Self>) -> BrokerResult<()> {
        panic!("channel gone");
    }

    async fn requeue(self: Box<Self>) -> BrokerResult<()> {
        panic!("channel gone");
    }

    async fn reject(self: Box<Self>) -> BrokerResult<()> {
        panic!("channel gone");
    }
}

#[derive(Default)]
struct AckFailures(parking_lot::Mutex<Vec<String>>);

impl DispatchObserver for AckFailures {
    fn on_event(&self, _address: &Address, event: &DispatchEvent<'_>) {
        if let DispatchEvent::AckFailed { error, .. } = event {
            self.0.lock().push(error.to_string());
        }
    }
}

#[tokio::test]
async fn panicking_acknowledger_is_reported_not_propagated() {
    let mut table = RouteTable::new();
    table
        .register("orders.created", Destination::new("billing").handler(accept))
        .unwrap();
    let h = Harness::new(table);
    let failures = Arc::new(AckFailures::default());
    let dispatcher = h
        .dispatcher("billing")
        .with_observer(Arc::clone(&failures) as Arc<dyn DispatchObserver>);

    let delivery = RawDelivery::new(
        "orders.created",
        Bytes::from_static(br#"{"id": 3}"#),
        DeliveryMetadata::default(),
        PanickingAcker,
    );
    let disposition = dispatcher.on_delivery(delivery).await;

    assert_eq!(disposition.action, AckAction::Ack);
    let failures = failures.0.lock();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("channel gone"));
}
