//! In-process broker client.
//!
//! [`MemoryBroker`] keeps one FIFO queue per address and records every
//! acknowledgment it receives. It backs tests and demos and behaves like a
//! work queue: each address has at most one consumer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace};

use crate::foundation::delivery::{AckAction, Acknowledger, RawDelivery};
use crate::foundation::error::{BrokerError, BrokerResult};
use crate::foundation::ident::{Address, EventId};
use crate::integration::broker::{BrokerClient, DeliveryStream, Envelope};

/// One acknowledgment observed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    /// Address the delivery was consumed from.
    pub address: Address,
    /// Route key of the delivery.
    pub route_key: EventId,
    /// Message id of the delivery.
    pub message_id: Option<String>,
    /// Retry count the delivery carried when it was settled.
    pub retry_count: u32,
    /// Broker-local delivery tag.
    pub delivery_tag: u64,
    /// Action taken.
    pub action: AckAction,
}

struct Queue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Option<mpsc::UnboundedReceiver<Envelope>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<Address, Queue>>,
    sent: Mutex<Vec<Envelope>>,
    acks: Mutex<Vec<AckRecord>>,
    dead_letters: Mutex<Vec<Envelope>>,
    failing: Mutex<HashSet<Address>>,
    next_tag: AtomicU64,
    settled: Notify,
}

impl Inner {
    fn enqueue(&self, envelope: Envelope) -> BrokerResult<()> {
        let mut queues = self.queues.lock();
        let queue = queues
            .entry(envelope.address.clone())
            .or_insert_with(Queue::new);
        let address = envelope.address.clone();
        queue
            .tx
            .send(envelope)
            .map_err(|_| BrokerError::send(address.as_str(), "queue closed"))
    }

    fn record(&self, envelope: &Envelope, tag: u64, action: AckAction) {
        self.acks.lock().push(AckRecord {
            address: envelope.address.clone(),
            route_key: envelope.route_key.clone(),
            message_id: envelope.metadata.message_id.clone(),
            retry_count: envelope.metadata.retry_count,
            delivery_tag: tag,
            action,
        });
        self.settled.notify_waiters();
    }
}

/// An in-process [`BrokerClient`].
///
/// Cloning is cheap; clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future send to `address` fail.
    pub fn fail_sends_to(&self, address: impl Into<Address>) {
        self.inner.failing.lock().insert(address.into());
    }

    /// Lets sends to `address` succeed again.
    pub fn restore_sends_to(&self, address: &Address) {
        self.inner.failing.lock().remove(address);
    }

    /// Returns every envelope accepted by [`send`](BrokerClient::send).
    pub fn sent(&self) -> Vec<Envelope> {
        self.inner.sent.lock().clone()
    }

    /// Returns every acknowledgment in the order it happened.
    pub fn acknowledgments(&self) -> Vec<AckRecord> {
        self.inner.acks.lock().clone()
    }

    /// Returns the envelopes rejected without requeue.
    pub fn dead_letters(&self) -> Vec<Envelope> {
        self.inner.dead_letters.lock().clone()
    }

    /// Waits until at least `count` acknowledgments were recorded.
    pub async fn wait_for_acknowledgments(&self, count: usize) {
        loop {
            let notified = self.inner.settled.notified();
            if self.inner.acks.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Places a raw envelope directly on its address, bypassing send failure
    /// injection. Useful for simulating foreign publishers.
    pub fn inject(&self, envelope: Envelope) -> BrokerResult<()> {
        self.inner.enqueue(envelope)
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("queues", &self.inner.queues.lock().len())
            .field("acks", &self.inner.acks.lock().len())
            .finish()
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn send(&self, envelope: Envelope) -> BrokerResult<()> {
        if self.inner.failing.lock().contains(&envelope.address) {
            return Err(BrokerError::send(
                envelope.address.as_str(),
                "injected send failure",
            ));
        }
        trace!(address = %envelope.address, route_key = %envelope.route_key, "Enqueue envelope");
        self.inner.sent.lock().push(envelope.clone());
        self.inner.enqueue(envelope)
    }

    async fn subscribe(&self, address: &Address) -> BrokerResult<DeliveryStream> {
        let rx = {
            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(address.clone()).or_insert_with(Queue::new);
            queue
                .rx
                .take()
                .ok_or_else(|| BrokerError::subscribe(address.as_str(), "already consumed"))?
        };

        debug!(address = %address, "Memory consumer attached");

        let inner = Arc::clone(&self.inner);
        let deliveries = stream::unfold((rx, inner), |(mut rx, inner)| async move {
            let envelope = rx.recv().await?;
            let tag = inner.next_tag.fetch_add(1, Ordering::Relaxed);
            let delivery = RawDelivery::new(
                envelope.route_key.as_str().to_owned(),
                envelope.payload.clone(),
                envelope.metadata.clone(),
                MemoryAcker {
                    inner: Arc::clone(&inner),
                    envelope,
                    tag,
                },
            );
            Some((Ok(delivery), (rx, inner)))
        });

        Ok(Box::pin(deliveries))
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    envelope: Envelope,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> BrokerResult<()> {
        self.inner.record(&self.envelope, self.tag, AckAction::Ack);
        Ok(())
    }

    async fn requeue(self: Box<Self>) -> BrokerResult<()> {
        self.inner.record(&self.envelope, self.tag, AckAction::Requeue);
        let mut envelope = self.envelope;
        envelope.metadata.retry_count += 1;
        envelope.metadata.redelivered = true;
        self.inner
            .enqueue(envelope)
            .map_err(|e| BrokerError::AckFailed(e.to_string()))
    }

    async fn reject(self: Box<Self>) -> BrokerResult<()> {
        self.inner.record(&self.envelope, self.tag, AckAction::Reject);
        self.inner.dead_letters.lock().push(self.envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::delivery::DeliveryMetadata;
    use bytes::Bytes;
    use futures::StreamExt;

    fn envelope(address: &str, key: &str) -> Envelope {
        Envelope {
            address: Address::new(address),
            route_key: EventId::new(key),
            payload: Bytes::from_static(b"{}"),
            metadata: DeliveryMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_send_then_consume_in_order() {
        let broker = MemoryBroker::new();
        broker.send(envelope("q", "a")).await.unwrap();
        broker.send(envelope("q", "b")).await.unwrap();

        let mut stream = broker.subscribe(&Address::new("q")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.route_key, "a");
        assert_eq!(second.route_key, "b");
    }

    #[tokio::test]
    async fn test_requeue_increments_retry_count() {
        let broker = MemoryBroker::new();
        broker.send(envelope("q", "a")).await.unwrap();
        let mut stream = broker.subscribe(&Address::new("q")).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        first.settle(AckAction::Requeue).await.unwrap();

        let again = stream.next().await.unwrap().unwrap();
        assert_eq!(again.metadata.retry_count, 1);
        assert!(again.metadata.redelivered);
        again.settle(AckAction::Reject).await.unwrap();

        let actions: Vec<_> = broker.acknowledgments().iter().map(|a| a.action).collect();
        assert_eq!(actions, [AckAction::Requeue, AckAction::Reject]);
        assert_eq!(broker.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let broker = MemoryBroker::new();
        broker.fail_sends_to("down");
        let err = broker.send(envelope("down", "a")).await.unwrap_err();
        assert!(matches!(err, BrokerError::SendFailed { .. }));
        assert!(broker.sent().is_empty());
    }

    #[tokio::test]
    async fn test_second_subscriber_is_refused() {
        let broker = MemoryBroker::new();
        let _first = broker.subscribe(&Address::new("q")).await.unwrap();
        assert!(broker.subscribe(&Address::new("q")).await.is_err());
    }
}
