//! The lapin-backed broker client.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::{
    Acknowledger, Address, BrokerClient, BrokerError, BrokerResult, DeliveryStream, Envelope,
    RawDelivery,
};
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::AmqpConfig;
use crate::headers;

/// A [`BrokerClient`] over one AMQP connection.
///
/// Every message is published to a durable topic exchange with the
/// destination address as routing key. Each queue is bound with its own name
/// as binding key, so one publish reaches exactly one queue. Queues are
/// declared by the first send or subscribe that names them.
///
/// Publishes are mandatory and confirmed: a message the broker returns as
/// unroutable or nacks fails the send.
#[derive(Clone)]
pub struct AmqpBroker {
    connection: Arc<Connection>,
    channel: Channel,
    config: Arc<AmqpConfig>,
    declared: Arc<Mutex<HashSet<String>>>,
}

impl AmqpBroker {
    /// Connects, enables publisher confirms and declares the exchange.
    pub async fn connect(config: AmqpConfig) -> BrokerResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        let channel = connection.create_channel().await.map_err(|e| {
            BrokerError::ConnectionFailed(format!("Failed to create channel: {e}"))
        })?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to enable confirms: {e}"))
            })?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to declare exchange: {e}"))
            })?;

        info!(exchange = %config.exchange, "Connected to AMQP broker");

        Ok(Self {
            connection: Arc::new(connection),
            channel,
            config: Arc::new(config),
            declared: Arc::default(),
        })
    }

    /// Returns the adapter configuration.
    pub fn config(&self) -> &AmqpConfig {
        &self.config
    }

    async fn consumer_channel(&self, queue: &str) -> BrokerResult<Channel> {
        let subscribe_failed = |reason: String| BrokerError::SubscribeFailed {
            address: queue.to_string(),
            reason,
        };

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| subscribe_failed(format!("Failed to create channel: {e}")))?;
        // Retries are republished on this channel.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| subscribe_failed(format!("Failed to enable confirms: {e}")))?;

        declare_queue(&channel, &self.config.exchange, queue)
            .await
            .map_err(subscribe_failed)?;
        self.declared.lock().insert(queue.to_string());

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| subscribe_failed(format!("Failed to set prefetch: {e}")))?;

        Ok(channel)
    }
}

#[async_trait]
impl BrokerClient for AmqpBroker {
    async fn send(&self, envelope: Envelope) -> BrokerResult<()> {
        let address = envelope.address.to_string();
        let send_failed = |reason: String| BrokerError::SendFailed {
            address: address.clone(),
            reason,
        };

        let known = self.declared.lock().contains(&address);
        if !known {
            declare_queue(&self.channel, &self.config.exchange, &address)
                .await
                .map_err(send_failed)?;
            self.declared.lock().insert(address.clone());
        }

        let properties = headers::properties_for(&envelope);
        let confirm = self
            .channel
            .basic_publish(
                &self.config.exchange,
                &address,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &envelope.payload,
                properties,
            )
            .await
            .map_err(|e| send_failed(format!("Failed to publish: {e}")))?;
        let confirmation = confirm
            .await
            .map_err(|e| send_failed(format!("Publish confirmation failed: {e}")))?;
        check_confirmation(confirmation).map_err(send_failed)?;

        debug!(
            exchange = %self.config.exchange,
            %address,
            route_key = %envelope.route_key,
            "Published message"
        );
        Ok(())
    }

    async fn subscribe(&self, address: &Address) -> BrokerResult<DeliveryStream> {
        let queue = address.to_string();
        let channel = self.consumer_channel(&queue).await?;

        let consumer = channel
            .basic_consume(
                &queue,
                &self.config.consumer_tag_for(&queue),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::SubscribeFailed {
                address: queue.clone(),
                reason: format!("Failed to start consumer: {e}"),
            })?;

        info!(%queue, prefetch = self.config.prefetch, "Consumer subscribed");

        let exchange = self.config.exchange.clone();
        let stream = consumer.map(move |delivery| {
            delivery
                .map(|delivery| into_raw(delivery, channel.clone(), exchange.clone()))
                .map_err(|e| BrokerError::Closed(format!("Consumer failed: {e}")))
        });
        Ok(stream.boxed())
    }
}

impl std::fmt::Debug for AmqpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpBroker")
            .field("exchange", &self.config.exchange)
            .field("prefetch", &self.config.prefetch)
            .finish_non_exhaustive()
    }
}

/// Declares the durable `queue` and binds it to `exchange` under its own name.
async fn declare_queue(channel: &Channel, exchange: &str, queue: &str) -> Result<(), String> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| format!("Failed to declare queue: {e}"))?;

    channel
        .queue_bind(
            queue,
            exchange,
            queue,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| format!("Failed to bind queue: {e}"))
}

/// Maps a publisher confirm to success or the reason the message was lost.
fn check_confirmation(confirmation: Confirmation) -> Result<(), String> {
    match confirmation {
        Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
        Confirmation::Ack(Some(returned)) => Err(format!(
            "Returned as unroutable: {}",
            returned.reply_text.as_str()
        )),
        Confirmation::Nack(_) => Err("Broker nacked the message".to_string()),
    }
}

fn into_raw(delivery: Delivery, channel: Channel, exchange: String) -> RawDelivery {
    let Delivery {
        routing_key,
        redelivered,
        properties,
        data,
        acker,
        ..
    } = delivery;

    let routing_key = routing_key.as_str().to_string();
    let route_key = headers::route_key_from(&properties, &routing_key);
    let metadata = headers::metadata_from(&properties, redelivered);
    let payload = Bytes::from(data);

    let acker = AmqpAcker {
        acker,
        channel,
        exchange,
        routing_key,
        payload: payload.clone(),
        properties,
        retry_count: metadata.retry_count,
    };
    RawDelivery::new(route_key, payload, metadata, acker)
}

/// Settles one AMQP delivery.
///
/// Requeue republishes a copy with the retry count incremented and then
/// acknowledges the original, so the count survives redelivery.
struct AmqpAcker {
    acker: Acker,
    channel: Channel,
    exchange: String,
    routing_key: String,
    payload: Bytes,
    properties: BasicProperties,
    retry_count: u32,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(self: Box<Self>) -> BrokerResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::AckFailed(format!("basic.ack failed: {e}")))
    }

    async fn requeue(self: Box<Self>) -> BrokerResult<()> {
        let retry_count = self.retry_count + 1;
        let properties = headers::with_retry_count(&self.properties, retry_count);

        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &self.payload,
                properties,
            )
            .await
            .map_err(|e| BrokerError::AckFailed(format!("Failed to republish: {e}")))?;
        let confirmed = confirm
            .await
            .map_err(|e| format!("Republish confirmation failed: {e}"))
            .and_then(check_confirmation);
        if let Err(reason) = confirmed {
            warn!(routing_key = %self.routing_key, %reason, "Republish not confirmed");
            return Err(BrokerError::AckFailed(reason));
        }

        debug!(routing_key = %self.routing_key, retry_count, "Republished for retry");
        self.ack().await
    }

    async fn reject(self: Box<Self>) -> BrokerResult<()> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| BrokerError::AckFailed(format!("basic.reject failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nacked_publish_is_a_failure() {
        let err = check_confirmation(Confirmation::Nack(None)).unwrap_err();
        assert!(err.contains("nacked"));
    }

    #[test]
    fn test_plain_ack_is_success() {
        assert!(check_confirmation(Confirmation::Ack(None)).is_ok());
        assert!(check_confirmation(Confirmation::NotRequested).is_ok());
    }
}
