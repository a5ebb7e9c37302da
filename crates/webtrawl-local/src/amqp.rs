//! RabbitMQ binding for the queue seam (feature `amqp`).
//!
//! Queues are declared durable with a broker-side message TTL; publishes
//! are persistent and confirmed before `publish` returns. Each
//! subscription gets its own channel with `basic_qos(1)`, so the broker
//! itself bounds in-flight work per consumer.

use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::Duration;
use webtrawl_core::{Error, QueueBus, QueueHandler, QueueName, Result};

pub struct AmqpQueueBus {
    conn: Connection,
    publish_channel: Channel,
}

impl AmqpQueueBus {
    pub async fn connect(url: &str, message_ttl: Duration) -> Result<Self> {
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(queue_err)?;
        let channel = conn.create_channel().await.map_err(queue_err)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(queue_err)?;
        let ttl_ms = message_ttl.as_millis().min(i32::MAX as u128) as i32;
        for queue in QueueName::ALL {
            declare_queue(&channel, queue, ttl_ms).await?;
        }
        Ok(Self {
            conn,
            publish_channel: channel,
        })
    }
}

async fn declare_queue(channel: &Channel, queue: QueueName, ttl_ms: i32) -> Result<()> {
    let mut args = FieldTable::default();
    args.insert("x-message-ttl".into(), AMQPValue::LongInt(ttl_ms));
    channel
        .queue_declare(
            queue.as_str(),
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await
        .map_err(queue_err)?;
    Ok(())
}

fn queue_err(e: lapin::Error) -> Error {
    Error::Queue(e.to_string())
}

#[async_trait::async_trait]
impl QueueBus for AmqpQueueBus {
    async fn publish(&self, queue: QueueName, payload: Vec<u8>) -> Result<()> {
        let confirm = self
            .publish_channel
            .basic_publish(
                "",
                queue.as_str(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(queue_err)?
            .await
            .map_err(queue_err)?;
        match confirm {
            Confirmation::Nack(_) => Err(Error::Queue(format!("broker nacked publish to {queue}"))),
            _ => Ok(()),
        }
    }

    async fn subscribe(&self, queue: QueueName, handler: Arc<dyn QueueHandler>) -> Result<()> {
        let channel = self.conn.create_channel().await.map_err(queue_err)?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(queue_err)?;
        let mut consumer = channel
            .basic_consume(
                queue.as_str(),
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(queue_err)?;
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(queue = %queue, error = %e, "consume error");
                        continue;
                    }
                };
                match handler.handle(&delivery.data).await {
                    Ok(()) => {
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            tracing::warn!(queue = %queue, error = %e, "ack failed");
                        }
                    }
                    Err(e) => {
                        // Reject without requeue: a message the handler
                        // cannot process must not loop forever.
                        tracing::warn!(queue = %queue, error = %e, "handler failed; rejecting");
                        if let Err(e) =
                            delivery.reject(BasicRejectOptions { requeue: false }).await
                        {
                            tracing::warn!(queue = %queue, error = %e, "reject failed");
                        }
                    }
                }
            }
            tracing::info!(queue = %queue, "consumer stream ended");
        });
        Ok(())
    }
}
