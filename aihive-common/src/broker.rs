//! The Broker Adapter: connection/channel management against an
//! AMQP-compatible broker. A struct wrapping a connection, constructed once
//! at startup, with publish/consume methods and a `thiserror` error enum,
//! using `lapin` as the transport.
//!
//! Reconnect backoff reuses [`crate::retry::RetryPolicy`] rather than a
//! bespoke type.

use std::time::Duration;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};

use crate::retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    ConnectionError(#[from] lapin::Error),
    #[error("failed to serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("consumer stream closed")]
    ConsumerClosed,
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Default reconnect policy: base 0.5s, cap 30s, doubling.
pub fn reconnect_policy() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(500), Some(Duration::from_secs(30)))
}

/// The queue-name pair declared per flavor: `<flavor>.task_queue` and
/// `<flavor>.result_queue`.
#[derive(Debug, Clone)]
pub struct QueueNames {
    pub task_queue: String,
    pub result_queue: String,
}

impl QueueNames {
    pub fn for_flavor(flavor: &str) -> Self {
        Self {
            task_queue: format!("{flavor}.task_queue"),
            result_queue: format!("{flavor}.result_queue"),
        }
    }
}

/// Connection/channel management against an AMQP broker. One adapter
/// instance is built once at process startup and held for the process's
/// lifetime. The connection is established lazily, on
/// first use, rather than in the constructor: this lets a caller build an
/// `AppState` value (e.g. in tests that never touch the broker) without
/// requiring a live broker to be reachable, while `connect` below still
/// offers an eager variant for a process's real startup path, which wants
/// to fail fast on a misconfigured `QUEUE_CONNECTION`.
pub struct BrokerAdapter {
    uri: String,
    queues: QueueNames,
    connection: Option<Connection>,
    channel: Option<Channel>,
}

impl BrokerAdapter {
    /// Builds an adapter that defers connecting until first use.
    pub fn new(uri: impl Into<String>, queues: QueueNames) -> Self {
        Self {
            uri: uri.into(),
            queues,
            connection: None,
            channel: None,
        }
    }

    /// Connects eagerly, declares both durable queues, and returns the
    /// adapter. On any failure the caller should retry with
    /// [`reconnect_policy`]; this method itself does not loop.
    pub async fn connect(uri: &str, queues: QueueNames) -> BrokerResult<Self> {
        let mut adapter = Self::new(uri.to_owned(), queues);
        adapter.ensure_channel().await?;
        Ok(adapter)
    }

    /// Returns (connecting if necessary) the channel to issue operations
    /// against, declaring both of the flavor's durable queues the first
    /// time a connection is established.
    async fn ensure_channel(&mut self) -> BrokerResult<&Channel> {
        if self.channel.is_none() {
            let connection =
            Connection::connect(&self.uri, ConnectionProperties::default()).await?;
            let channel = connection.create_channel().await?;

            declare_durable_queue(&channel, &self.queues.task_queue).await?;
            declare_durable_queue(&channel, &self.queues.result_queue).await?;

            info!(
                task_queue = %self.queues.task_queue,
                result_queue = %self.queues.result_queue,
                "broker adapter connected"
            );

            self.connection = Some(connection);
            self.channel = Some(channel);
        }

        Ok(self.channel.as_ref().expect("just connected above"))
    }

    /// Drops the current connection/channel, if any, and reconnects with
    /// exponential backoff (base 0.5s, cap 30s), re-declaring both
    /// queues. Retries forever; the caller is expected to be a long-lived
    /// background task, and broker unavailability is never surfaced as a
    /// fatal error to the rest of the process.
    pub async fn reconnect(&mut self) {
        self.connection = None;
        self.channel = None;

        let policy = reconnect_policy();
        let mut attempt: u32 = 0;

        loop {
            match self.ensure_channel().await {
                Ok(_) => return,
                Err(error) => {
                    let delay = policy.time_until_next_retry(attempt.min(16), None);
                    warn!(%error, attempt, delay_ms = delay.as_millis() as u64, "broker reconnect failed, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.status().connected())
    }

    /// Publishes to the default exchange with routing key = queue name.
    /// Used by the ingress API for task messages and by the worker for
    /// result messages.
    pub async fn publish<T: Serialize>(&mut self, queue: &str, message: &T) -> BrokerResult<()> {
        let body = serde_json::to_vec(message)?;
        let channel = self.ensure_channel().await?;

        channel
            .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            &body,
            BasicProperties::default().with_delivery_mode(2),
        )
            .await?
            .await?;

        Ok(())
    }

    pub async fn publish_task<T: Serialize>(&mut self, message: &T) -> BrokerResult<()> {
        self.publish(&self.queues.task_queue.clone(), message).await
    }

    pub async fn publish_result<T: Serialize>(&mut self, message: &T) -> BrokerResult<()> {
        self.publish(&self.queues.result_queue.clone(), message).await
    }

    /// Starts a `prefetch=1`, manual-ack consumer on the given queue.
    pub async fn consume(&mut self, queue: &str, consumer_tag: &str) -> BrokerResult<Consumer> {
        let channel = self.ensure_channel().await?;
        channel.basic_qos(1, Default::default()).await?;

        let consumer = channel
            .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
            .await?;

        Ok(consumer)
    }

    pub async fn consume_tasks(&mut self, consumer_tag: &str) -> BrokerResult<Consumer> {
        let queue = self.queues.task_queue.clone();
        self.consume(&queue, consumer_tag).await
    }

    pub async fn consume_results(&mut self, consumer_tag: &str) -> BrokerResult<Consumer> {
        let queue = self.queues.result_queue.clone();
        self.consume(&queue, consumer_tag).await
    }

    pub async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        let channel = self.ensure_channel().await?;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    pub async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        let channel = self.ensure_channel().await?;
        channel
            .basic_nack(
            delivery_tag,
            BasicNackOptions {
                requeue,
                ..Default::default()
            },
        )
            .await?;
        Ok(())
    }
}

async fn declare_durable_queue(channel: &Channel, name: &str) -> BrokerResult<()> {
    channel
        .queue_declare(
        name,
        QueueDeclareOptions {
            durable: true,
            ..Default::default()
        },
        FieldTable::default(),
    )
        .await?;
    Ok(())
}

/// Deserializes a delivery body into `T`, used by both the worker's task
/// consumer and the dispatcher's result consumer loops.
pub fn decode_delivery<T: DeserializeOwned>(data: &[u8]) -> BrokerResult<T> {
    serde_json::from_slice(data).map_err(BrokerError::from)
}

/// Drives a `Consumer` stream, yielding the next delivery or `None` when the
/// stream is closed (connection dropped); callers loop this alongside
/// [`BrokerAdapter::reconnect`].
pub async fn next_delivery(consumer: &mut Consumer) -> Option<lapin::message::Delivery> {
    match consumer.next().await {
        Some(Ok(delivery)) => Some(delivery),
        Some(Err(error)) => {
            warn!(%error, "error reading delivery from consumer");
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_are_namespaced_by_flavor() {
        let queues = QueueNames::for_flavor("tts");
        assert_eq!(queues.task_queue, "tts.task_queue");
        assert_eq!(queues.result_queue, "tts.result_queue");
    }

    #[test]
    fn reconnect_policy_respects_base_and_cap() {
        let policy = reconnect_policy();
        assert_eq!(policy.time_until_next_retry(0, None).as_millis(), 500);
        assert_eq!(policy.time_until_next_retry(1, None).as_millis(), 1000);
        assert_eq!(policy.time_until_next_retry(20, None).as_secs(), 30);
    }
}
