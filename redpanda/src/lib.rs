//! Redpanda intent queue for the flash sale pipeline.
//!
//! This crate provides a Kafka-compatible implementation of the
//! [`IntentQueue`] trait from `flash-sale-core`, built on rdkafka.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ AdmissionController  │
//! └──────────┬───────────┘
//!            │ publish (key = item id)
//!            ▼
//! ┌──────────────────────┐
//! │  seckill_queue topic │◄─── durable, partitioned
//! └──────────┬───────────┘
//!            │ consumer group
//!       ┌────┴────┐
//!       ▼         ▼
//!  ┌─────────┐ ┌─────────┐
//!  │ worker 0│ │ worker 1│ ──► ack = commit offset
//!  └─────────┘ └─────────┘     nack = seek back to offset
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Each subscription hands out one delivery at a time and waits for its
//!   settlement before fetching the next
//! - [`IntentDelivery::ack`] commits the message offset
//! - [`IntentDelivery::nack`] (or dropping the delivery) seeks the partition
//!   back to the message, so it is fetched again
//! - If the process crashes before a commit, the message is redelivered
//!
//! Messages are keyed by item id, so intents for one item share a partition.
//!
//! # Example
//!
//! ```no_run
//! use flash_sale_redpanda::RedpandaIntentQueue;
//! use flash_sale_core::intent_queue::IntentQueue;
//! use flash_sale_core::{ClientId, ItemId, SeckillIntent};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaIntentQueue::new("localhost:9092")?;
//!
//! queue.publish(&SeckillIntent::new(ClientId::new(7), ItemId::new(1))).await?;
//!
//! let mut stream = queue.subscribe().await?;
//! while let Some(Ok(delivery)) = stream.next().await {
//!     println!("Received: {:?}", delivery.decode());
//!     delivery.ack();
//! }
//! # Ok(())
//! # }
//! ```

use flash_sale_core::SeckillIntent;
use flash_sale_core::intent_queue::{
    IntentDelivery, IntentQueue, IntentQueueError, IntentStream, Settlement,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default topic name.
pub const DEFAULT_TOPIC: &str = "seckill_queue";

/// Default consumer group for reconciliation workers.
pub const DEFAULT_CONSUMER_GROUP: &str = "seckill-reconciler";

/// Redpanda intent queue.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Topic**: default [`DEFAULT_TOPIC`]
/// - **Consumer group**: default [`DEFAULT_CONSUMER_GROUP`]; every
///   subscription joins it, so workers split the partitions
/// - **Producer settings**: acks (default `all`), send timeout (default 5s)
/// - **Offset reset**: where a new group starts reading (default `earliest`,
///   so intents published before the first worker starts are not skipped)
///
/// # Example
///
/// ```no_run
/// use flash_sale_redpanda::RedpandaIntentQueue;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = RedpandaIntentQueue::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .topic("seckill_queue")
///     .consumer_group("seckill-reconciler")
///     .timeout(Duration::from_secs(3))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaIntentQueue {
    /// Kafka producer for publishing intents
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Topic intents are published to
    topic: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID
    consumer_group: String,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaIntentQueue {
    /// Create a queue with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IntentQueueError::ConnectionFailed`] if the producer cannot
    /// be created.
    pub fn new(brokers: &str) -> Result<Self, IntentQueueError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the queue.
    #[must_use]
    pub fn builder() -> RedpandaIntentQueueBuilder {
        RedpandaIntentQueueBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// The topic intents are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The consumer group every subscription joins.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

/// Builder for configuring a [`RedpandaIntentQueue`].
#[derive(Default)]
pub struct RedpandaIntentQueueBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaIntentQueueBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all". A reservation is only kept once its intent is durable.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the auto offset reset policy: "earliest", "latest" or "error".
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaIntentQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`IntentQueueError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    pub fn build(self) -> Result<RedpandaIntentQueue, IntentQueueError> {
        let brokers = self.brokers.ok_or_else(|| {
            IntentQueueError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .create()
            .map_err(|e| {
                IntentQueueError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let queue = RedpandaIntentQueue {
            producer,
            brokers,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            timeout,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %queue.brokers,
            topic = %queue.topic,
            consumer_group = %queue.consumer_group,
            acks,
            "RedpandaIntentQueue created successfully"
        );

        Ok(queue)
    }
}

impl IntentQueue for RedpandaIntentQueue {
    fn publish(
        &self,
        intent: &SeckillIntent,
    ) -> Pin<Box<dyn Future<Output = Result<(), IntentQueueError>> + Send + '_>> {
        let intent = *intent;

        Box::pin(async move {
            let payload = intent
                .encode()
                .map_err(|e| IntentQueueError::SerializationFailed(e.to_string()))?;

            // Keyed by item so one item's intents stay on one partition
            let key = intent.item_id.to_string();
            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        client_id = %intent.client_id,
                        item_id = %intent.item_id,
                        "Intent published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        error = %kafka_error,
                        "Failed to publish intent"
                    );
                    Err(IntentQueueError::PublishFailed {
                        topic: self.topic.clone(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<IntentStream, IntentQueueError>> + Send + '_>> {
        let topic = self.topic.clone();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            // Manual commit for at-least-once
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| IntentQueueError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| IntentQueueError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to subscribe to topic: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %consumer_group,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to intent topic"
            );

            // Capacity 1: the consumer task never runs ahead of settlement
            let (tx, rx) = tokio::sync::mpsc::channel(1);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                // Highest offset handed out per partition; anything at or
                // below it is a redelivery after a nack.
                let mut delivered: HashMap<i32, i64> = HashMap::new();

                while let Some(msg_result) = stream.next().await {
                    let message = match msg_result {
                        Ok(message) => message,
                        Err(e) => {
                            let err = IntentQueueError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break; // Receiver dropped
                            }
                            continue;
                        },
                    };

                    let partition = message.partition();
                    let offset = message.offset();
                    let redelivered = delivered
                        .get(&partition)
                        .is_some_and(|highest| offset <= *highest);
                    delivered
                        .entry(partition)
                        .and_modify(|highest| *highest = (*highest).max(offset))
                        .or_insert(offset);

                    // An empty payload still goes to the consumer, which
                    // discards it as undecodable.
                    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                    let (delivery, settled) = IntentDelivery::new(payload, redelivered);

                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break; // Exit WITHOUT committing
                    }

                    match settled.await {
                        Ok(Settlement::Ack) => {
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition,
                                    offset,
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        },
                        Ok(Settlement::Nack) | Err(_) => {
                            tracing::debug!(partition, offset, "Intent nacked, seeking back");
                            if let Err(e) = consumer.seek(
                                message.topic(),
                                partition,
                                Offset::Offset(offset),
                                Duration::from_secs(5),
                            ) {
                                // Without the seek the message is only
                                // redelivered after a rebalance or restart.
                                tracing::warn!(
                                    partition,
                                    offset,
                                    error = %e,
                                    "Failed to seek back after nack"
                                );
                            }
                        },
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as IntentStream)
        })
    }
}
