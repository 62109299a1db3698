//! Intent queue abstraction between admission and reconciliation.
//!
//! The admission controller publishes one [`SeckillIntent`] per successful
//! reservation; the reconciliation consumer drains them and makes them
//! durable.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ AdmissionController  │
//! └──────────┬───────────┘
//!            │ publish(intent)
//!            ▼
//! ┌──────────────────────┐
//! │     Intent Queue     │◄─── durable, at-least-once
//! └──────────┬───────────┘
//!            │ IntentDelivery
//!            ▼
//! ┌──────────────────────┐
//! │ ReconciliationConsumer│──► ack / nack
//! └──────────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: an intent may arrive more than once
//! - **Explicit settlement**: a delivery is only removed from the queue after
//!   [`IntentDelivery::ack`]; [`IntentDelivery::nack`] (or dropping the
//!   delivery) hands it back for redelivery
//! - **No global FIFO**: ordering across producers is not guaranteed
//!
//! # Implementations
//!
//! - `InMemoryIntentQueue` (in `flash-sale-testing`): fast, deterministic testing
//! - `RedpandaIntentQueue` (in `flash-sale-redpanda`): Kafka-compatible production queue

use crate::error::InfrastructureError;
use crate::types::{IntentCodecError, SeckillIntent};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during intent queue operations.
#[derive(Error, Debug, Clone)]
pub enum IntentQueueError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an intent
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// An intent could not be encoded for publishing
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl From<IntentQueueError> for InfrastructureError {
    fn from(err: IntentQueueError) -> Self {
        match err {
            IntentQueueError::SerializationFailed(reason) => Self::Serialization(reason),
            other => Self::Queue(other.to_string()),
        }
    }
}

/// How the consumer settled a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed (or deliberately discarded); remove from the queue.
    Ack,
    /// Not processed; deliver again.
    Nack,
}

/// One delivery of an intent payload, pending settlement.
///
/// The queue implementation keeps the matching [`oneshot::Receiver`] and
/// waits for the consumer's decision. Dropping a delivery without settling
/// it counts as [`Settlement::Nack`].
#[derive(Debug)]
pub struct IntentDelivery {
    payload: Vec<u8>,
    redelivered: bool,
    settle: Option<oneshot::Sender<Settlement>>,
}

impl IntentDelivery {
    /// Create a delivery and the receiver on which its settlement arrives.
    #[must_use]
    pub fn new(payload: Vec<u8>, redelivered: bool) -> (Self, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                redelivered,
                settle: Some(tx),
            },
            rx,
        )
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the broker reports this as a repeat delivery.
    ///
    /// Informational only: idempotency never relies on this flag.
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.redelivered
    }

    /// Decode the payload as a [`SeckillIntent`].
    ///
    /// # Errors
    ///
    /// Returns [`IntentCodecError`] for malformed payloads.
    pub fn decode(&self) -> Result<SeckillIntent, IntentCodecError> {
        SeckillIntent::decode(&self.payload)
    }

    /// Remove the intent from the queue.
    pub fn ack(mut self) {
        self.settle_with(Settlement::Ack);
    }

    /// Return the intent to the queue for redelivery.
    pub fn nack(mut self) {
        self.settle_with(Settlement::Nack);
    }

    fn settle_with(&mut self, settlement: Settlement) {
        if let Some(tx) = self.settle.take() {
            // The queue side may already be gone (shutdown); nothing to do then.
            let _ = tx.send(settlement);
        }
    }
}

/// Stream of deliveries from a subscription.
pub type IntentStream =
    Pin<Box<dyn Stream<Item = Result<IntentDelivery, IntentQueueError>> + Send>>;

/// Durable, at-least-once channel for seckill intents.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so both the admission
/// controller and the reconciliation consumer can hold an
/// `Arc<dyn IntentQueue>`.
pub trait IntentQueue: Send + Sync {
    /// Publish an intent.
    ///
    /// Returns once the broker has durably accepted the message.
    ///
    /// # Errors
    ///
    /// Returns [`IntentQueueError::PublishFailed`] if the broker refuses or
    /// is unreachable, [`IntentQueueError::SerializationFailed`] if the
    /// intent cannot be encoded.
    fn publish(
        &self,
        intent: &SeckillIntent,
    ) -> Pin<Box<dyn Future<Output = Result<(), IntentQueueError>> + Send + '_>>;

    /// Open a subscription.
    ///
    /// Several subscriptions may be open at once; they share the queue's
    /// deliveries (consumer group semantics).
    ///
    /// # Errors
    ///
    /// Returns [`IntentQueueError::SubscriptionFailed`] if the subscription
    /// cannot be created.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<IntentStream, IntentQueueError>> + Send + '_>>;
}
