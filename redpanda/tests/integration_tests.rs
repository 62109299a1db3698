//! Integration tests for [`RedpandaIntentQueue`] with a real Kafka-compatible broker.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Publish/subscribe round trip
//! - Nack leads to redelivery of the same intent
//! - Ack commits the offset for the consumer group
//!
//! # Running These Tests
//!
//! Marked `#[ignore]`: they need Docker and take 15-60 seconds each.
//!
//! ```bash
//! cargo test -p flash-sale-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use flash_sale_core::intent_queue::{IntentDelivery, IntentQueue, IntentStream};
use flash_sale_core::{ClientId, ItemId, SeckillIntent};
use flash_sale_redpanda::RedpandaIntentQueue;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

/// Client id used for topic warmup intents; tests skip these.
const WARMUP_CLIENT: ClientId = ClientId::new(999_999);

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn queue(brokers: &str, topic: &str, group: &str) -> RedpandaIntentQueue {
    RedpandaIntentQueue::builder()
        .brokers(brokers)
        .topic(topic)
        .consumer_group(group)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create intent queue")
}

/// Publish a warmup intent until the topic exists.
async fn ensure_topic_exists(queue: &RedpandaIntentQueue) {
    let warmup = SeckillIntent::new(WARMUP_CLIENT, ItemId::new(1));
    for attempt in 1..=60 {
        if queue.publish(&warmup).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Failed to create topic {}", queue.topic());
    }
}

/// Next non-warmup delivery; warmups are acked and skipped.
async fn next_delivery(stream: &mut IntentStream) -> IntentDelivery {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let delivery = stream
                .next()
                .await
                .expect("stream ended")
                .expect("Failed to receive intent");
            let intent = delivery.decode().expect("undecodable intent");
            if intent.client_id == WARMUP_CLIENT {
                delivery.ack();
                continue;
            }
            return delivery;
        }
    })
    .await
    .expect("Timeout waiting for intent")
}

#[tokio::test]
#[ignore]
async fn test_publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = queue(&brokers, "round-trip", "round-trip-group");
    ensure_topic_exists(&queue).await;

    let intent = SeckillIntent::new(ClientId::new(7), ItemId::new(42));
    queue.publish(&intent).await.expect("Failed to publish");

    let mut stream = queue.subscribe().await.expect("Failed to subscribe");
    let delivery = next_delivery(&mut stream).await;

    assert_eq!(delivery.decode().expect("decode"), intent);
    assert!(!delivery.is_redelivery());
    delivery.ack();
}

#[tokio::test]
#[ignore]
async fn test_nack_redelivers_the_same_intent() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = queue(&brokers, "nack-test", "nack-group");
    ensure_topic_exists(&queue).await;

    let intent = SeckillIntent::new(ClientId::new(1), ItemId::new(2));
    queue.publish(&intent).await.expect("Failed to publish");

    let mut stream = queue.subscribe().await.expect("Failed to subscribe");

    let first = next_delivery(&mut stream).await;
    assert_eq!(first.decode().expect("decode"), intent);
    first.nack();

    let second = next_delivery(&mut stream).await;
    assert_eq!(second.decode().expect("decode"), intent);
    assert!(second.is_redelivery());
    second.ack();
}

#[tokio::test]
#[ignore]
async fn test_acked_intent_is_not_seen_by_the_next_subscription() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = queue(&brokers, "commit-test", "commit-group");
    ensure_topic_exists(&queue).await;

    let first = SeckillIntent::new(ClientId::new(1), ItemId::new(3));
    queue.publish(&first).await.expect("Failed to publish");

    {
        let mut stream = queue.subscribe().await.expect("Failed to subscribe");
        let delivery = next_delivery(&mut stream).await;
        assert_eq!(delivery.decode().expect("decode"), first);
        delivery.ack();
        // Let the async commit reach the broker before leaving the group.
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let second = SeckillIntent::new(ClientId::new(2), ItemId::new(3));
    queue.publish(&second).await.expect("Failed to publish");

    let mut stream = queue.subscribe().await.expect("Failed to subscribe");
    let delivery = next_delivery(&mut stream).await;
    assert_eq!(delivery.decode().expect("decode"), second);
    delivery.ack();
}
