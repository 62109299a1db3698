//! Integration tests for the reconciliation consumer
//!
//! Covers idempotent order creation under redelivery, anomaly handling,
//! poison messages, transient store failures and the worker loop.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use flash_sale_core::intent_queue::{IntentDelivery, IntentQueue, Settlement};
use flash_sale_core::{ClientId, InfrastructureError, ItemId, OrderStatus, SeckillIntent};
use flash_sale_runtime::{
    AdmissionConfig, AdmissionController, ReconcileOutcome, ReconciliationConfig,
    ReconciliationConsumer, RetryPolicy,
};
use flash_sale_testing::{
    InMemoryIntentQueue, InMemoryOrderStore, InMemoryRateLimiter, InMemoryReservationStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Test Fixtures
// ============================================================================

const ITEM: ItemId = ItemId::new(1);

fn fast_retries(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build()
}

fn consumer(
    orders: &InMemoryOrderStore,
    queue: &InMemoryIntentQueue,
    config: ReconciliationConfig,
) -> ReconciliationConsumer {
    ReconciliationConsumer::new(Arc::new(orders.clone()), Arc::new(queue.clone()), config)
}

fn delivery_for(intent: SeckillIntent) -> (IntentDelivery, tokio::sync::oneshot::Receiver<Settlement>) {
    IntentDelivery::new(intent.encode().unwrap(), false)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// reconcile()
// ============================================================================

#[tokio::test]
async fn first_delivery_creates_pending_order() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 3, 499_00);
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), ReconciliationConfig::default());

    let outcome = consumer
        .reconcile(SeckillIntent::new(ClientId::new(5), ITEM))
        .await
        .unwrap();

    let ReconcileOutcome::Created(order) = outcome else {
        panic!("expected a created order, got {outcome:?}");
    };
    assert_eq!(order.client_id, ClientId::new(5));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(orders.stock_of(ITEM), Some(2));
}

#[tokio::test]
async fn redelivered_intent_creates_one_order_and_one_decrement() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 3, 499_00);
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), ReconciliationConfig::default());
    let intent = SeckillIntent::new(ClientId::new(5), ITEM);

    assert!(matches!(
        consumer.reconcile(intent).await.unwrap(),
        ReconcileOutcome::Created(_)
    ));
    assert_eq!(
        consumer.reconcile(intent).await.unwrap(),
        ReconcileOutcome::AlreadyReconciled
    );

    assert_eq!(orders.orders().len(), 1);
    assert_eq!(orders.stock_of(ITEM), Some(2));
}

#[tokio::test]
async fn exhausted_durable_stock_is_an_anomaly() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 0, 499_00);
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), ReconciliationConfig::default());
    let intent = SeckillIntent::new(ClientId::new(5), ITEM);

    let outcome = consumer.reconcile(intent).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Anomaly(ref a) if a.intent == intent));
    assert!(orders.orders().is_empty());
    assert_eq!(orders.anomalies().len(), 1);
    assert_eq!(orders.stock_of(ITEM), Some(0));
}

#[tokio::test]
async fn store_failure_is_returned_without_retry() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 1, 499_00);
    orders.fail_next(1);
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), ReconciliationConfig::default());

    let result = consumer.reconcile(SeckillIntent::new(ClientId::new(5), ITEM)).await;

    assert!(matches!(result, Err(InfrastructureError::Store(_))));
    assert!(orders.orders().is_empty());
}

// ============================================================================
// handle()
// ============================================================================

#[tokio::test]
async fn definitive_outcomes_are_acked() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 1, 499_00);
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), ReconciliationConfig::default());

    let (delivery, settled) = delivery_for(SeckillIntent::new(ClientId::new(1), ITEM));
    assert_eq!(consumer.handle(delivery).await, Settlement::Ack);
    assert_eq!(settled.await.unwrap(), Settlement::Ack);

    // Second intent hits exhausted durable stock: still acked.
    let (delivery, settled) = delivery_for(SeckillIntent::new(ClientId::new(2), ITEM));
    assert_eq!(consumer.handle(delivery).await, Settlement::Ack);
    assert_eq!(settled.await.unwrap(), Settlement::Ack);
    assert_eq!(orders.anomalies().len(), 1);
}

#[tokio::test]
async fn poison_message_is_acked_and_dropped() {
    let orders = InMemoryOrderStore::new();
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), ReconciliationConfig::default());

    let (delivery, settled) = IntentDelivery::new(br#"{"client_id":"x"}"#.to_vec(), false);

    assert_eq!(consumer.handle(delivery).await, Settlement::Ack);
    assert_eq!(settled.await.unwrap(), Settlement::Ack);
    assert_eq!(orders.place_order_calls(), 0);
}

#[tokio::test]
async fn transient_failures_are_retried_in_process() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 1, 499_00);
    orders.fail_next(2);
    let config = ReconciliationConfig::builder().retry_policy(fast_retries(3)).build();
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), config);

    let (delivery, _settled) = delivery_for(SeckillIntent::new(ClientId::new(1), ITEM));

    assert_eq!(consumer.handle(delivery).await, Settlement::Ack);
    assert_eq!(orders.orders().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_nack_for_redelivery() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 1, 499_00);
    orders.fail_next(10);
    let config = ReconciliationConfig::builder().retry_policy(fast_retries(2)).build();
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), config);

    let (delivery, settled) = delivery_for(SeckillIntent::new(ClientId::new(1), ITEM));

    assert_eq!(consumer.handle(delivery).await, Settlement::Nack);
    assert_eq!(settled.await.unwrap(), Settlement::Nack);
    assert!(orders.orders().is_empty());
    assert_eq!(orders.stock_of(ITEM), Some(1));
}

#[tokio::test]
async fn rejected_intent_is_acked_without_retry() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 1, 499_00);
    let config = ReconciliationConfig::builder().retry_policy(fast_retries(3)).build();
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), config);
    let intent = SeckillIntent::new(ClientId::new(1), ITEM);

    for round in 0..3 {
        orders.reject_next(1);
        let calls_before = orders.store_calls();
        let (delivery, settled) = delivery_for(intent);

        assert_eq!(consumer.handle(delivery).await, Settlement::Ack, "round {round}");
        assert_eq!(settled.await.unwrap(), Settlement::Ack);
        // One rejected find_order, then the anomaly insert; no retries.
        assert_eq!(orders.store_calls() - calls_before, 2);
    }

    assert!(orders.orders().is_empty());
    assert_eq!(orders.stock_of(ITEM), Some(1));
    assert_eq!(orders.anomalies().len(), 3);
    assert!(orders.anomalies()[0].reason.contains("rejected"));
}

#[tokio::test]
async fn rejection_is_returned_as_a_permanent_error() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 1, 499_00);
    orders.reject_next(1);
    let consumer = consumer(&orders, &InMemoryIntentQueue::new(), ReconciliationConfig::default());

    let err = consumer
        .reconcile(SeckillIntent::new(ClientId::new(5), ITEM))
        .await
        .unwrap_err();

    assert!(matches!(err, InfrastructureError::StoreRejected(_)));
    assert!(!err.is_transient());
}

// ============================================================================
// Worker loop
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_drain_duplicated_intents_into_one_order_each() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 10, 499_00);
    let queue = InMemoryIntentQueue::new();

    for client in 1..=5 {
        let intent = SeckillIntent::new(ClientId::new(client), ITEM);
        // Every intent arrives twice, as after a broker redelivery.
        queue.publish(&intent).await.unwrap();
        queue.publish(&intent).await.unwrap();
    }

    let consumer = consumer(
        &orders,
        &queue,
        ReconciliationConfig::builder().workers(3).build(),
    );
    let (shutdown, _) = broadcast::channel(1);
    let handles = consumer.spawn_workers(&shutdown);
    assert_eq!(handles.len(), 3);

    wait_until(|| queue.acked() == 10 && queue.is_drained()).await;

    shutdown.send(()).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    assert_eq!(orders.orders().len(), 5);
    assert_eq!(orders.stock_of(ITEM), Some(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nacked_intent_is_redelivered_until_the_store_recovers() {
    let orders = InMemoryOrderStore::new();
    orders.create_item(ITEM, "console", 1, 499_00);
    orders.fail_next(3);
    let queue = InMemoryIntentQueue::new();
    queue
        .publish(&SeckillIntent::new(ClientId::new(1), ITEM))
        .await
        .unwrap();

    let config = ReconciliationConfig::builder()
        .retry_policy(RetryPolicy::none())
        .build();
    let consumer = consumer(&orders, &queue, config);
    let (shutdown, _) = broadcast::channel(1);
    let handles = consumer.spawn_workers(&shutdown);

    wait_until(|| orders.orders().len() == 1 && queue.is_drained()).await;
    shutdown.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(queue.nacked() >= 1);
    assert_eq!(queue.acked(), 1);
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admitted_attempts_become_durable_orders() {
    let reservations = InMemoryReservationStore::new();
    let orders = InMemoryOrderStore::new();
    let queue = InMemoryIntentQueue::new();
    orders.create_item(ITEM, "console", 3, 499_00);
    reservations.set_stock(ITEM, 3);

    let controller = AdmissionController::new(
        Arc::new(InMemoryRateLimiter::new()),
        Arc::new(reservations.clone()),
        Arc::new(queue.clone()),
        AdmissionConfig::default(),
    );
    let consumer = consumer(&orders, &queue, ReconciliationConfig::default());
    let (shutdown, _) = broadcast::channel(1);
    let handles = consumer.spawn_workers(&shutdown);

    let mut admitted = 0;
    for client in 1..=8 {
        if controller.start_seckill(ClientId::new(client), ITEM).await.is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 3);

    wait_until(|| orders.orders().len() == 3).await;
    shutdown.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(orders.stock_of(ITEM), Some(0));
    assert_eq!(reservations.stock_of(ITEM), Some(0));
    assert!(orders.anomalies().is_empty());
}
