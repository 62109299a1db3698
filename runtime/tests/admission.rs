//! Integration tests for the admission controller
//!
//! Drives `start_seckill` against the in-memory doubles, including injected
//! cache and queue failures.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use flash_sale_core::{ClientId, InfrastructureError, ItemId, RejectionReason, SeckillError};
use flash_sale_runtime::{AdmissionConfig, AdmissionController};
use flash_sale_testing::{
    InMemoryIntentQueue, InMemoryRateLimiter, InMemoryReservationStore, ReservationOp,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    limiter: InMemoryRateLimiter,
    reservations: InMemoryReservationStore,
    queue: InMemoryIntentQueue,
    controller: AdmissionController,
}

fn harness(config: AdmissionConfig) -> Harness {
    let limiter = InMemoryRateLimiter::new();
    let reservations = InMemoryReservationStore::new();
    let queue = InMemoryIntentQueue::new();
    let controller = AdmissionController::new(
        Arc::new(limiter.clone()),
        Arc::new(reservations.clone()),
        Arc::new(queue.clone()),
        config,
    );
    Harness {
        limiter,
        reservations,
        queue,
        controller,
    }
}

fn short_window() -> AdmissionConfig {
    AdmissionConfig::builder()
        .rate_limit_window(Duration::from_millis(50))
        .build()
}

const ITEM: ItemId = ItemId::new(1);

// ============================================================================
// Happy path and business rejections
// ============================================================================

#[tokio::test]
async fn admitted_attempt_reserves_and_publishes() {
    let h = harness(AdmissionConfig::default());
    h.reservations.set_stock(ITEM, 3);

    let admission = h.controller.start_seckill(ClientId::new(7), ITEM).await.unwrap();

    assert_eq!(admission.stock_remaining, 2);
    assert_eq!(admission.intent.client_id, ClientId::new(7));
    assert_eq!(h.reservations.stock_of(ITEM), Some(2));
    assert!(h.reservations.has_marker(ClientId::new(7), ITEM));
    assert_eq!(h.queue.published(), vec![admission.intent]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_stock_many_concurrent_clients_succeed() {
    const STOCK: i64 = 10;
    const CLIENTS: u64 = 50;

    let h = harness(AdmissionConfig::default());
    h.reservations.set_stock(ITEM, STOCK);

    let handles: Vec<_> = (1..=CLIENTS)
        .map(|client| {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start_seckill(ClientId::new(client), ITEM).await })
        })
        .collect();

    let mut admitted = 0;
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(SeckillError::Rejected(RejectionReason::OutOfStock)) => out_of_stock += 1,
            Err(other) => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(admitted, STOCK);
    assert_eq!(out_of_stock, i64::try_from(CLIENTS).unwrap() - STOCK);
    assert_eq!(h.reservations.stock_of(ITEM), Some(0));
    assert_eq!(h.reservations.marker_count(), 10);
    assert_eq!(h.queue.published().len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_client_concurrently_reserves_at_most_once() {
    let h = harness(AdmissionConfig::builder().rate_limit_quota(2).build());
    h.reservations.set_stock(ITEM, 5);
    let client = ClientId::new(3);

    let (a, b) = tokio::join!(
        h.controller.start_seckill(client, ITEM),
        h.controller.start_seckill(client, ITEM),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| {
        r.as_ref().err().and_then(SeckillError::rejection) == Some(RejectionReason::AlreadyPurchased)
    }));
    assert_eq!(h.reservations.stock_of(ITEM), Some(4));
}

#[tokio::test]
async fn over_quota_is_rate_limited_until_the_window_expires() {
    let h = harness(short_window());
    h.reservations.set_stock(ITEM, 5);
    let client = ClientId::new(1);

    assert!(h.controller.start_seckill(client, ITEM).await.is_ok());

    let second = h.controller.start_seckill(client, ITEM).await;
    assert_eq!(second, Err(SeckillError::Rejected(RejectionReason::RateLimited)));

    tokio::time::sleep(Duration::from_millis(80)).await;

    // Permitted by the limiter again; stopped by the duplicate gate instead.
    let third = h.controller.start_seckill(client, ITEM).await;
    assert_eq!(third, Err(SeckillError::Rejected(RejectionReason::AlreadyPurchased)));
    assert_eq!(h.reservations.stock_of(ITEM), Some(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_unit_goes_to_exactly_one_of_two_clients() {
    let h = harness(short_window());
    h.reservations.set_stock(ITEM, 1);
    let (c1, c2) = (ClientId::new(1), ClientId::new(2));

    let (r1, r2) = tokio::join!(
        h.controller.start_seckill(c1, ITEM),
        h.controller.start_seckill(c2, ITEM),
    );

    let (winner, loser) = match (&r1, &r2) {
        (Ok(_), Err(e)) | (Err(e), Ok(_)) => {
            assert_eq!(e.rejection(), Some(RejectionReason::OutOfStock));
            if r1.is_ok() { (c1, c2) } else { (c2, c1) }
        },
        other => panic!("expected one winner, got {other:?}"),
    };

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(
        h.controller.start_seckill(winner, ITEM).await,
        Err(SeckillError::Rejected(RejectionReason::AlreadyPurchased))
    );
    assert_eq!(
        h.controller.start_seckill(loser, ITEM).await,
        Err(SeckillError::Rejected(RejectionReason::OutOfStock))
    );
    assert_eq!(h.reservations.stock_of(ITEM), Some(0));
    assert!(!h.reservations.has_marker(loser, ITEM));
}

#[tokio::test]
async fn item_without_counter_is_out_of_stock() {
    let h = harness(AdmissionConfig::default());

    let result = h.controller.start_seckill(ClientId::new(1), ItemId::new(404)).await;

    assert_eq!(result, Err(SeckillError::Rejected(RejectionReason::OutOfStock)));
    assert_eq!(h.reservations.stock_of(ItemId::new(404)), Some(0));
    assert_eq!(h.reservations.marker_count(), 0);
}

// ============================================================================
// Infrastructure failures and compensation
// ============================================================================

#[tokio::test]
async fn rate_limiter_failure_fails_closed() {
    let h = harness(AdmissionConfig::default());
    h.reservations.set_stock(ITEM, 5);
    h.limiter.set_failing(true);

    let result = h.controller.start_seckill(ClientId::new(1), ITEM).await;

    assert!(matches!(result, Err(SeckillError::Unavailable(InfrastructureError::Cache(_)))));
    assert_eq!(h.reservations.stock_of(ITEM), Some(5));
    assert_eq!(h.reservations.marker_count(), 0);
}

#[tokio::test]
async fn publish_failure_restores_counter_and_marker() {
    let h = harness(AdmissionConfig::default());
    h.reservations.set_stock(ITEM, 5);
    h.queue.set_fail_publish(true);

    let result = h.controller.start_seckill(ClientId::new(1), ITEM).await;

    assert!(matches!(result, Err(SeckillError::Unavailable(InfrastructureError::Queue(_)))));
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(h.reservations.stock_of(ITEM), Some(5));
    assert!(!h.reservations.has_marker(ClientId::new(1), ITEM));
    assert!(h.queue.published().is_empty());
}

#[tokio::test]
async fn publish_timeout_is_compensated() {
    let h = harness(
        AdmissionConfig::builder()
            .operation_timeout(Duration::from_millis(30))
            .build(),
    );
    h.reservations.set_stock(ITEM, 2);
    h.queue.stall_publish(Duration::from_millis(300));

    let result = h.controller.start_seckill(ClientId::new(1), ITEM).await;

    assert!(matches!(
        result,
        Err(SeckillError::Unavailable(InfrastructureError::Timeout {
            operation: "publish_intent",
            ..
        }))
    ));
    assert_eq!(h.reservations.stock_of(ITEM), Some(2));
    assert!(!h.reservations.has_marker(ClientId::new(1), ITEM));
}

#[tokio::test]
async fn decrement_timeout_clears_marker_without_restoring_stock() {
    let h = harness(
        AdmissionConfig::builder()
            .operation_timeout(Duration::from_millis(30))
            .build(),
    );
    h.reservations.set_stock(ITEM, 2);
    h.reservations
        .stall_on(ReservationOp::Decrement, Duration::from_millis(300));

    let result = h.controller.start_seckill(ClientId::new(1), ITEM).await;

    assert!(matches!(
        result,
        Err(SeckillError::Unavailable(InfrastructureError::Timeout {
            operation: "decrement_stock",
            ..
        }))
    ));
    assert!(!h.reservations.has_marker(ClientId::new(1), ITEM));
    assert_eq!(h.reservations.increment_count(), 0);
}

#[tokio::test]
async fn marker_failure_is_unavailable_and_touches_no_stock() {
    let h = harness(AdmissionConfig::default());
    h.reservations.set_stock(ITEM, 2);
    h.reservations.fail_on(ReservationOp::MarkPurchased);

    let result = h.controller.start_seckill(ClientId::new(1), ITEM).await;

    assert!(matches!(result, Err(SeckillError::Unavailable(_))));
    assert_eq!(h.reservations.decrement_count(), 0);
    assert_eq!(h.reservations.stock_of(ITEM), Some(2));
}

#[tokio::test]
async fn failed_restore_still_reports_original_outcome() {
    let h = harness(AdmissionConfig::default());
    h.reservations.set_stock(ITEM, 2);
    h.reservations.fail_on(ReservationOp::Increment);
    h.queue.set_fail_publish(true);

    let result = h.controller.start_seckill(ClientId::new(1), ITEM).await;

    // The caller sees the publish failure; the unit stays held until
    // external reconciliation.
    assert!(matches!(result, Err(SeckillError::Unavailable(InfrastructureError::Queue(_)))));
    assert_eq!(h.reservations.stock_of(ITEM), Some(1));
    assert!(!h.reservations.has_marker(ClientId::new(1), ITEM));
}

#[tokio::test]
async fn dropped_caller_does_not_abandon_compensation() {
    let h = harness(AdmissionConfig::default());
    h.reservations.set_stock(ITEM, 3);
    h.queue.stall_publish(Duration::from_millis(100));
    h.queue.set_fail_publish(true);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        h.controller.start_seckill(ClientId::new(1), ITEM),
    )
    .await;
    assert!(abandoned.is_err(), "caller should have given up first");

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.reservations.stock_of(ITEM), Some(3));
    assert!(!h.reservations.has_marker(ClientId::new(1), ITEM));
}

#[tokio::test]
async fn dropped_caller_still_publishes_a_held_reservation() {
    let h = harness(AdmissionConfig::default());
    h.reservations.set_stock(ITEM, 3);
    h.queue.stall_publish(Duration::from_millis(100));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        h.controller.start_seckill(ClientId::new(1), ITEM),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.queue.published().len(), 1);
    assert_eq!(h.reservations.stock_of(ITEM), Some(2));
}
