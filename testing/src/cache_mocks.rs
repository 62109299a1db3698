//! In-memory reservation cache and rate limiter.
//!
//! - [`InMemoryReservationStore`]: counters and purchase markers in a `HashMap`
//! - [`InMemoryRateLimiter`]: fixed-window counters keyed by `(client, item)`
//!
//! Both support failure injection so compensation and fail-closed paths can
//! be driven deterministically.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use flash_sale_core::rate_limiter::{RateLimitDecision, RateLimitPolicy, RateLimiter};
use flash_sale_core::reservation_store::{ReservationStore, StoreFuture};
use flash_sale_core::{ClientId, InfrastructureError, ItemId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Operations of [`InMemoryReservationStore`] that can be made to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationOp {
    /// `decrement_stock`
    Decrement,
    /// `increment_stock`
    Increment,
    /// `try_mark_purchased`
    MarkPurchased,
    /// `clear_purchase_marker`
    ClearMarker,
    /// `seed_stock_if_absent`
    Seed,
}

#[derive(Debug, Default)]
struct CacheState {
    stock: HashMap<ItemId, i64>,
    markers: HashSet<(ClientId, ItemId)>,
    failing: HashSet<ReservationOp>,
    stalled: HashMap<ReservationOp, Duration>,
    decrements: usize,
    increments: usize,
}

/// In-memory reservation cache for fast, deterministic testing.
///
/// Mirrors the Redis semantics the production store relies on: decrementing
/// a missing counter starts from zero, markers are set-if-absent.
///
/// # Example
///
/// ```
/// use flash_sale_testing::InMemoryReservationStore;
/// use flash_sale_core::reservation_store::ReservationStore;
/// use flash_sale_core::ItemId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryReservationStore::new();
/// store.set_stock(ItemId::new(1), 2);
///
/// assert_eq!(store.decrement_stock(ItemId::new(1)).await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryReservationStore {
    state: Arc<Mutex<CacheState>>,
}

impl InMemoryReservationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stock counter.
    pub fn set_stock(&self, item_id: ItemId, stock: i64) {
        self.state.lock().unwrap().stock.insert(item_id, stock);
    }

    /// Current counter value, if any.
    #[must_use]
    pub fn stock_of(&self, item_id: ItemId) -> Option<i64> {
        self.state.lock().unwrap().stock.get(&item_id).copied()
    }

    /// Whether a purchase marker exists.
    #[must_use]
    pub fn has_marker(&self, client_id: ClientId, item_id: ItemId) -> bool {
        self.state
            .lock()
            .unwrap()
            .markers
            .contains(&(client_id, item_id))
    }

    /// Number of purchase markers.
    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.state.lock().unwrap().markers.len()
    }

    /// Number of successful decrements.
    #[must_use]
    pub fn decrement_count(&self) -> usize {
        self.state.lock().unwrap().decrements
    }

    /// Number of successful increments.
    #[must_use]
    pub fn increment_count(&self) -> usize {
        self.state.lock().unwrap().increments
    }

    /// Make `op` fail with [`InfrastructureError::Cache`] until healed.
    pub fn fail_on(&self, op: ReservationOp) {
        self.state.lock().unwrap().failing.insert(op);
    }

    /// Make `op` wait `delay` before doing anything.
    pub fn stall_on(&self, op: ReservationOp, delay: Duration) {
        self.state.lock().unwrap().stalled.insert(op, delay);
    }

    /// Clear every injected failure and stall.
    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing.clear();
        state.stalled.clear();
    }

    fn run<T, F>(&self, op: ReservationOp, apply: F) -> StoreFuture<'_, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut CacheState) -> T + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let stall = state.lock().unwrap().stalled.get(&op).copied();
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
            }

            let mut guard = state.lock().unwrap();
            if guard.failing.contains(&op) {
                return Err(InfrastructureError::Cache(format!("injected failure on {op:?}")));
            }
            Ok(apply(&mut guard))
        })
    }
}

impl ReservationStore for InMemoryReservationStore {
    fn decrement_stock(&self, item_id: ItemId) -> StoreFuture<'_, i64> {
        self.run(ReservationOp::Decrement, move |state| {
            state.decrements += 1;
            let counter = state.stock.entry(item_id).or_insert(0);
            *counter -= 1;
            *counter
        })
    }

    fn increment_stock(&self, item_id: ItemId) -> StoreFuture<'_, i64> {
        self.run(ReservationOp::Increment, move |state| {
            state.increments += 1;
            let counter = state.stock.entry(item_id).or_insert(0);
            *counter += 1;
            *counter
        })
    }

    fn try_mark_purchased(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, bool> {
        self.run(ReservationOp::MarkPurchased, move |state| {
            state.markers.insert((client_id, item_id))
        })
    }

    fn clear_purchase_marker(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, ()> {
        self.run(ReservationOp::ClearMarker, move |state| {
            state.markers.remove(&(client_id, item_id));
        })
    }

    fn seed_stock_if_absent(&self, item_id: ItemId, stock: i64) -> StoreFuture<'_, bool> {
        self.run(ReservationOp::Seed, move |state| {
            if state.stock.contains_key(&item_id) {
                false
            } else {
                state.stock.insert(item_id, stock);
                true
            }
        })
    }

    fn stock(&self, item_id: ItemId) -> StoreFuture<'_, Option<i64>> {
        let value = self.stock_of(item_id);
        Box::pin(async move { Ok(value) })
    }

    fn has_purchase_marker(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, bool> {
        let present = self.has_marker(client_id, item_id);
        Box::pin(async move { Ok(present) })
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<(ClientId, ItemId), (u64, Instant)>,
    failing: bool,
}

/// In-memory fixed-window rate limiter.
///
/// Windows are tracked with [`tokio::time::Instant`], so they expire in real
/// time (or under a paused tokio clock).
#[derive(Clone, Debug, Default)]
pub struct InMemoryRateLimiter {
    state: Arc<Mutex<LimiterState>>,
}

impl InMemoryRateLimiter {
    /// Create a limiter with no recorded requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every check fail with [`InfrastructureError::Cache`].
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// Forget all windows.
    pub fn reset(&self) {
        self.state.lock().unwrap().windows.clear();
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn allow(
        &self,
        client_id: ClientId,
        item_id: ItemId,
        policy: RateLimitPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<RateLimitDecision, InfrastructureError>> + Send + '_>>
    {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.lock().unwrap();
            if guard.failing {
                return Err(InfrastructureError::Cache("injected rate limiter failure".into()));
            }

            let now = Instant::now();
            let window = guard
                .windows
                .entry((client_id, item_id))
                .or_insert((0, now));
            if now.duration_since(window.1) >= policy.window {
                *window = (0, now);
            }
            window.0 += 1;

            Ok(RateLimitDecision::from_count(window.0, policy.quota))
        })
    }
}
