//! In-memory durable store for items, orders and anomalies.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::mocks::test_clock;
use chrono::{DateTime, Utc};
use flash_sale_core::environment::Clock;
use flash_sale_core::order_store::{
    OrderStore, OrderStoreError, OrderStoreFuture, PlaceOrderOutcome,
};
use flash_sale_core::{
    ClientId, Item, ItemId, Order, OrderId, OrderStatus, ReconciliationAnomaly, SeckillIntent,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct StoreState {
    items: HashMap<ItemId, Item>,
    orders: Vec<Order>,
    anomalies: Vec<ReconciliationAnomaly>,
    next_order_id: i64,
    transient_failures: usize,
    rejections: usize,
    place_order_calls: usize,
    store_calls: usize,
}

/// In-memory durable store for fast, deterministic testing.
///
/// `place_order` runs under one lock, which gives it the same
/// all-or-nothing behaviour as the SQL transaction: the `(client, item)`
/// uniqueness check, the conditional decrement and the insert either all
/// apply or none do.
///
/// # Example
///
/// ```
/// use flash_sale_testing::InMemoryOrderStore;
/// use flash_sale_core::order_store::{OrderStore, PlaceOrderOutcome};
/// use flash_sale_core::{ClientId, ItemId, SeckillIntent};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryOrderStore::new();
/// store.create_item(ItemId::new(1), "phone", 1, 99_00);
///
/// let intent = SeckillIntent::new(ClientId::new(7), ItemId::new(1));
/// assert!(matches!(store.place_order(&intent).await?, PlaceOrderOutcome::Created(_)));
/// assert_eq!(store.place_order(&intent).await?, PlaceOrderOutcome::AlreadyExists);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryOrderStore {
    /// Create an empty store using [`test_clock`] for timestamps.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(test_clock()))
    }

    /// Create an empty store with a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                next_order_id: 1,
                ..StoreState::default()
            })),
            clock,
        }
    }

    /// Insert or replace an item.
    pub fn create_item(&self, id: ItemId, name: &str, stock: i64, price_cents: i64) -> Item {
        let item = Item {
            id,
            name: name.to_string(),
            stock,
            price_cents,
            created_at: self.clock.now(),
        };
        self.state.lock().unwrap().items.insert(id, item.clone());
        item
    }

    /// Authoritative stock for an item.
    #[must_use]
    pub fn stock_of(&self, item_id: ItemId) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .items
            .get(&item_id)
            .map(|item| item.stock)
    }

    /// Every order, in insertion order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().unwrap().orders.clone()
    }

    /// Every recorded anomaly.
    #[must_use]
    pub fn anomalies(&self) -> Vec<ReconciliationAnomaly> {
        self.state.lock().unwrap().anomalies.clone()
    }

    /// How many times `place_order` reached the store.
    #[must_use]
    pub fn place_order_calls(&self) -> usize {
        self.state.lock().unwrap().place_order_calls
    }

    /// Fail the next `count` calls with [`OrderStoreError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().transient_failures = count;
    }

    /// Calls of any kind that reached the store.
    #[must_use]
    pub fn store_calls(&self) -> usize {
        self.state.lock().unwrap().store_calls
    }

    /// Reject the next `count` calls with [`OrderStoreError::DatabaseError`].
    ///
    /// Checked after the transient failures from [`fail_next`](Self::fail_next).
    pub fn reject_next(&self, count: usize) {
        self.state.lock().unwrap().rejections = count;
    }

    fn take_failure(state: &mut StoreState) -> Result<(), OrderStoreError> {
        state.store_calls += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(OrderStoreError::Unavailable("injected store failure".into()));
        }
        if state.rejections > 0 {
            state.rejections -= 1;
            return Err(OrderStoreError::DatabaseError("injected rejection".into()));
        }
        Ok(())
    }

    fn place(
        state: &mut StoreState,
        intent: &SeckillIntent,
        now: DateTime<Utc>,
    ) -> PlaceOrderOutcome {
        let duplicate = state
            .orders
            .iter()
            .any(|o| o.client_id == intent.client_id && o.item_id == intent.item_id);
        if duplicate {
            return PlaceOrderOutcome::AlreadyExists;
        }

        match state.items.get_mut(&intent.item_id) {
            Some(item) if item.stock > 0 => item.stock -= 1,
            _ => return PlaceOrderOutcome::StockExhausted,
        }

        let order = Order {
            id: OrderId::new(state.next_order_id),
            client_id: intent.client_id,
            item_id: intent.item_id,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.next_order_id += 1;
        state.orders.push(order.clone());
        PlaceOrderOutcome::Created(order)
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn find_order(
        &self,
        client_id: ClientId,
        item_id: ItemId,
    ) -> OrderStoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_failure(&mut state)?;
            Ok(state
                .orders
                .iter()
                .find(|o| o.client_id == client_id && o.item_id == item_id)
                .cloned())
        })
    }

    fn place_order(&self, intent: &SeckillIntent) -> OrderStoreFuture<'_, PlaceOrderOutcome> {
        let intent = *intent;
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.lock().unwrap();
            state.place_order_calls += 1;
            Self::take_failure(&mut state)?;
            Ok(Self::place(&mut state, &intent, now))
        })
    }

    fn list_items(&self) -> OrderStoreFuture<'_, Vec<Item>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_failure(&mut state)?;
            let mut items: Vec<Item> = state.items.values().cloned().collect();
            items.sort_by_key(|item| item.id);
            Ok(items)
        })
    }

    fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> OrderStoreFuture<'_, ()> {
        let anomaly = anomaly.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_failure(&mut state)?;
            state.anomalies.push(anomaly);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhausted_stock_changes_nothing() {
        let store = InMemoryOrderStore::new();
        store.create_item(ItemId::new(1), "phone", 0, 100);

        let outcome = store
            .place_order(&SeckillIntent::new(ClientId::new(1), ItemId::new(1)))
            .await
            .unwrap();

        assert_eq!(outcome, PlaceOrderOutcome::StockExhausted);
        assert!(store.orders().is_empty());
        assert_eq!(store.stock_of(ItemId::new(1)), Some(0));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let store = InMemoryOrderStore::new();
        store.fail_next(1);

        assert!(store.list_items().await.is_err());
        assert!(store.list_items().await.is_ok());
    }

    #[tokio::test]
    async fn rejections_follow_transient_failures() {
        let store = InMemoryOrderStore::new();
        store.fail_next(1);
        store.reject_next(1);

        assert!(matches!(
            store.list_items().await,
            Err(OrderStoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.list_items().await,
            Err(OrderStoreError::DatabaseError(_))
        ));
        assert!(store.list_items().await.is_ok());
        assert_eq!(store.store_calls(), 3);
    }
}
