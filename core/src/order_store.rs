//! Durable store for items and orders.
//!
//! This is the source of truth that the reconciliation consumer writes to and
//! the stock bootstrapper reads from.
//!
//! # Design
//!
//! The trait is deliberately small. The one operation that matters for
//! consistency is [`OrderStore::place_order`], which must be a single
//! atomic unit:
//!
//! 1. Insert a `pending` order for `(client, item)` unless one exists
//! 2. Decrement the item's stock *only if* it is greater than zero
//!
//! Both effects commit or neither does. A uniqueness constraint on
//! `(client_id, item_id)` is the durable idempotency anchor. The duplicate
//! check comes first so that a redelivered intent reports
//! [`PlaceOrderOutcome::AlreadyExists`] even when its own earlier delivery
//! took the last unit.
//!
//! # Implementations
//!
//! - `PostgresOrderStore` (in `flash-sale-postgres`): production implementation
//! - `InMemoryOrderStore` (in `flash-sale-testing`): fast, deterministic testing

use crate::error::{InfrastructureError, ReconciliationAnomaly};
use crate::types::{ClientId, Item, ItemId, Order, SeckillIntent};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during durable store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderStoreError {
    /// The store could not be reached or the transaction could not start.
    ///
    /// Transient: the operation may succeed if retried.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A query failed for a reason retrying will not fix (bad input,
    /// constraint or schema mismatch).
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<OrderStoreError> for InfrastructureError {
    fn from(err: OrderStoreError) -> Self {
        match err {
            OrderStoreError::Unavailable(_) => Self::Store(err.to_string()),
            OrderStoreError::DatabaseError(_) => Self::StoreRejected(err.to_string()),
        }
    }
}

/// Result of the atomic insert-and-decrement unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceOrderOutcome {
    /// Stock decremented and order inserted.
    Created(Order),
    /// An order for this `(client, item)` already existed; nothing changed.
    AlreadyExists,
    /// The conditional decrement affected zero rows; nothing changed.
    StockExhausted,
}

/// Boxed future returned by durable store operations.
pub type OrderStoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, OrderStoreError>> + Send + 'a>>;

/// Durable store for items and orders.
pub trait OrderStore: Send + Sync {
    /// Look up the order for `(client, item)`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the query fails.
    fn find_order(&self, client_id: ClientId, item_id: ItemId)
    -> OrderStoreFuture<'_, Option<Order>>;

    /// Atomically insert a pending order and decrement stock (if positive).
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the transaction fails for
    /// infrastructure reasons. Business outcomes (duplicate, exhausted) are
    /// reported through [`PlaceOrderOutcome`].
    fn place_order(&self, intent: &SeckillIntent) -> OrderStoreFuture<'_, PlaceOrderOutcome>;

    /// List every item with its authoritative stock.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the query fails.
    fn list_items(&self) -> OrderStoreFuture<'_, Vec<Item>>;

    /// Persist a reconciliation anomaly for later investigation.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the insert fails.
    fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> OrderStoreFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_maps_to_a_transient_error() {
        let unavailable = InfrastructureError::from(OrderStoreError::Unavailable("reset".into()));
        assert!(matches!(unavailable, InfrastructureError::Store(_)));
        assert!(unavailable.is_transient());

        let rejected =
            InfrastructureError::from(OrderStoreError::DatabaseError("out of range".into()));
        assert!(matches!(rejected, InfrastructureError::StoreRejected(_)));
        assert!(!rejected.is_transient());
    }
}
