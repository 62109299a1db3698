//! Low-latency reservation primitives over a shared cache.
//!
//! The admission path coordinates through exactly four single-key atomic
//! operations:
//!
//! | Operation | Cache command | Purpose |
//! |---|---|---|
//! | [`decrement_stock`](ReservationStore::decrement_stock) | `DECR` | claim a unit |
//! | [`increment_stock`](ReservationStore::increment_stock) | `INCR` | compensation |
//! | [`try_mark_purchased`](ReservationStore::try_mark_purchased) | `SET NX` | first purchaser wins |
//! | [`clear_purchase_marker`](ReservationStore::clear_purchase_marker) | `DEL` | compensation |
//!
//! No multi-key transaction is assumed. Cross-key problems are solved by
//! ordering and compensation in the admission controller.
//!
//! The remaining operations serve the stock bootstrapper and operators; the
//! admission path never reads counters directly (read-modify-write from
//! application code is forbidden).

use crate::error::InfrastructureError;
use crate::types::{ClientId, ItemId};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by reservation store operations.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, InfrastructureError>> + Send + 'a>>;

/// Shared cache holding stock counters and purchase markers.
///
/// # Thread Safety
///
/// Implementations are shared across every request task, so they must be
/// `Send + Sync` and each operation must be indivisible on the backend.
pub trait ReservationStore: Send + Sync {
    /// Atomically decrement the item's counter and return the new value.
    ///
    /// No precondition is enforced; the value may go negative.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] on backend failure.
    fn decrement_stock(&self, item_id: ItemId) -> StoreFuture<'_, i64>;

    /// Atomically increment the item's counter and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] on backend failure.
    fn increment_stock(&self, item_id: ItemId) -> StoreFuture<'_, i64>;

    /// Create the purchase marker if absent.
    ///
    /// Returns `true` only if this call created the marker.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] on backend failure.
    fn try_mark_purchased(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, bool>;

    /// Remove the purchase marker. Compensation only.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] on backend failure.
    fn clear_purchase_marker(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, ()>;

    /// Set the item's counter to `stock` only if no counter exists.
    ///
    /// Returns `true` if the counter was created by this call.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] on backend failure.
    fn seed_stock_if_absent(&self, item_id: ItemId, stock: i64) -> StoreFuture<'_, bool>;

    /// Read the item's counter, if any. Inspection only.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] on backend failure.
    fn stock(&self, item_id: ItemId) -> StoreFuture<'_, Option<i64>>;

    /// Whether a purchase marker exists. Inspection only.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] on backend failure.
    fn has_purchase_marker(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, bool>;
}
