//! Redis-backed reservation cache.
//!
//! Every operation is a single Redis command, which Redis executes
//! atomically:
//!
//! | Operation | Command |
//! |---|---|
//! | `decrement_stock` | `DECR stock:{item}` |
//! | `increment_stock` | `INCR stock:{item}` |
//! | `try_mark_purchased` | `SETNX user:product:{client}:{item} 1` |
//! | `clear_purchase_marker` | `DEL user:product:{client}:{item}` |
//! | `seed_stock_if_absent` | `SETNX stock:{item} {stock}` |
//!
//! `DECR` on a missing key starts from zero, so an item that was never
//! seeded reads as sold out and the attempt is compensated back to `0`.

use crate::keys;
use flash_sale_core::reservation_store::{ReservationStore, StoreFuture};
use flash_sale_core::{ClientId, InfrastructureError, ItemId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};

/// `Redis`-based reservation store.
///
/// # Thread Safety
///
/// This type is `Clone` and can be safely shared across threads.
/// Each clone shares the same `ConnectionManager`.
///
/// # Example
///
/// ```no_run
/// use flash_sale_redis::RedisReservationStore;
/// use flash_sale_core::reservation_store::ReservationStore;
/// use flash_sale_core::ItemId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisReservationStore::new("redis://127.0.0.1:6379").await?;
///
/// store.seed_stock_if_absent(ItemId::new(1), 100).await?;
/// let remaining = store.decrement_stock(ItemId::new(1)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisReservationStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisReservationStore {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] if the URL is malformed or the
    /// connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self, InfrastructureError> {
        let client = Client::open(redis_url).map_err(|e| {
            InfrastructureError::Cache(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            InfrastructureError::Cache(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("RedisReservationStore initialized successfully");

        Ok(Self { conn_manager })
    }

    /// Share an existing connection manager (e.g. with the rate limiter).
    #[must_use]
    pub const fn from_connection_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

fn cache_error(action: &'static str) -> impl Fn(RedisError) -> InfrastructureError {
    move |e| InfrastructureError::Cache(format!("Failed to {action}: {e}"))
}

impl ReservationStore for RedisReservationStore {
    fn decrement_stock(&self, item_id: ItemId) -> StoreFuture<'_, i64> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let remaining: i64 = conn
                .decr(keys::stock_key(item_id), 1)
                .await
                .map_err(cache_error("decrement stock"))?;
            Ok(remaining)
        })
    }

    fn increment_stock(&self, item_id: ItemId) -> StoreFuture<'_, i64> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let restored: i64 = conn
                .incr(keys::stock_key(item_id), 1)
                .await
                .map_err(cache_error("restore stock"))?;
            Ok(restored)
        })
    }

    fn try_mark_purchased(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let created: bool = conn
                .set_nx(keys::purchase_marker_key(client_id, item_id), 1)
                .await
                .map_err(cache_error("set purchase marker"))?;
            Ok(created)
        })
    }

    fn clear_purchase_marker(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .del(keys::purchase_marker_key(client_id, item_id))
                .await
                .map_err(cache_error("clear purchase marker"))?;
            Ok(())
        })
    }

    fn seed_stock_if_absent(&self, item_id: ItemId, stock: i64) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let seeded: bool = conn
                .set_nx(keys::stock_key(item_id), stock)
                .await
                .map_err(cache_error("seed stock"))?;
            Ok(seeded)
        })
    }

    fn stock(&self, item_id: ItemId) -> StoreFuture<'_, Option<i64>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let value: Option<i64> = conn
                .get(keys::stock_key(item_id))
                .await
                .map_err(cache_error("read stock"))?;
            Ok(value)
        })
    }

    fn has_purchase_marker(&self, client_id: ClientId, item_id: ItemId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let present: bool = conn
                .exists(keys::purchase_marker_key(client_id, item_id))
                .await
                .map_err(cache_error("check purchase marker"))?;
            Ok(present)
        })
    }
}
