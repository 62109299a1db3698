//! `PostgreSQL` durable store for the flash sale pipeline.
//!
//! This crate provides [`PostgresOrderStore`], the production implementation
//! of the `OrderStore` trait from `flash-sale-core`, and [`AnomalyLog`], the
//! operator-facing view of intents that could not be applied.
//!
//! - Items with authoritative stock
//! - Orders, unique per `(client_id, item_id)`
//! - The atomic insert-and-decrement transaction used by reconciliation
//! - Embedded `sqlx` migrations
//!
//! # Example
//!
//! ```no_run
//! use flash_sale_postgres::PostgresOrderStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresOrderStore::new("postgres://localhost/seckill", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anomaly_log;

pub use anomaly_log::{AnomalyEntry, AnomalyLog, AnomalyStatus};

use chrono::{DateTime, Utc};
use flash_sale_core::order_store::{
    OrderStore, OrderStoreError, OrderStoreFuture, PlaceOrderOutcome,
};
use flash_sale_core::{
    ClientId, Item, ItemId, Order, OrderId, OrderStatus, ReconciliationAnomaly, SeckillIntent,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

/// `PostgreSQL`-backed durable store for items and orders.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Connect to `PostgreSQL` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError::Unavailable`] if the connection fails.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, OrderStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| OrderStoreError::Unavailable(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Anomaly log sharing this store's pool.
    #[must_use]
    pub fn anomaly_log(&self) -> AnomalyLog {
        AnomalyLog::new(self.pool.clone())
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError::DatabaseError`] if migrations fail.
    pub async fn migrate(&self) -> Result<(), OrderStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OrderStoreError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Create a catalog item.
    ///
    /// The caller is responsible for seeding the reservation cache
    /// afterwards (see `StockBootstrapper::register_item`).
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the insert fails, including a negative
    /// `stock` rejected by the table's check constraint.
    pub async fn create_item(
        &self,
        name: &str,
        stock: i64,
        price_cents: i64,
    ) -> Result<Item, OrderStoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO items (name, stock, price_cents)
            VALUES ($1, $2, $3)
            RETURNING id, name, stock, price_cents, created_at
            ",
        )
        .bind(name)
        .bind(stock)
        .bind(price_cents)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        let item = row_to_item(&row)?;
        tracing::info!(item_id = %item.id, stock, "Item created");
        Ok(item)
    }

    async fn find_order_row(
        &self,
        client_id: ClientId,
        item_id: ItemId,
    ) -> Result<Option<Order>, OrderStoreError> {
        let row = sqlx::query(
            r"
            SELECT id, client_id, item_id, status, created_at, updated_at
            FROM orders
            WHERE client_id = $1 AND item_id = $2
            ",
        )
        .bind(to_db_id(client_id.get())?)
        .bind(to_db_id(item_id.get())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn place_order_tx(
        &self,
        intent: SeckillIntent,
    ) -> Result<PlaceOrderOutcome, OrderStoreError> {
        let client_id = to_db_id(intent.client_id.get())?;
        let item_id = to_db_id(intent.item_id.get())?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| {
                OrderStoreError::Unavailable(format!("Failed to begin transaction: {e}"))
            })?;

        // The duplicate check runs first: a concurrent delivery of the same
        // intent waits on the winner's row and then reports AlreadyExists,
        // even when the winner took the last unit.
        let inserted = sqlx::query(
            r"
            INSERT INTO orders (client_id, item_id, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (client_id, item_id) DO NOTHING
            RETURNING id, client_id, item_id, status, created_at, updated_at
            ",
        )
        .bind(client_id)
        .bind(item_id)
        .bind(OrderStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?;

        let Some(row) = inserted else {
            tx.rollback().await.map_err(store_error)?;
            return Ok(PlaceOrderOutcome::AlreadyExists);
        };

        let decremented =
            sqlx::query("UPDATE items SET stock = stock - 1 WHERE id = $1 AND stock > 0")
                .bind(item_id)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;

        if decremented.rows_affected() == 0 {
            tx.rollback().await.map_err(store_error)?;
            return Ok(PlaceOrderOutcome::StockExhausted);
        }

        let order = row_to_order(&row)?;
        tx.commit().await.map_err(store_error)?;

        Ok(PlaceOrderOutcome::Created(order))
    }

    async fn list_item_rows(&self) -> Result<Vec<Item>, OrderStoreError> {
        let rows =
            sqlx::query("SELECT id, name, stock, price_cents, created_at FROM items ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(store_error)?;

        rows.iter().map(row_to_item).collect()
    }
}

impl OrderStore for PostgresOrderStore {
    fn find_order(
        &self,
        client_id: ClientId,
        item_id: ItemId,
    ) -> OrderStoreFuture<'_, Option<Order>> {
        Box::pin(self.find_order_row(client_id, item_id))
    }

    fn place_order(&self, intent: &SeckillIntent) -> OrderStoreFuture<'_, PlaceOrderOutcome> {
        let intent = *intent;
        Box::pin(self.place_order_tx(intent))
    }

    fn list_items(&self) -> OrderStoreFuture<'_, Vec<Item>> {
        Box::pin(self.list_item_rows())
    }

    fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> OrderStoreFuture<'_, ()> {
        let anomaly = anomaly.clone();
        Box::pin(async move {
            self.anomaly_log().add_entry(&anomaly).await?;
            Ok(())
        })
    }
}

/// Map a sqlx error, treating connection-level failures and retryable
/// server conditions as transient.
pub(crate) fn store_error(err: sqlx::Error) -> OrderStoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => OrderStoreError::Unavailable(err.to_string()),
        sqlx::Error::Database(ref db_err)
            if db_err.code().is_some_and(|code| is_transient_sqlstate(&code)) =>
        {
            OrderStoreError::Unavailable(err.to_string())
        },
        other => OrderStoreError::DatabaseError(other.to_string()),
    }
}

/// SQLSTATE classes that clear on retry: connection exceptions (08),
/// serialization failures and deadlocks (40), insufficient resources (53)
/// and operator intervention such as an admin shutdown (57).
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code.get(..2), Some("08" | "40" | "53" | "57"))
}

/// Identifiers are `u64` in the domain and `BIGINT` in the schema.
pub(crate) fn to_db_id(id: u64) -> Result<i64, OrderStoreError> {
    i64::try_from(id)
        .map_err(|_| OrderStoreError::DatabaseError(format!("Identifier out of range: {id}")))
}

pub(crate) fn from_db_id(id: i64) -> Result<u64, OrderStoreError> {
    u64::try_from(id)
        .map_err(|_| OrderStoreError::DatabaseError(format!("Negative identifier: {id}")))
}

fn row_to_item(row: &PgRow) -> Result<Item, OrderStoreError> {
    Ok(Item {
        id: ItemId::new(from_db_id(row.try_get("id").map_err(store_error)?)?),
        name: row.try_get("name").map_err(store_error)?,
        stock: row.try_get("stock").map_err(store_error)?,
        price_cents: row.try_get("price_cents").map_err(store_error)?,
        created_at: row.try_get("created_at").map_err(store_error)?,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order, OrderStoreError> {
    let status: String = row.try_get("status").map_err(store_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(store_error)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(store_error)?;

    Ok(Order {
        id: OrderId::new(row.try_get("id").map_err(store_error)?),
        client_id: ClientId::new(from_db_id(row.try_get("client_id").map_err(store_error)?)?),
        item_id: ItemId::new(from_db_id(row.try_get("item_id").map_err(store_error)?)?),
        status: OrderStatus::parse(&status).ok_or_else(|| {
            OrderStoreError::DatabaseError(format!("Invalid order status: {status}"))
        })?,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_transient() {
        assert!(matches!(
            store_error(sqlx::Error::PoolTimedOut),
            OrderStoreError::Unavailable(_)
        ));
        assert!(matches!(
            store_error(sqlx::Error::RowNotFound),
            OrderStoreError::DatabaseError(_)
        ));
    }

    #[test]
    fn retryable_sqlstates_are_transient() {
        assert!(is_transient_sqlstate("40001"));
        assert!(is_transient_sqlstate("40P01"));
        assert!(is_transient_sqlstate("57P01"));
        assert!(is_transient_sqlstate("08006"));
        assert!(!is_transient_sqlstate("23505"));
        assert!(!is_transient_sqlstate("22003"));
        assert!(!is_transient_sqlstate(""));
    }

    #[test]
    fn identifiers_outside_bigint_are_rejected() {
        assert_eq!(to_db_id(42).unwrap(), 42);
        assert!(to_db_id(u64::MAX).is_err());
        assert!(from_db_id(-1).is_err());
    }
}
