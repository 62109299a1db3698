//! Anomaly log for intents the durable store could not apply.
//!
//! An anomaly means the reservation cache admitted an intent that durable
//! stock could not cover: cache/database drift or a bug. The consumer acks
//! the message (retrying cannot help), so this table is the only record an
//! operator has for follow-up.

use chrono::{DateTime, Utc};
use flash_sale_core::order_store::OrderStoreError;
use flash_sale_core::{ClientId, ItemId, ReconciliationAnomaly};
use sqlx::{PgPool, Row};

use crate::{from_db_id, store_error, to_db_id};

/// Status of an anomaly entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyStatus {
    /// Awaiting investigation
    Pending,
    /// Investigated and fixed (e.g. cache counter corrected)
    Resolved,
    /// Investigated, nothing to do
    Discarded,
}

impl AnomalyStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, OrderStoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(OrderStoreError::DatabaseError(format!(
                "Invalid anomaly status: {s}"
            ))),
        }
    }
}

/// An entry in the anomaly log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyEntry {
    /// Unique identifier for this entry
    pub id: i64,
    /// Client of the unapplied intent
    pub client_id: ClientId,
    /// Item of the unapplied intent
    pub item_id: ItemId,
    /// What was observed
    pub reason: String,
    /// Current status
    pub status: AnomalyStatus,
    /// When the consumer recorded it
    pub detected_at: DateTime<Utc>,
    /// When it was closed (if applicable)
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who closed it
    pub resolved_by: Option<String>,
    /// Notes about the resolution
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed anomaly log.
///
/// # Example
///
/// ```no_run
/// use flash_sale_postgres::AnomalyLog;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let log = AnomalyLog::new(pool);
///
/// for entry in log.list_pending(100).await? {
///     println!("item {} over-admitted for client {}", entry.item_id, entry.client_id);
///     log.resolve(entry.id, "ops", Some("cache counter corrected")).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AnomalyLog {
    pool: PgPool,
}

impl AnomalyLog {
    /// Create an anomaly log over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an anomaly.
    ///
    /// Returns the id of the new entry.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the insert fails.
    pub async fn add_entry(&self, anomaly: &ReconciliationAnomaly) -> Result<i64, OrderStoreError> {
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO reconciliation_anomalies (client_id, item_id, reason)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(to_db_id(anomaly.intent.client_id.get())?)
        .bind(to_db_id(anomaly.intent.item_id.get())?)
        .bind(&anomaly.reason)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        tracing::warn!(
            anomaly_id = id.0,
            client_id = %anomaly.intent.client_id,
            item_id = %anomaly.intent.item_id,
            reason = %anomaly.reason,
            "Anomaly recorded"
        );

        metrics::counter!("seckill.anomaly_log.added").increment(1);

        Ok(id.0)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<AnomalyEntry>, OrderStoreError> {
        self.list_by_status(AnomalyStatus::Pending, limit).await
    }

    /// List entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: AnomalyStatus,
        limit: usize,
    ) -> Result<Vec<AnomalyEntry>, OrderStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT id, client_id, item_id, reason, status,
                   detected_at, resolved_at, resolved_by, resolution_notes
            FROM reconciliation_anomalies
            WHERE status = $1
            ORDER BY detected_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Count pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, OrderStoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM reconciliation_anomalies WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(count)
    }

    /// Close an entry as resolved.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the update fails.
    pub async fn resolve(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), OrderStoreError> {
        self.close(id, AnomalyStatus::Resolved, resolved_by, notes).await
    }

    /// Close an entry as discarded.
    ///
    /// # Errors
    ///
    /// Returns [`OrderStoreError`] if the update fails.
    pub async fn discard(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), OrderStoreError> {
        self.close(id, AnomalyStatus::Discarded, resolved_by, notes).await
    }

    async fn close(
        &self,
        id: i64,
        status: AnomalyStatus,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), OrderStoreError> {
        sqlx::query(
            r"
            UPDATE reconciliation_anomalies
            SET status = $1,
                resolved_at = NOW(),
                resolved_by = $2,
                resolution_notes = $3
            WHERE id = $4
            ",
        )
        .bind(status.as_str())
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        tracing::info!(
            anomaly_id = id,
            status = status.as_str(),
            resolved_by,
            "Anomaly closed"
        );

        Ok(())
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<AnomalyEntry, OrderStoreError> {
        let status: String = row.try_get("status").map_err(store_error)?;

        Ok(AnomalyEntry {
            id: row.try_get("id").map_err(store_error)?,
            client_id: ClientId::new(from_db_id(row.try_get("client_id").map_err(store_error)?)?),
            item_id: ItemId::new(from_db_id(row.try_get("item_id").map_err(store_error)?)?),
            reason: row.try_get("reason").map_err(store_error)?,
            status: AnomalyStatus::parse(&status)?,
            detected_at: row.try_get("detected_at").map_err(store_error)?,
            resolved_at: row.try_get("resolved_at").map_err(store_error)?,
            resolved_by: row.try_get("resolved_by").map_err(store_error)?,
            resolution_notes: row.try_get("resolution_notes").map_err(store_error)?,
        })
    }
}
