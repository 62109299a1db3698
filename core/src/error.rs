//! Error taxonomy for the admission and reconciliation paths.
//!
//! Only two kinds of failure ever reach a caller of `start_seckill`:
//!
//! - [`SeckillError::Rejected`]: the attempt was refused for a business
//!   reason (rate limited, already purchased, out of stock). Terminal for
//!   this attempt, not retryable.
//! - [`SeckillError::Unavailable`]: some piece of infrastructure (cache,
//!   broker, database) failed or timed out. The caller may retry. This is
//!   never collapsed into a rejection or a success.
//!
//! Compensation failures and reconciliation anomalies are internal: they are
//! logged and counted, but the client-visible attempt has already concluded
//! by the time they happen.

use crate::types::{ClientId, ItemId, SeckillIntent};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, SeckillError>;

/// Why an admission attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// Too many attempts for this (client, item) in the current window.
    RateLimited,
    /// The client already holds a reservation for this item.
    AlreadyPurchased,
    /// No stock left at the time of the attempt.
    OutOfStock,
}

impl RejectionReason {
    /// Reason string returned to clients.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate limited",
            Self::AlreadyPurchased => "already purchased",
            Self::OutOfStock => "out of stock",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache, broker or database failure.
///
/// Everything except [`StoreRejected`](Self::StoreRejected) and
/// [`Serialization`](Self::Serialization) is transient: the same operation
/// may succeed when retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InfrastructureError {
    /// The reservation cache / rate-limit counter store failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// The intent queue refused or lost a publish.
    #[error("Queue error: {0}")]
    Queue(String),

    /// The durable store could not be reached.
    #[error("Store error: {0}")]
    Store(String),

    /// The durable store rejected the operation itself. Retrying the same
    /// input cannot succeed.
    #[error("Store rejected operation: {0}")]
    StoreRejected(String),

    /// An operation did not complete within its time budget.
    #[error("Operation '{operation}' timed out after {after:?}")]
    Timeout {
        /// Name of the operation that timed out
        operation: &'static str,
        /// The budget that was exceeded
        after: Duration,
    },

    /// A message could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A background task running the attempt was lost.
    #[error("Task error: {0}")]
    Task(String),
}

impl InfrastructureError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::StoreRejected(_) | Self::Serialization(_))
    }
}

/// Errors returned by `AdmissionController::start_seckill`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeckillError {
    /// The attempt was refused. Not retryable.
    #[error("Admission rejected: {0}")]
    Rejected(RejectionReason),

    /// Infrastructure failed. Retryable.
    #[error("Infrastructure unavailable: {0}")]
    Unavailable(#[from] InfrastructureError),
}

impl SeckillError {
    /// Whether the caller may retry the same attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// The rejection reason, if this is a rejection.
    #[must_use]
    pub const fn rejection(&self) -> Option<RejectionReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            Self::Unavailable(_) => None,
        }
    }

    /// Reason string for the transport layer's response body.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Rejected(reason) => reason.as_str().to_string(),
            Self::Unavailable(e) => e.to_string(),
        }
    }

    /// HTTP status code the transport layer should answer with.
    ///
    /// Rejections map to 400; infrastructure failures to 503 so clients and
    /// load balancers know to retry.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Rejected(_) => 400,
            Self::Unavailable(_) => 503,
        }
    }
}

impl From<RejectionReason> for SeckillError {
    fn from(reason: RejectionReason) -> Self {
        Self::Rejected(reason)
    }
}

/// Which rollback step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationStep {
    /// Returning the reserved unit to the stock counter.
    RestoreStock,
    /// Removing the purchase marker.
    ClearMarker,
    /// The stock decrement itself failed; whether it applied is unknown.
    UnknownReservation,
}

impl CompensationStep {
    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RestoreStock => "restore_stock",
            Self::ClearMarker => "clear_marker",
            Self::UnknownReservation => "unknown_reservation",
        }
    }
}

/// A rollback that could not be completed.
///
/// Leaves the reservation cache needing external reconciliation. Never
/// retried automatically (a retried increment could double-restore stock)
/// and never returned to clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Compensation step '{}' failed for client {client_id} / item {item_id}: {source}", step.as_str())]
pub struct CompensationFailure {
    /// Client whose attempt was being unwound
    pub client_id: ClientId,
    /// Item whose counter was being restored
    pub item_id: ItemId,
    /// The step that failed
    pub step: CompensationStep,
    /// Underlying failure
    pub source: InfrastructureError,
}

/// The durable conditional decrement affected zero rows.
///
/// The reservation layer had already enforced the stock limit, so this
/// signals drift between cache and database (or a bug), not a normal
/// rejection. The message is acknowledged and not retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Reconciliation anomaly for {intent}: {reason}")]
pub struct ReconciliationAnomaly {
    /// The intent that could not be applied
    pub intent: SeckillIntent,
    /// What was observed
    pub reason: String,
}
