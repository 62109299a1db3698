//! Bounded waits on cache, queue and store calls.
//!
//! Every collaborator call may block on network I/O. A call that does not
//! finish within its budget becomes [`InfrastructureError::Timeout`]: a
//! retryable failure, never a success and never a definitive rejection.

use flash_sale_core::InfrastructureError;
use std::future::Future;
use std::time::Duration;

/// Await `future` for at most `budget`.
///
/// # Errors
///
/// Returns the future's own error, or [`InfrastructureError::Timeout`]
/// naming `operation` when the budget is exceeded.
pub async fn bounded<T, E, F>(
    operation: &'static str,
    budget: Duration,
    future: F,
) -> Result<T, InfrastructureError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<InfrastructureError>,
{
    match tokio::time::timeout(budget, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(
                operation,
                budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                "Operation timed out"
            );
            Err(InfrastructureError::Timeout {
                operation,
                after: budget,
            })
        },
    }
}
