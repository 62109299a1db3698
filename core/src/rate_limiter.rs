//! Per-(client, item) request rate limiting.
//!
//! # Algorithm
//!
//! Fixed window counter:
//! 1. If no counter exists for `(client, item)`, create it with the window
//!    expiry attached
//! 2. Increment the counter
//! 3. If the new value exceeds the quota, deny with `remaining = 0`
//! 4. Otherwise permit with `remaining = quota - count`
//!
//! Windows reset by expiry alone; there is no other state machine.
//!
//! # Failure policy
//!
//! A counter store failure is returned as an [`InfrastructureError`]. The
//! admission path treats that as a retryable refusal (fail closed), never as
//! a permit.

use crate::error::InfrastructureError;
use crate::types::{ClientId, ItemId};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Quota and window applied to one `(client, item)` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests permitted per window
    pub quota: u32,
    /// Fixed window length, attached when the counter is created
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(quota: u32, window: Duration) -> Self {
        Self { quota, window }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether this request may proceed
    pub permitted: bool,
    /// Requests left in the current window (0 when denied)
    pub remaining: u32,
}

impl RateLimitDecision {
    /// Derive the decision from a post-increment window count.
    ///
    /// Shared by every backend so the arithmetic lives in one place.
    #[must_use]
    pub const fn from_count(count: u64, quota: u32) -> Self {
        if count > quota as u64 {
            Self {
                permitted: false,
                remaining: 0,
            }
        } else {
            #[allow(clippy::cast_possible_truncation)] // count <= quota here
            let remaining = quota - count as u32;
            Self {
                permitted: true,
                remaining,
            }
        }
    }
}

/// Rate limiter keyed by `(client, item)`.
///
/// # Dyn Compatibility
///
/// Returns boxed futures so the admission controller can hold an
/// `Arc<dyn RateLimiter>` injected at process start.
pub trait RateLimiter: Send + Sync {
    /// Count this request and decide whether it may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] if the counter store fails.
    fn allow(
        &self,
        client_id: ClientId,
        item_id: ItemId,
        policy: RateLimitPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<RateLimitDecision, InfrastructureError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_in_window_is_permitted() {
        assert_eq!(
            RateLimitDecision::from_count(1, 1),
            RateLimitDecision {
                permitted: true,
                remaining: 0
            }
        );
        assert_eq!(RateLimitDecision::from_count(1, 5).remaining, 4);
    }

    #[test]
    fn requests_over_quota_are_denied() {
        let decision = RateLimitDecision::from_count(2, 1);
        assert!(!decision.permitted);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn request_at_quota_is_still_permitted() {
        let decision = RateLimitDecision::from_count(3, 3);
        assert!(decision.permitted);
        assert_eq!(decision.remaining, 0);
    }
}
