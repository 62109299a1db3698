//! Redis-based fixed-window rate limiter.
//!
//! # Algorithm
//!
//! One atomic pipeline per request:
//! 1. `SET ratelimit:... 0 PX {window} NX`: open a window if none is open
//! 2. `INCR ratelimit:...`: count this request
//!
//! Creating the key and attaching its expiry in the same command means a
//! counter can never be left without a TTL. The window resets when the key
//! expires.

use crate::keys;
use flash_sale_core::rate_limiter::{RateLimitDecision, RateLimitPolicy, RateLimiter};
use flash_sale_core::{ClientId, InfrastructureError, ItemId};
use redis::aio::ConnectionManager;
use redis::Client;
use std::future::Future;
use std::pin::Pin;

/// `Redis`-based rate limiter keyed by `(client, item)`.
///
/// # Example
///
/// ```no_run
/// use flash_sale_redis::RedisRateLimiter;
/// use flash_sale_core::rate_limiter::{RateLimitPolicy, RateLimiter};
/// use flash_sale_core::{ClientId, ItemId};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = RedisRateLimiter::new("redis://127.0.0.1:6379").await?;
///
/// let policy = RateLimitPolicy::new(1, Duration::from_secs(1));
/// let decision = limiter.allow(ClientId::new(7), ItemId::new(1), policy).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisRateLimiter {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisRateLimiter {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError::Cache`] if connection to `Redis` fails.
    pub async fn new(redis_url: &str) -> Result<Self, InfrastructureError> {
        let client = Client::open(redis_url).map_err(|e| {
            InfrastructureError::Cache(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            InfrastructureError::Cache(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }

    /// Share an existing connection manager.
    #[must_use]
    pub const fn from_connection_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

impl RateLimiter for RedisRateLimiter {
    fn allow(
        &self,
        client_id: ClientId,
        item_id: ItemId,
        policy: RateLimitPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<RateLimitDecision, InfrastructureError>> + Send + '_>>
    {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = keys::rate_limit_key(client_id, item_id);
            let window_ms = u64::try_from(policy.window.as_millis())
                .unwrap_or(u64::MAX)
                .max(1);

            // Note: .ignore() means "don't return this value", NOT "ignore errors".
            let (count,): (u64,) = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(&key)
                .arg(0)
                .arg("PX")
                .arg(window_ms)
                .arg("NX")
                .ignore()
                .incr(&key, 1)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    // Caller treats this as a refusal, never as a permit.
                    tracing::error!(
                        error = %e,
                        client_id = %client_id,
                        item_id = %item_id,
                        "Redis pipeline failed during rate limit check"
                    );
                    InfrastructureError::Cache(format!("Failed to check rate limit: {e}"))
                })?;

            let decision = RateLimitDecision::from_count(count, policy.quota);
            if !decision.permitted {
                tracing::debug!(
                    rate_limit_exceeded = true,
                    client_id = %client_id,
                    item_id = %item_id,
                    attempts = count,
                    quota = policy.quota,
                    window_ms,
                    "Rate limit exceeded"
                );
            }

            Ok(decision)
        })
    }
}
