//! Tunables for the admission and reconciliation paths.

use crate::retry::RetryPolicy;
use flash_sale_core::rate_limiter::RateLimitPolicy;
use std::time::Duration;

/// Admission controller configuration.
///
/// # Default Values
///
/// - `rate_limit_quota`: 1 request per window
/// - `rate_limit_window`: 1 second
/// - `operation_timeout`: 3 seconds per cache/queue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Requests permitted per (client, item) per window
    pub rate_limit_quota: u32,
    /// Fixed window length
    pub rate_limit_window: Duration,
    /// Budget for each individual cache or queue call
    pub operation_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit_quota: 1,
            rate_limit_window: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(3),
        }
    }
}

impl AdmissionConfig {
    /// The rate-limit policy passed to the limiter on every check.
    #[must_use]
    pub const fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.rate_limit_quota, self.rate_limit_window)
    }

    /// Start a builder from the defaults.
    #[must_use]
    pub fn builder() -> AdmissionConfigBuilder {
        AdmissionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AdmissionConfig`].
#[derive(Debug, Clone)]
pub struct AdmissionConfigBuilder {
    config: AdmissionConfig,
}

impl AdmissionConfigBuilder {
    /// Requests permitted per window.
    #[must_use]
    pub const fn rate_limit_quota(mut self, quota: u32) -> Self {
        self.config.rate_limit_quota = quota;
        self
    }

    /// Fixed window length.
    #[must_use]
    pub const fn rate_limit_window(mut self, window: Duration) -> Self {
        self.config.rate_limit_window = window;
        self
    }

    /// Budget for each cache or queue call.
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> AdmissionConfig {
        self.config
    }
}

/// Reconciliation consumer configuration.
///
/// # Default Values
///
/// - `workers`: 1
/// - `retry_policy`: [`RetryPolicy::default`]
/// - `resubscribe_delay`: 5 seconds
/// - `operation_timeout`: 10 seconds per durable-store call
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationConfig {
    /// Concurrent workers draining the queue
    pub workers: usize,
    /// In-process retry of transient store failures before a nack
    pub retry_policy: RetryPolicy,
    /// Wait before re-subscribing after a stream ends or fails
    pub resubscribe_delay: Duration,
    /// Budget for each durable-store call
    pub operation_timeout: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            retry_policy: RetryPolicy::default(),
            resubscribe_delay: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconciliationConfig {
    /// Start a builder from the defaults.
    #[must_use]
    pub fn builder() -> ReconciliationConfigBuilder {
        ReconciliationConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ReconciliationConfig`].
#[derive(Debug, Clone)]
pub struct ReconciliationConfigBuilder {
    config: ReconciliationConfig,
}

impl ReconciliationConfigBuilder {
    /// Number of concurrent workers (at least 1).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    /// Retry policy for transient store failures.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Delay before re-subscribing.
    #[must_use]
    pub const fn resubscribe_delay(mut self, delay: Duration) -> Self {
        self.config.resubscribe_delay = delay;
        self
    }

    /// Budget for each durable-store call.
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> ReconciliationConfig {
        self.config
    }
}
