//! # Flash Sale Testing
//!
//! In-memory doubles for every collaborator trait in `flash-sale-core`.
//!
//! This crate provides:
//! - [`InMemoryReservationStore`] and [`InMemoryRateLimiter`]
//! - [`InMemoryIntentQueue`] with ack/nack redelivery
//! - [`InMemoryOrderStore`] with transactional `place_order`
//! - [`FixedClock`] for deterministic timestamps
//!
//! Each double carries failure injection switches so compensation, retry and
//! fail-closed paths can be exercised without live services.
//!
//! ## Example
//!
//! ```ignore
//! use flash_sale_testing::{InMemoryIntentQueue, InMemoryRateLimiter, InMemoryReservationStore};
//! use flash_sale_runtime::{AdmissionConfig, AdmissionController};
//!
//! #[tokio::test]
//! async fn test_admission() {
//!     let reservations = InMemoryReservationStore::new();
//!     reservations.set_stock(ItemId::new(1), 1);
//!
//!     let controller = AdmissionController::new(
//!         Arc::new(InMemoryRateLimiter::new()),
//!         Arc::new(reservations.clone()),
//!         Arc::new(InMemoryIntentQueue::new()),
//!         AdmissionConfig::default(),
//!     );
//!
//!     assert!(controller.start_seckill(ClientId::new(1), ItemId::new(1)).await.is_ok());
//!     assert_eq!(reservations.stock_of(ItemId::new(1)), Some(0));
//! }
//! ```

use chrono::{DateTime, Utc};
use flash_sale_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flash_sale_testing::mocks::FixedClock;
    /// use flash_sale_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// In-memory reservation cache and rate limiter
pub mod cache_mocks;

/// In-memory intent queue
pub mod queue_mocks;

/// In-memory durable store
pub mod store_mocks;

// Re-export commonly used items
pub use cache_mocks::{InMemoryRateLimiter, InMemoryReservationStore, ReservationOp};
pub use mocks::{FixedClock, test_clock};
pub use queue_mocks::InMemoryIntentQueue;
pub use store_mocks::InMemoryOrderStore;
