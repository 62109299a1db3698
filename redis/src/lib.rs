//! # Flash Sale Redis
//!
//! `Redis` implementations of the reservation cache and the rate limiter.
//!
//! Both types wrap a `redis::aio::ConnectionManager`, which reconnects on
//! its own after network failures. Build one manager at process start and
//! share it through [`RedisReservationStore::from_connection_manager`] and
//! [`RedisRateLimiter::from_connection_manager`].

pub mod keys;
pub mod rate_limiter;
pub mod reservation;

pub use rate_limiter::RedisRateLimiter;
pub use reservation::RedisReservationStore;
