//! # Flash Sale Server
//!
//! Process bootstrap for the flash sale pipeline: configuration, wiring of
//! the Redis, `RedPanda` and `PostgreSQL` adapters, stock seeding, the
//! reconciliation workers and graceful shutdown.
//!
//! HTTP routing is not part of this crate. A transport layer embeds
//! [`Application`] and calls [`Application::admission`] per request, mapping
//! errors with `SeckillError::status_code`.

pub mod config;
pub mod lifecycle;

pub use config::Config;
pub use lifecycle::{Application, shutdown_signal};
