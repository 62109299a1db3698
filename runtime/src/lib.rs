//! # Flash Sale Runtime
//!
//! The moving parts of the admission & reservation pipeline, written against
//! the collaborator traits in `flash-sale-core`.
//!
//! ## Core Components
//!
//! - **[`AdmissionController`]**: rate limit, duplicate gate, reservation and
//!   publication, with compensation on every failure path
//! - **[`ReconciliationConsumer`]**: drains the intent queue into the durable
//!   store, idempotently
//! - **[`StockBootstrapper`]**: seeds reservation counters from durable stock
//!
//! ## Example
//!
//! ```ignore
//! use flash_sale_runtime::{AdmissionController, AdmissionConfig};
//!
//! let controller = AdmissionController::new(
//!     rate_limiter,
//!     reservations,
//!     queue,
//!     AdmissionConfig::default(),
//! );
//!
//! let admission = controller.start_seckill(client_id, item_id).await?;
//! ```

/// Admission controller state machine
pub mod admission;

/// Stock bootstrap from the durable store
pub mod bootstrap;

/// Runtime configuration
pub mod config;

/// Reconciliation consumer
pub mod reconciliation;

/// Retry logic with exponential backoff
pub mod retry;

/// Time budgets for collaborator calls
pub mod timeout;

pub use admission::{Admission, AdmissionController, AdmissionState};
pub use bootstrap::{BootstrapReport, StockBootstrapper};
pub use config::{AdmissionConfig, ReconciliationConfig};
pub use reconciliation::{ReconcileOutcome, ReconciliationConsumer};
pub use retry::RetryPolicy;
