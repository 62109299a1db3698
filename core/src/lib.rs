//! # Flash Sale Core
//!
//! Core traits and types for the flash sale admission & reservation pipeline.
//!
//! This crate defines the contracts every other crate in the workspace builds
//! on. It contains no I/O of its own.
//!
//! ## Core Concepts
//!
//! - **Reservation**: a provisional, low-latency claim on one unit of stock,
//!   held in a shared cache ([`reservation_store::ReservationStore`])
//! - **Intent**: the message announcing a reservation
//!   ([`types::SeckillIntent`]), carried by an at-least-once queue
//!   ([`intent_queue::IntentQueue`])
//! - **Reconciliation**: idempotent durable persistence of an intent
//!   ([`order_store::OrderStore`])
//! - **Compensation**: undoing a reservation after a later step fails
//!
//! ## Architecture Principles
//!
//! - All coordination happens through single-key atomic cache primitives
//! - Collaborators are injected as trait objects, never ambient globals
//! - No overselling; durable state is eventually consistent and idempotent
//!
//! ## Example
//!
//! ```ignore
//! use flash_sale_core::{ClientId, ItemId, SeckillIntent};
//!
//! let intent = SeckillIntent::new(ClientId::new(1), ItemId::new(42));
//! queue.publish(&intent).await?;
//! ```

pub mod environment;
pub mod error;
pub mod intent_queue;
pub mod order_store;
pub mod rate_limiter;
pub mod reservation_store;
pub mod types;

pub use error::{
    CompensationFailure, CompensationStep, InfrastructureError, ReconciliationAnomaly,
    RejectionReason, SeckillError,
};
pub use types::{ClientId, Item, ItemId, Order, OrderId, OrderStatus, SeckillIntent};
