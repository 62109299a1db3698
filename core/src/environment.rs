//! Injected environment traits.
//!
//! All time reads go through [`Clock`] so tests can pin timestamps.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}
