//! Seeds reservation counters from the durable store.
//!
//! Runs once at process start, before admission traffic is accepted, and
//! whenever the catalog creates an item. Seeding is fill-if-absent: a counter
//! that already exists reflects live reservations and is never overwritten.

use crate::timeout::bounded;
use flash_sale_core::order_store::OrderStore;
use flash_sale_core::reservation_store::ReservationStore;
use flash_sale_core::{InfrastructureError, Item};
use std::sync::Arc;
use std::time::Duration;

/// Counts from one bootstrap pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Items whose counter was created by this pass
    pub seeded: usize,
    /// Items whose counter already existed and was left untouched
    pub already_present: usize,
}

impl BootstrapReport {
    /// Total items visited.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.seeded + self.already_present
    }
}

/// Copies durable stock into the reservation cache.
#[derive(Clone)]
pub struct StockBootstrapper {
    orders: Arc<dyn OrderStore>,
    reservations: Arc<dyn ReservationStore>,
    operation_timeout: Duration,
}

impl StockBootstrapper {
    /// Create a bootstrapper.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        reservations: Arc<dyn ReservationStore>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            reservations,
            operation_timeout,
        }
    }

    /// Seed a counter for every item that does not have one yet.
    ///
    /// # Errors
    ///
    /// Returns the first [`InfrastructureError`] from either store. The
    /// process should refuse to start admitting traffic in that case.
    pub async fn sync_stock_to_cache(&self) -> Result<BootstrapReport, InfrastructureError> {
        let items = bounded("list_items", self.operation_timeout, self.orders.list_items()).await?;

        let mut report = BootstrapReport::default();
        for item in &items {
            if self.seed(item).await? {
                report.seeded += 1;
            } else {
                report.already_present += 1;
            }
        }

        tracing::info!(
            seeded = report.seeded,
            already_present = report.already_present,
            "Stock synchronised to reservation cache"
        );

        Ok(report)
    }

    /// Seed the counter for a freshly created item.
    ///
    /// Returns `true` if the counter was created.
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError`] if the reservation store fails.
    pub async fn register_item(&self, item: &Item) -> Result<bool, InfrastructureError> {
        self.seed(item).await
    }

    async fn seed(&self, item: &Item) -> Result<bool, InfrastructureError> {
        let seeded = bounded(
            "seed_stock_if_absent",
            self.operation_timeout,
            self.reservations.seed_stock_if_absent(item.id, item.stock),
        )
        .await?;

        if seeded {
            tracing::debug!(item_id = %item.id, stock = item.stock, "Seeded stock counter");
        } else {
            tracing::debug!(item_id = %item.id, "Stock counter already present");
        }

        Ok(seeded)
    }
}
