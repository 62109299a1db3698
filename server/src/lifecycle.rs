//! Process lifecycle: wiring, startup and graceful shutdown.
//!
//! 1. **Startup**: connect `PostgreSQL` (running migrations), Redis and
//!    `RedPanda`, then seed reservation counters from durable stock
//! 2. **Runtime**: reconciliation workers drain the intent queue while the
//!    transport layer calls [`Application::admission`]
//! 3. **Shutdown**: broadcast to every worker, then wait for each one up to
//!    the configured timeout
//!
//! Seeding failure aborts startup: admitting traffic against missing
//! counters would reject every request as out of stock.

use crate::config::Config;
use flash_sale_core::intent_queue::IntentQueue;
use flash_sale_core::order_store::OrderStore;
use flash_sale_core::rate_limiter::RateLimiter;
use flash_sale_core::reservation_store::ReservationStore;
use flash_sale_postgres::PostgresOrderStore;
use flash_sale_redis::{RedisRateLimiter, RedisReservationStore};
use flash_sale_redpanda::RedpandaIntentQueue;
use flash_sale_runtime::{AdmissionController, ReconciliationConsumer, StockBootstrapper};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A fully wired, seeded service ready to run.
pub struct Application {
    admission: AdmissionController,
    reconciliation: ReconciliationConsumer,
    bootstrapper: StockBootstrapper,
    orders: PostgresOrderStore,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Connect every backing service and seed the reservation cache.
    ///
    /// # Errors
    ///
    /// Returns an error if any connection, the migrations or the stock
    /// seeding fail.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        info!("Connecting to durable store...");
        let orders = PostgresOrderStore::new(&config.postgres.url, config.postgres.max_connections)
            .await?;
        orders.migrate().await?;
        info!("Durable store connected and migrated");

        info!("Connecting to reservation cache...");
        let client = redis::Client::open(config.redis.url.as_str())?;
        let conn_manager = ConnectionManager::new(client).await?;
        let reservations: Arc<dyn ReservationStore> = Arc::new(
            RedisReservationStore::from_connection_manager(conn_manager.clone()),
        );
        let rate_limiter: Arc<dyn RateLimiter> =
            Arc::new(RedisRateLimiter::from_connection_manager(conn_manager));
        info!("Reservation cache connected");

        info!("Connecting to intent queue...");
        let queue: Arc<dyn IntentQueue> = Arc::new(
            RedpandaIntentQueue::builder()
                .brokers(&config.redpanda.brokers)
                .topic(&config.redpanda.topic)
                .consumer_group(&config.redpanda.consumer_group)
                .build()?,
        );
        info!(topic = %config.redpanda.topic, "Intent queue connected");

        let durable: Arc<dyn OrderStore> = Arc::new(orders.clone());

        let bootstrapper = StockBootstrapper::new(
            Arc::clone(&durable),
            Arc::clone(&reservations),
            config.operation_timeout(),
        );
        let report = bootstrapper.sync_stock_to_cache().await?;
        info!(
            seeded = report.seeded,
            already_present = report.already_present,
            "Reservation cache seeded"
        );

        let admission = AdmissionController::new(
            rate_limiter,
            reservations,
            Arc::clone(&queue),
            config.admission_config(),
        );
        let reconciliation =
            ReconciliationConsumer::new(durable, queue, config.reconciliation_config());

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            admission,
            reconciliation,
            bootstrapper,
            orders,
            shutdown_tx,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// The entry point the transport layer calls for each purchase attempt.
    #[must_use]
    pub fn admission(&self) -> AdmissionController {
        self.admission.clone()
    }

    /// Hook for the catalog layer after it creates an item.
    #[must_use]
    pub fn bootstrapper(&self) -> StockBootstrapper {
        self.bootstrapper.clone()
    }

    /// The durable store, for catalog and anomaly-log access.
    #[must_use]
    pub fn orders(&self) -> PostgresOrderStore {
        self.orders.clone()
    }

    /// Run reconciliation workers until `shutdown` completes.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        let handles = self.reconciliation.spawn_workers(&self.shutdown_tx);
        info!(workers = handles.len(), "Reconciliation workers started");

        shutdown.await;
        info!("Shutdown requested, stopping workers...");

        let _ = self.shutdown_tx.send(());
        await_shutdown(handles, self.shutdown_timeout).await;

        info!("Graceful shutdown complete");
    }
}

/// Wait for every worker, giving each one `timeout` to finish.
async fn await_shutdown(handles: Vec<JoinHandle<()>>, timeout: Duration) {
    for (idx, handle) in handles.into_iter().enumerate() {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(worker = idx, "Worker stopped gracefully"),
            Ok(Err(e)) => warn!(worker = idx, error = %e, "Worker task failed"),
            Err(_) => warn!(worker = idx, "Worker shutdown timed out"),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed, that branch never completes; the
/// other one still works.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
