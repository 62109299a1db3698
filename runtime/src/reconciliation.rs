//! Reconciliation consumer: turns queued intents into durable orders.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe:
//!         loop {
//!             next delivery:
//!                 - decode (poison → ack)
//!                 - reconcile with in-process retry of transient errors
//!                 - ack on a definitive outcome or a rejected intent
//!                 - nack when the store stays unavailable
//!                 - check shutdown signal
//!         }
//!         stream ended or subscribe failed:
//!             wait resubscribe_delay, retry
//! }
//! ```
//!
//! # Idempotency
//!
//! Delivery is at-least-once. The consumer never trusts the broker's
//! redelivery flag; it relies on the durable store alone:
//!
//! 1. an existing order for `(client, item)` short-circuits to an ack
//! 2. otherwise one transaction performs the insert and the conditional
//!    decrement, guarded by the `(client, item)` uniqueness constraint
//!
//! Any number of workers may therefore drain the same queue.

use crate::config::ReconciliationConfig;
use crate::retry::retry_transient;
use crate::timeout::bounded;
use flash_sale_core::intent_queue::{IntentDelivery, IntentQueue, IntentStream, Settlement};
use flash_sale_core::order_store::{OrderStore, PlaceOrderOutcome};
use flash_sale_core::{InfrastructureError, Order, ReconciliationAnomaly, SeckillIntent};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};

/// Definitive result of reconciling one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order was created and durable stock decremented.
    Created(Order),
    /// An order for this `(client, item)` already exists. Nothing changed.
    AlreadyReconciled,
    /// Durable stock was already exhausted. Logged and recorded, not retried.
    Anomaly(ReconciliationAnomaly),
}

/// Drains the intent queue into the durable store.
///
/// Cheap to clone; clones share the same store, queue and configuration.
#[derive(Clone)]
pub struct ReconciliationConsumer {
    orders: Arc<dyn OrderStore>,
    queue: Arc<dyn IntentQueue>,
    config: ReconciliationConfig,
}

impl ReconciliationConsumer {
    /// Create a consumer.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        queue: Arc<dyn IntentQueue>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            orders,
            queue,
            config,
        }
    }

    /// The configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Apply one intent to the durable store (single attempt, no retry).
    ///
    /// # Errors
    ///
    /// Returns [`InfrastructureError`] if the store fails or times out. The
    /// caller should leave the message on the queue when the error
    /// [`is_transient`](InfrastructureError::is_transient).
    pub async fn reconcile(
        &self,
        intent: SeckillIntent,
    ) -> Result<ReconcileOutcome, InfrastructureError> {
        let budget = self.config.operation_timeout;
        let (client_id, item_id) = (intent.client_id, intent.item_id);

        let existing = bounded(
            "find_order",
            budget,
            self.orders.find_order(client_id, item_id),
        )
        .await?;

        if let Some(order) = existing {
            tracing::debug!(
                client_id = %client_id,
                item_id = %item_id,
                order_id = %order.id,
                "Intent already reconciled"
            );
            metrics::counter!("seckill.reconcile.duplicate").increment(1);
            return Ok(ReconcileOutcome::AlreadyReconciled);
        }

        match bounded("place_order", budget, self.orders.place_order(&intent)).await? {
            PlaceOrderOutcome::Created(order) => {
                info!(
                    client_id = %client_id,
                    item_id = %item_id,
                    order_id = %order.id,
                    "Order created"
                );
                metrics::counter!("seckill.reconcile.created").increment(1);
                Ok(ReconcileOutcome::Created(order))
            },
            PlaceOrderOutcome::AlreadyExists => {
                // A concurrent worker committed first.
                tracing::debug!(
                    client_id = %client_id,
                    item_id = %item_id,
                    "Lost insert race to another worker"
                );
                metrics::counter!("seckill.reconcile.duplicate").increment(1);
                Ok(ReconcileOutcome::AlreadyReconciled)
            },
            PlaceOrderOutcome::StockExhausted => {
                let anomaly = ReconciliationAnomaly {
                    intent,
                    reason: "durable stock exhausted for a reserved intent".to_string(),
                };
                error!(
                    anomaly = true,
                    client_id = %client_id,
                    item_id = %item_id,
                    "Reconciliation anomaly: reservation cache and durable stock disagree"
                );
                metrics::counter!("seckill.reconcile.anomaly").increment(1);

                // A failed insert surfaces as a transient error, so the whole
                // intent is retried and re-recorded.
                bounded(
                    "record_anomaly",
                    budget,
                    self.orders.record_anomaly(&anomaly),
                )
                .await?;

                Ok(ReconcileOutcome::Anomaly(anomaly))
            },
        }
    }

    /// Process one delivery and settle it.
    ///
    /// - undecodable payload: logged and acked
    /// - definitive outcome: acked
    /// - store rejected the intent: logged, recorded as an anomaly and acked
    /// - transient failure after in-process retries: nacked
    ///
    /// Returns the settlement that was applied.
    pub async fn handle(&self, delivery: IntentDelivery) -> Settlement {
        let intent = match delivery.decode() {
            Ok(intent) => intent,
            Err(e) => {
                error!(
                    error = %e,
                    payload_len = delivery.payload().len(),
                    "Discarding undecodable intent"
                );
                metrics::counter!("seckill.reconcile.poison").increment(1);
                delivery.ack();
                return Settlement::Ack;
            },
        };

        if delivery.is_redelivery() {
            tracing::debug!(intent = %intent, "Processing redelivered intent");
        }

        let result = retry_transient(
            &self.config.retry_policy,
            "reconcile",
            || self.reconcile(intent),
            InfrastructureError::is_transient,
        )
        .await;

        match result {
            Ok(_) => {
                delivery.ack();
                Settlement::Ack
            },
            Err(e) if e.is_transient() => {
                warn!(intent = %intent, error = %e, "Reconciliation failed, returning intent to queue");
                metrics::counter!("seckill.reconcile.nack").increment(1);
                delivery.nack();
                Settlement::Nack
            },
            Err(e) => {
                // Redelivery would fail the same way and block the partition.
                error!(
                    anomaly = true,
                    intent = %intent,
                    error = %e,
                    "Durable store rejected intent, discarding"
                );
                metrics::counter!("seckill.reconcile.rejected").increment(1);
                self.record_rejection(intent, &e).await;
                delivery.ack();
                Settlement::Ack
            },
        }
    }

    /// Best effort: the intent is discarded whether or not this succeeds.
    async fn record_rejection(&self, intent: SeckillIntent, cause: &InfrastructureError) {
        let anomaly = ReconciliationAnomaly {
            intent,
            reason: format!("durable store rejected intent: {cause}"),
        };
        if let Err(e) = bounded(
            "record_anomaly",
            self.config.operation_timeout,
            self.orders.record_anomaly(&anomaly),
        )
        .await
        {
            warn!(intent = %intent, error = %e, "Failed to record rejected intent");
        }
    }

    /// Start `config.workers` workers, each with its own subscription.
    ///
    /// Every worker stops after the current delivery once `shutdown` fires
    /// (or its sender is dropped).
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let (shutdown_tx, _) = broadcast::channel(1);
    /// let handles = consumer.spawn_workers(&shutdown_tx);
    ///
    /// tokio::signal::ctrl_c().await?;
    /// let _ = shutdown_tx.send(());
    /// futures::future::join_all(handles).await;
    /// ```
    #[must_use]
    pub fn spawn_workers(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker| {
                let consumer = self.clone();
                let shutdown = shutdown.subscribe();
                let span = tracing::info_span!("reconcile_worker", worker);
                tokio::spawn(async move { consumer.run(shutdown).await }.instrument(span))
            })
            .collect()
    }

    async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Reconciliation worker started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                subscribed = self.queue.subscribe() => {
                    match subscribed {
                        Ok(stream) => {
                            info!("Subscribed to intent queue");
                            if self.drain(stream, &mut shutdown).await {
                                break;
                            }
                            warn!(
                                "Intent stream ended, resubscribing in {:?}",
                                self.config.resubscribe_delay
                            );
                        },
                        Err(e) => {
                            error!(
                                error = %e,
                                "Failed to subscribe to intent queue, retrying in {:?}",
                                self.config.resubscribe_delay
                            );
                        },
                    }
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(self.config.resubscribe_delay) => {}
            }
        }

        info!("Reconciliation worker stopped");
    }

    /// Returns `true` when shutdown was requested, `false` when the stream ended.
    async fn drain(&self, mut stream: IntentStream, shutdown: &mut broadcast::Receiver<()>) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return true,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        self.handle(delivery).await;
                    },
                    Some(Err(e)) => {
                        error!(error = %e, "Error receiving intent from stream");
                    },
                    None => return false,
                },
            }
        }
    }
}
