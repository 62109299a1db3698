//! Admission controller: the externally invoked `start_seckill` entry point.
//!
//! # State machine
//!
//! ```text
//! START ──rate limit──► RATE_CHECKED ──SET NX──► DUP_CHECKED ──DECR──► RESERVED ──publish──► PUBLISHED
//!   │                        │                        │                    │
//!   ▼                        ▼                        ▼                    ▼
//! REJECTED              REJECTED              COMPENSATED →          COMPENSATED →
//! (rate limited)        (already purchased)   REJECTED (out of stock) Unavailable (retryable)
//! ```
//!
//! Every step is a single-key atomic primitive on the reservation cache; the
//! controller takes no locks. Cross-key consistency comes from ordering (the
//! duplicate gate runs before stock is touched) and from compensation (each
//! later failure undoes the earlier steps).
//!
//! # Cancellation
//!
//! Once the rate-limit check passes, the remaining steps run in a detached
//! task. Dropping the caller's future stops the caller's *wait*, not the
//! attempt: a unit that was reserved is always either published or released.

use crate::config::AdmissionConfig;
use crate::timeout::bounded;
use flash_sale_core::intent_queue::IntentQueue;
use flash_sale_core::rate_limiter::RateLimiter;
use flash_sale_core::reservation_store::ReservationStore;
use flash_sale_core::{
    ClientId, CompensationFailure, CompensationStep, InfrastructureError, ItemId, RejectionReason,
    SeckillError, SeckillIntent,
};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// States of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    /// Nothing checked yet
    Start,
    /// Rate limiter permitted the request
    RateChecked,
    /// This attempt created the purchase marker
    DupChecked,
    /// A unit of stock is held by this attempt
    Reserved,
    /// The intent is on the queue (terminal success)
    Published,
    /// Refused for a business reason (terminal)
    Rejected,
    /// Earlier steps were rolled back after a failure (terminal)
    Compensated,
}

impl fmt::Display for AdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::RateChecked => "RATE_CHECKED",
            Self::DupChecked => "DUP_CHECKED",
            Self::Reserved => "RESERVED",
            Self::Published => "PUBLISHED",
            Self::Rejected => "REJECTED",
            Self::Compensated => "COMPENSATED",
        };
        f.write_str(name)
    }
}

/// A successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The intent now on the queue
    pub intent: SeckillIntent,
    /// Counter value right after this attempt's decrement
    pub stock_remaining: i64,
    /// Requests left for this (client, item) in the current window
    pub rate_limit_remaining: u32,
}

/// Orchestrates rate limit → duplicate gate → reservation → publication.
///
/// Cheap to clone; every clone shares the same injected collaborators.
///
/// # Example
///
/// ```rust,ignore
/// let controller = AdmissionController::new(limiter, reservations, queue, AdmissionConfig::default());
///
/// match controller.start_seckill(ClientId::new(7), ItemId::new(1)).await {
///     Ok(admission) => respond(200, admission),
///     Err(err) => respond(err.status_code(), err.reason()),
/// }
/// ```
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Collaborators>,
}

struct Collaborators {
    rate_limiter: Arc<dyn RateLimiter>,
    reservations: Arc<dyn ReservationStore>,
    queue: Arc<dyn IntentQueue>,
    config: AdmissionConfig,
}

impl AdmissionController {
    /// Create a controller over injected collaborators.
    #[must_use]
    pub fn new(
        rate_limiter: Arc<dyn RateLimiter>,
        reservations: Arc<dyn ReservationStore>,
        queue: Arc<dyn IntentQueue>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Collaborators {
                rate_limiter,
                reservations,
                queue,
                config,
            }),
        }
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.inner.config
    }

    /// Attempt to buy one unit of `item_id` for `client_id`.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::Rejected`] with [`RejectionReason::RateLimited`],
    ///   [`RejectionReason::AlreadyPurchased`] or [`RejectionReason::OutOfStock`]
    /// - [`SeckillError::Unavailable`] if the cache or queue failed or timed
    ///   out; any reservation made by this attempt has been released
    pub async fn start_seckill(
        &self,
        client_id: ClientId,
        item_id: ItemId,
    ) -> Result<Admission, SeckillError> {
        let inner = &self.inner;
        transition(client_id, item_id, AdmissionState::Start);

        let decision = bounded(
            "rate_limit",
            inner.config.operation_timeout,
            inner
                .rate_limiter
                .allow(client_id, item_id, inner.config.rate_limit_policy()),
        )
        .await
        .map_err(|e| unavailable(client_id, item_id, AdmissionState::Start, e))?;

        if !decision.permitted {
            return Err(reject(client_id, item_id, RejectionReason::RateLimited));
        }
        transition(client_id, item_id, AdmissionState::RateChecked);

        // From here on the attempt mutates shared state, so it must run to
        // completion even if the caller stops waiting.
        let task = Arc::clone(inner);
        let span = tracing::debug_span!("seckill", client_id = %client_id, item_id = %item_id);
        let handle = tokio::spawn(
            async move { task.reserve_and_publish(client_id, item_id).await }.instrument(span),
        );

        match handle.await {
            Ok(Ok((intent, stock_remaining))) => Ok(Admission {
                intent,
                stock_remaining,
                rate_limit_remaining: decision.remaining,
            }),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(unavailable(
                client_id,
                item_id,
                AdmissionState::RateChecked,
                InfrastructureError::Task(join_err.to_string()),
            )),
        }
    }
}

impl Collaborators {
    async fn reserve_and_publish(
        &self,
        client_id: ClientId,
        item_id: ItemId,
    ) -> Result<(SeckillIntent, i64), SeckillError> {
        let budget = self.config.operation_timeout;

        // Duplicate gate runs before stock is touched.
        let marked = bounded(
            "try_mark_purchased",
            budget,
            self.reservations.try_mark_purchased(client_id, item_id),
        )
        .await
        .map_err(|e| unavailable(client_id, item_id, AdmissionState::RateChecked, e))?;

        if !marked {
            return Err(reject(client_id, item_id, RejectionReason::AlreadyPurchased));
        }
        transition(client_id, item_id, AdmissionState::DupChecked);

        let remaining = match bounded(
            "decrement_stock",
            budget,
            self.reservations.decrement_stock(item_id),
        )
        .await
        {
            Ok(remaining) => remaining,
            Err(err) => {
                // The decrement may or may not have applied. Restoring stock
                // blindly could oversell, so only the marker is released.
                report_compensation_failure(&CompensationFailure {
                    client_id,
                    item_id,
                    step: CompensationStep::UnknownReservation,
                    source: err.clone(),
                });
                self.release_marker(client_id, item_id).await;
                transition(client_id, item_id, AdmissionState::Compensated);
                return Err(unavailable(client_id, item_id, AdmissionState::DupChecked, err));
            },
        };

        if remaining < 0 {
            self.compensate(client_id, item_id).await;
            return Err(reject(client_id, item_id, RejectionReason::OutOfStock));
        }
        transition(client_id, item_id, AdmissionState::Reserved);

        let intent = SeckillIntent::new(client_id, item_id);
        if let Err(err) = bounded("publish_intent", budget, self.queue.publish(&intent)).await {
            self.compensate(client_id, item_id).await;
            return Err(unavailable(client_id, item_id, AdmissionState::Reserved, err));
        }

        tracing::info!(
            client_id = %client_id,
            item_id = %item_id,
            stock_remaining = remaining,
            state = %AdmissionState::Published,
            "Seckill admitted"
        );
        metrics::counter!("seckill.admission.published").increment(1);

        Ok((intent, remaining))
    }

    /// Undo a reservation: return the unit, then release the marker.
    ///
    /// Each step is attempted exactly once. A failed step is reported and
    /// left for external reconciliation.
    async fn compensate(&self, client_id: ClientId, item_id: ItemId) {
        let budget = self.config.operation_timeout;

        if let Err(err) = bounded(
            "increment_stock",
            budget,
            self.reservations.increment_stock(item_id),
        )
        .await
        {
            report_compensation_failure(&CompensationFailure {
                client_id,
                item_id,
                step: CompensationStep::RestoreStock,
                source: err,
            });
        }

        self.release_marker(client_id, item_id).await;
        transition(client_id, item_id, AdmissionState::Compensated);
    }

    async fn release_marker(&self, client_id: ClientId, item_id: ItemId) {
        if let Err(err) = bounded(
            "clear_purchase_marker",
            self.config.operation_timeout,
            self.reservations.clear_purchase_marker(client_id, item_id),
        )
        .await
        {
            report_compensation_failure(&CompensationFailure {
                client_id,
                item_id,
                step: CompensationStep::ClearMarker,
                source: err,
            });
        }
    }
}

fn transition(client_id: ClientId, item_id: ItemId, state: AdmissionState) {
    tracing::debug!(client_id = %client_id, item_id = %item_id, state = %state, "Admission transition");
}

fn reject(client_id: ClientId, item_id: ItemId, reason: RejectionReason) -> SeckillError {
    tracing::debug!(
        client_id = %client_id,
        item_id = %item_id,
        state = %AdmissionState::Rejected,
        reason = reason.as_str(),
        "Seckill rejected"
    );
    metrics::counter!("seckill.admission.rejected", "reason" => reason.as_str()).increment(1);
    SeckillError::Rejected(reason)
}

fn unavailable(
    client_id: ClientId,
    item_id: ItemId,
    state: AdmissionState,
    err: InfrastructureError,
) -> SeckillError {
    tracing::warn!(
        client_id = %client_id,
        item_id = %item_id,
        state = %state,
        error = %err,
        "Seckill attempt failed on infrastructure"
    );
    metrics::counter!("seckill.admission.unavailable").increment(1);
    SeckillError::Unavailable(err)
}

fn report_compensation_failure(failure: &CompensationFailure) {
    tracing::error!(
        compensation_failure = true,
        client_id = %failure.client_id,
        item_id = %failure.item_id,
        step = failure.step.as_str(),
        error = %failure.source,
        "Compensation failed; reservation cache needs external reconciliation"
    );
    metrics::counter!("seckill.compensation.failed", "step" => failure.step.as_str()).increment(1);
}
