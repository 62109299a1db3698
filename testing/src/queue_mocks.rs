//! In-memory intent queue with ack/nack redelivery.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use flash_sale_core::intent_queue::{
    IntentDelivery, IntentQueue, IntentQueueError, IntentStream, Settlement,
};
use flash_sale_core::SeckillIntent;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const TOPIC: &str = "seckill_queue";

#[derive(Debug, Clone)]
struct Pending {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Pending>,
    published: Vec<SeckillIntent>,
    in_flight: usize,
    acked: usize,
    nacked: usize,
    fail_publish: bool,
    publish_stall: Option<Duration>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl Shared {
    fn push(&self, pending: Pending) {
        self.state.lock().unwrap().ready.push_back(pending);
        self.ready.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn pop(&self) -> Option<Pending> {
        let mut state = self.state.lock().unwrap();
        let next = state.ready.pop_front();
        if next.is_some() {
            state.in_flight += 1;
        }
        next
    }

    fn settle(&self, pending: Pending, settlement: Option<Settlement>) {
        let requeue = {
            let mut state = self.state.lock().unwrap();
            state.in_flight -= 1;
            if settlement == Some(Settlement::Ack) {
                state.acked += 1;
                false
            } else {
                state.nacked += 1;
                true
            }
        };

        if requeue {
            self.push(Pending {
                payload: pending.payload,
                redelivered: true,
            });
        }
    }
}

/// In-memory intent queue for fast, deterministic testing.
///
/// Every subscription draws from the same backlog (consumer group
/// semantics). A nacked or dropped delivery goes to the back of the backlog
/// flagged as a redelivery.
///
/// # Example
///
/// ```
/// use flash_sale_testing::InMemoryIntentQueue;
/// use flash_sale_core::intent_queue::IntentQueue;
/// use flash_sale_core::{ClientId, ItemId, SeckillIntent};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryIntentQueue::new();
/// queue.publish(&SeckillIntent::new(ClientId::new(1), ItemId::new(2))).await?;
/// assert_eq!(queue.backlog(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryIntentQueue {
    shared: Arc<Shared>,
}

impl InMemoryIntentQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue raw bytes, bypassing intent encoding (for poison messages).
    pub fn push_raw(&self, payload: Vec<u8>) {
        self.shared.push(Pending {
            payload,
            redelivered: false,
        });
    }

    /// Make every publish fail until called again with `false`.
    pub fn set_fail_publish(&self, fail: bool) {
        self.shared.state.lock().unwrap().fail_publish = fail;
    }

    /// Make every publish wait `delay` first.
    pub fn stall_publish(&self, delay: Duration) {
        self.shared.state.lock().unwrap().publish_stall = Some(delay);
    }

    /// Every intent accepted by `publish`, in order.
    #[must_use]
    pub fn published(&self) -> Vec<SeckillIntent> {
        self.shared.state.lock().unwrap().published.clone()
    }

    /// Messages waiting for delivery.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.shared.state.lock().unwrap().ready.len()
    }

    /// Messages delivered but not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().unwrap().in_flight
    }

    /// Total acknowledgements.
    #[must_use]
    pub fn acked(&self) -> usize {
        self.shared.state.lock().unwrap().acked
    }

    /// Total nacks (explicit or by drop).
    #[must_use]
    pub fn nacked(&self) -> usize {
        self.shared.state.lock().unwrap().nacked
    }

    /// End every open subscription stream.
    ///
    /// Undelivered messages stay in the backlog; new subscriptions end
    /// immediately.
    pub fn close(&self) {
        self.shared.state.lock().unwrap().closed = true;
        self.shared.ready.notify_waiters();
    }

    /// `true` once nothing is waiting or in flight.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.ready.is_empty() && state.in_flight == 0
    }
}

impl IntentQueue for InMemoryIntentQueue {
    fn publish(
        &self,
        intent: &SeckillIntent,
    ) -> Pin<Box<dyn Future<Output = Result<(), IntentQueueError>> + Send + '_>> {
        let intent = *intent;
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            let stall = shared.state.lock().unwrap().publish_stall;
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
            }

            if shared.state.lock().unwrap().fail_publish {
                return Err(IntentQueueError::PublishFailed {
                    topic: TOPIC.to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }

            let payload = intent
                .encode()
                .map_err(|e| IntentQueueError::SerializationFailed(e.to_string()))?;

            shared.state.lock().unwrap().published.push(intent);
            shared.push(Pending {
                payload,
                redelivered: false,
            });
            Ok(())
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<IntentStream, IntentQueueError>> + Send + '_>> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    // Registered before the checks so a concurrent close() or
                    // push() is never missed.
                    let notified = shared.ready.notified();
                    if shared.is_closed() {
                        break;
                    }
                    let Some(pending) = shared.pop() else {
                        notified.await;
                        continue;
                    };

                    let (delivery, settled) =
                        IntentDelivery::new(pending.payload.clone(), pending.redelivered);

                    let watcher = Arc::clone(&shared);
                    tokio::spawn(async move {
                        let settlement = settled.await.ok();
                        watcher.settle(pending, settlement);
                    });

                    yield Ok(delivery);
                }
            };

            Ok(Box::pin(stream) as IntentStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_sale_core::{ClientId, ItemId};
    use futures::StreamExt;

    #[tokio::test]
    async fn nacked_delivery_comes_back_flagged() {
        let queue = InMemoryIntentQueue::new();
        let intent = SeckillIntent::new(ClientId::new(1), ItemId::new(1));
        queue.publish(&intent).await.unwrap();

        let mut stream = queue.subscribe().await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_redelivery());
        first.nack();

        let second = stream.next().await.unwrap().unwrap();
        assert!(second.is_redelivery());
        assert_eq!(second.decode().unwrap(), intent);
        second.ack();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !queue.is_drained() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(queue.acked(), 1);
        assert_eq!(queue.nacked(), 1);
    }

    #[tokio::test]
    async fn close_ends_waiting_subscriptions() {
        let queue = InMemoryIntentQueue::new();
        let mut stream = queue.subscribe().await.unwrap();

        let waiting = tokio::spawn(async move { stream.next().await.is_none() });
        tokio::task::yield_now().await;
        queue.close();

        let ended = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(ended);

        let mut late = queue.subscribe().await.unwrap();
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn failed_publish_enqueues_nothing() {
        let queue = InMemoryIntentQueue::new();
        queue.set_fail_publish(true);

        let result = queue
            .publish(&SeckillIntent::new(ClientId::new(1), ItemId::new(1)))
            .await;

        assert!(matches!(result, Err(IntentQueueError::PublishFailed { .. })));
        assert_eq!(queue.backlog(), 0);
        assert!(queue.published().is_empty());
    }
}
