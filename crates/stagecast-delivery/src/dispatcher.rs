//! Drain loop moving events from the queue to the worker pool.

use std::{sync::Arc, time::Duration};

use stagecast_core::StageEvent;
use tokio_util::sync::CancellationToken;

use crate::{
    queue::DeliveryQueue, retry::RetryingDelivery, stats::StatsRecorder, worker_pool::WorkerPool,
};

/// Single consumer of the delivery queue.
///
/// Hands each event to the pool and goes straight back to the queue; it
/// never waits for a delivery to finish.
pub(crate) struct Dispatcher {
    pub(crate) queue: Arc<DeliveryQueue>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) delivery: RetryingDelivery,
    pub(crate) stats: Arc<StatsRecorder>,
    pub(crate) poll_interval: Duration,
    pub(crate) shutdown: CancellationToken,
}

impl Dispatcher {
    /// Runs until `shutdown` is cancelled.
    pub(crate) async fn run(self) {
        tracing::debug!(
            poll_interval_ms = self.poll_interval.as_millis(),
            workers = self.pool.size(),
            "dispatcher started"
        );

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = self.queue.dequeue(self.poll_interval) => next,
            };

            if let Some(event) = next {
                self.dispatch(event);
            }
        }

        tracing::debug!(queued_events = self.queue.len(), "dispatcher stopped");
    }

    fn dispatch(&self, event: StageEvent) {
        let in_flight = self.stats.begin_delivery();
        let delivery = self.delivery.clone();

        self.pool.submit(async move {
            let outcome = delivery.deliver(&event).await;
            in_flight.finish(&outcome);
        });
    }
}
