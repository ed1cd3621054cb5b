//! Delivery counters.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::retry::DeliveryOutcome;

/// Point-in-time view of the delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events accepted into the queue.
    pub accepted: u64,
    /// Events refused because the queue was full.
    pub rejected: u64,
    /// Events the collector accepted.
    pub delivered: u64,
    /// Events skipped because delivery was disabled at send time.
    pub skipped: u64,
    /// Events dropped after their final failed attempt.
    pub dropped: u64,
    /// Events abandoned by shutdown.
    pub abandoned: u64,
    /// Attempts beyond the first, summed over all events.
    pub retries: u64,
    /// Events dequeued whose delivery has not finished.
    pub in_flight: u64,
}

impl DeliveryStats {
    /// Accepted events that have not reached a final outcome.
    pub fn unsettled(&self) -> u64 {
        self.accepted.saturating_sub(self.delivered + self.skipped + self.dropped + self.abandoned)
    }
}

/// Lock-free counter set shared by the service and its tasks.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    accepted: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks an event as in flight until the returned guard drops.
    pub(crate) fn begin_delivery(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight { stats: self.clone(), settled: false }
    }

    pub(crate) fn record_outcome(&self, outcome: &DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered { .. } => &self.delivered,
            DeliveryOutcome::Skipped => &self.skipped,
            DeliveryOutcome::Dropped { .. } => &self.dropped,
            DeliveryOutcome::Abandoned { .. } => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let retries = outcome.attempts().saturating_sub(1);
        self.retries.fetch_add(u64::from(retries), Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the in-flight gauge on drop, including task abort.
///
/// A guard dropped without [`InFlight::finish`] belongs to a task that was
/// cancelled before reaching an outcome; it is counted as abandoned.
pub(crate) struct InFlight {
    stats: Arc<StatsRecorder>,
    settled: bool,
}

impl InFlight {
    pub(crate) fn finish(mut self, outcome: &DeliveryOutcome) {
        self.stats.record_outcome(outcome);
        self.settled = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.settled {
            tracing::info!("delivery task cancelled by shutdown, abandoning event");
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
