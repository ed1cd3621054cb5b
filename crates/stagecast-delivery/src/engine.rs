//! Delivery service owning the queue, dispatcher and worker pool.
//!
//! # Architecture
//!
//! ```text
//! producer ──enqueue──▶ DeliveryQueue ──dequeue──▶ Dispatcher
//!                                                      │ submit
//!                                                      ▼
//! collector ◀──POST── HttpTransport ◀──retry── WorkerPool
//! ```
//!
//! Producers only ever see the boolean returned by `enqueue`. Delivery
//! results are logged and counted, never reported back.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use stagecast_core::{Clock, RealClock, SettingsProvider, StageEvent};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    client::{HttpTransport, Transport},
    dispatcher::Dispatcher,
    queue::DeliveryQueue,
    retry::RetryingDelivery,
    stats::{DeliveryStats, StatsRecorder},
    worker_pool::{ShutdownReport, WorkerPool},
};

/// Service-level options. Unlike [`stagecast_core::DeliverySettings`] these
/// are fixed for the lifetime of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Delivery workers; values below 2 are raised to 2.
    pub worker_count: usize,

    /// How long each dequeue waits before re-checking for shutdown.
    pub poll_interval: Duration,

    /// Grace period for in-flight deliveries on stop.
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

struct RunningService {
    shutdown: CancellationToken,
    abort: CancellationToken,
    pool: Arc<WorkerPool>,
    dispatcher: JoinHandle<()>,
}

impl Drop for RunningService {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            error!("DeliveryService dropped while running, cancelling in-flight deliveries");
            self.shutdown.cancel();
            self.abort.cancel();
            self.dispatcher.abort();

            warn!("DeliveryService was not stopped. Call stop() before dropping it.");
        }
    }
}

/// Asynchronous stage event delivery.
///
/// One instance per process, constructed by the host and shared with
/// whatever produces events. `enqueue` may be called from any thread at any
/// time; events buffered while stopped are delivered after `start`.
pub struct DeliveryService {
    settings: Arc<dyn SettingsProvider>,
    queue: Arc<DeliveryQueue>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    stats: Arc<StatsRecorder>,
    running: AtomicBool,
    state: Mutex<Option<RunningService>>,
}

impl DeliveryService {
    /// Creates a stopped service.
    ///
    /// The queue capacity is read from the settings now; later changes to
    /// the queue size take effect only in a new service.
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        let queue = Arc::new(DeliveryQueue::from_settings(&settings.snapshot()));

        Self {
            settings,
            queue,
            transport,
            clock,
            config,
            stats: Arc::new(StatsRecorder::default()),
            running: AtomicBool::new(false),
            state: Mutex::new(None),
        }
    }

    /// Creates a stopped service posting over HTTP on the real clock.
    pub fn with_http(settings: Arc<dyn SettingsProvider>, config: ServiceConfig) -> Self {
        Self::new(settings, Arc::new(HttpTransport::with_defaults()), Arc::new(RealClock), config)
    }

    /// Offers an event for delivery without blocking.
    ///
    /// Returns `false` when `event` is `None`, when delivery is disabled, or
    /// when the queue is full. A `true` result means buffered, not
    /// delivered.
    pub fn enqueue(&self, event: impl Into<Option<StageEvent>>) -> bool {
        let Some(event) = event.into() else {
            return false;
        };

        if !self.settings.snapshot().is_enabled() {
            trace!(stage_id = %event.stage_id(), "no endpoint configured, discarding event");
            return false;
        }

        let stage_id = event.stage_id().to_owned();
        let event_type = event.event_type();

        if self.queue.enqueue(event) {
            self.stats.record_accepted();
            true
        } else {
            self.stats.record_rejected();
            warn!(
                stage_id = %stage_id,
                event_type = %event_type,
                capacity = self.queue.capacity(),
                "delivery queue full, dropping event"
            );
            false
        }
    }

    /// Starts the dispatcher. No-op when already running.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            debug!("delivery service already running");
            return;
        }

        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();
        let pool = Arc::new(WorkerPool::new(self.config.worker_count, abort.clone()));
        let worker_count = pool.size();

        let dispatcher = Dispatcher {
            queue: self.queue.clone(),
            pool: pool.clone(),
            delivery: RetryingDelivery::new(
                self.transport.clone(),
                self.settings.clone(),
                self.clock.clone(),
                abort.clone(),
            ),
            stats: self.stats.clone(),
            poll_interval: self.config.poll_interval,
            shutdown: shutdown.clone(),
        };

        let dispatcher = tokio::spawn(dispatcher.run());
        *state = Some(RunningService { shutdown, abort, pool, dispatcher });
        self.running.store(true, Ordering::Release);

        info!(
            worker_count,
            queue_capacity = self.queue.capacity(),
            "delivery service started"
        );
    }

    /// Stops the dispatcher and waits for in-flight deliveries.
    ///
    /// Deliveries still running after the shutdown timeout are cancelled.
    /// Events left in the queue stay there for a later `start`. No-op when
    /// already stopped.
    pub async fn stop(&self) -> ShutdownReport {
        let Some(mut running) = self.state.lock().await.take() else {
            debug!("delivery service already stopped");
            return ShutdownReport::default();
        };

        self.running.store(false, Ordering::Release);
        info!("stopping delivery service");

        running.shutdown.cancel();
        if let Err(join_error) = (&mut running.dispatcher).await {
            if join_error.is_panic() {
                error!(error = %join_error, "dispatcher panicked");
            }
        }

        let report = running.pool.shutdown(self.config.shutdown_timeout).await;

        info!(
            completed = report.completed,
            aborted = report.aborted,
            undelivered_events = self.queue.len(),
            "delivery service stopped"
        );

        report
    }

    /// Whether the dispatcher is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        self.stats.snapshot()
    }

    /// Events waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue capacity fixed at construction.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
