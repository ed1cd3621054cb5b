//! Asynchronous delivery of stage lifecycle events.
//!
//! Producers hand events to a [`DeliveryService`] and move on. Events wait in
//! a bounded in-memory queue, a dispatcher drains it into a small worker
//! pool, and each worker posts its event to the collector with exponential
//! backoff retries.
//!
//! # Guarantees
//!
//! - **Non-blocking enqueue** - a full queue rejects the event immediately
//! - **At-most-once per attempt** - an event is dropped after its last retry
//! - **Hot settings** - endpoint, token and timeouts are re-read per attempt
//! - **Bounded shutdown** - in-flight deliveries get a grace period, then are
//!   cancelled
//!
//! Delivery order across events is not guaranteed: a `stage_end` may reach
//! the collector before its `stage_start`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stagecast_core::{BuildContext, DeliverySettings, EventEnvelope, StageEvent};
//! use stagecast_delivery::{DeliveryService, ServiceConfig};
//!
//! # async fn example() {
//! let settings = DeliverySettings::with_endpoint("https://collector.example/events");
//! let service = DeliveryService::with_http(Arc::new(settings), ServiceConfig::default());
//! service.start().await;
//!
//! let build = BuildContext::new("team/app", 42, "job/team/app/42/");
//! let event = StageEvent::stage_start(EventEnvelope::new(build, "7", "Build", 0));
//! assert!(service.enqueue(event));
//!
//! service.stop().await;
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
mod dispatcher;
pub mod engine;
pub mod error;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod worker_pool;

pub use client::{ClientConfig, HttpTransport, SendReceipt, Transport};
pub use engine::{DeliveryService, ServiceConfig};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use queue::DeliveryQueue;
pub use retry::{DeliveryOutcome, RetryDecision, RetryPolicy, RetryingDelivery};
pub use stats::DeliveryStats;
pub use worker_pool::{ShutdownReport, WorkerPool};

/// Default number of delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 2;
