//! Core types for stage lifecycle telemetry.
//!
//! Provides the immutable event model and its JSON wire format, delivery
//! settings snapshots with a provider capability for hot reload, the clock
//! abstraction used for timestamps and backoff, and the stage tracker that
//! producers use to build events from stage boundaries.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod settings;
pub mod time;
pub mod tracker;

pub use error::{CoreError, Result};
pub use events::{
    BuildContext, EventEnvelope, EventPayload, EventType, StageEvent, StageOutcome, StageStatus,
    EVENT_VERSION,
};
pub use settings::{
    BearerToken, DeliverySettings, SettingsIssue, SettingsProvider, Severity, SharedSettings,
};
pub use time::{Clock, RealClock, TestClock};
pub use tracker::StageTracker;
