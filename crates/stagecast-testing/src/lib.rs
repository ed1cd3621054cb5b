//! Test infrastructure for stagecast.
//!
//! Provides a wiremock-backed collector, event fixtures and a scripted
//! transport so delivery behaviour can be exercised without a real network
//! or real time.

#![warn(missing_docs)]

pub mod fixtures;
pub mod http;
pub mod transport;

pub use fixtures::{build_context, EventBuilder};
pub use http::{assertions, MockCollector, EVENTS_PATH};
pub use stagecast_core::TestClock;
pub use transport::{ScriptedTransport, SentAttempt};
