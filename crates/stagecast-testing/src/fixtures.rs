//! Builders for stage events with sensible test defaults.

use stagecast_core::{BuildContext, EventEnvelope, StageEvent, StageOutcome};

/// Job used by fixtures unless overridden.
pub const TEST_JOB: &str = "team/app";
/// Build number used by fixtures unless overridden.
pub const TEST_BUILD_NUMBER: u32 = 42;

/// Build context for [`TEST_JOB`] build [`TEST_BUILD_NUMBER`].
pub fn build_context() -> BuildContext {
    BuildContext::new(
        TEST_JOB,
        TEST_BUILD_NUMBER,
        format!("job/{TEST_JOB}/{TEST_BUILD_NUMBER}/"),
    )
}

/// Fluent builder for stage events.
///
/// ```
/// use stagecast_testing::EventBuilder;
///
/// let event = EventBuilder::new().node("3").stage("Deploy").success(1200);
/// assert_eq!(event.stage_id(), "team/app#42:3");
/// ```
#[derive(Debug, Clone)]
pub struct EventBuilder {
    build: BuildContext,
    node_id: String,
    stage_name: String,
    timestamp: i64,
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self {
            build: build_context(),
            node_id: "7".to_string(),
            stage_name: "Build".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }
}

impl EventBuilder {
    /// Creates a builder with default build, node and stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the build context.
    pub fn build(mut self, build: BuildContext) -> Self {
        self.build = build;
        self
    }

    /// Sets the pipeline node id.
    pub fn node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Sets the stage name.
    pub fn stage(mut self, stage_name: impl Into<String>) -> Self {
        self.stage_name = stage_name.into();
        self
    }

    /// Sets the event timestamp in epoch milliseconds.
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builds a `stage_start` event.
    pub fn start(self) -> StageEvent {
        StageEvent::stage_start(self.envelope())
    }

    /// Builds a successful `stage_end` event.
    pub fn success(self, duration_ms: u64) -> StageEvent {
        StageEvent::stage_end(self.envelope(), StageOutcome::success(duration_ms))
    }

    /// Builds a failed `stage_end` event.
    pub fn failure(self, duration_ms: u64, error_message: impl Into<String>) -> StageEvent {
        StageEvent::stage_end(self.envelope(), StageOutcome::failure(duration_ms, error_message))
    }

    fn envelope(self) -> EventEnvelope {
        EventEnvelope::new(self.build, self.node_id, self.stage_name, self.timestamp)
    }
}
