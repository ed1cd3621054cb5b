//! Producer-side helper that turns stage boundaries into events.
//!
//! The execution engine decides when a stage starts or ends. The tracker
//! remembers start times per stage id so the matching `stage_end` can carry
//! a duration, and stamps both events from the injected clock.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    events::{BuildContext, EventEnvelope, StageEvent, StageOutcome},
    time::Clock,
};

/// Tracks open stages and builds their lifecycle events.
#[derive(Debug)]
pub struct StageTracker {
    clock: Arc<dyn Clock>,
    started_at: Mutex<HashMap<String, i64>>,
}

impl StageTracker {
    /// Creates a tracker stamping events from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, started_at: Mutex::new(HashMap::new()) }
    }

    /// Records a stage start and returns its `stage_start` event.
    ///
    /// Returns `None` for stages without a usable name.
    pub fn stage_started(
        &self,
        build: &BuildContext,
        node_id: &str,
        stage_name: &str,
    ) -> Option<StageEvent> {
        if stage_name.trim().is_empty() {
            return None;
        }

        let timestamp = self.clock.epoch_millis();
        let envelope = EventEnvelope::new(build.clone(), node_id, stage_name, timestamp);
        self.open_stages().insert(envelope.stage_id.clone(), timestamp);

        Some(StageEvent::stage_start(envelope))
    }

    /// Closes a stage and returns its `stage_end` event.
    ///
    /// The duration is measured from the recorded start, or 0 when the
    /// start was never seen. A present `error` marks the stage as failed.
    pub fn stage_finished(
        &self,
        build: &BuildContext,
        node_id: &str,
        stage_name: &str,
        error: Option<&str>,
    ) -> Option<StageEvent> {
        if stage_name.trim().is_empty() {
            return None;
        }

        let ended_at = self.clock.epoch_millis();
        let envelope = EventEnvelope::new(build.clone(), node_id, stage_name, ended_at);
        let duration_ms = self
            .open_stages()
            .remove(&envelope.stage_id)
            .map_or(0, |started_at| u64::try_from(ended_at - started_at).unwrap_or(0));

        let outcome = match error {
            Some(message) => StageOutcome::failure(duration_ms, message),
            None => StageOutcome::success(duration_ms),
        };

        Some(StageEvent::stage_end(envelope, outcome))
    }

    /// Number of stages started but not yet finished.
    pub fn open_stage_count(&self) -> usize {
        self.open_stages().len()
    }

    fn open_stages(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.started_at.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
