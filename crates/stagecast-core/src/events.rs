//! Stage lifecycle events and their wire representation.
//!
//! Every event shares a common envelope (identity, timing and build context)
//! and carries a variant payload. The payload is a tagged union: a
//! `stage_start` has no extra fields, a `stage_end` carries the outcome.
//!
//! # Wire format
//!
//! ```text
//! {
//!   "event_type": "stage_end",        "event_version": "1.0",
//!   "timestamp": 1700000005000,       "stage_id": "team/app#42:7",
//!   "stage_name": "Build",            "job_full_name": "team/app",
//!   "build_number": 42,               "build_url": "job/team/app/42/",
//!   "branch_name": "main",            "node_id": "7",
//!   "status": "SUCCESS",              "result": "SUCCESS",
//!   "duration_ms": 5000
//! }
//! ```
//!
//! Optional fields (`branch_name`, `change_id`, `change_target`,
//! `error_message`) are omitted when unset, never sent as empty strings.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Schema version stamped on every event.
pub const EVENT_VERSION: &str = "1.0";

/// Discriminant of a stage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A stage began executing.
    StageStart,
    /// A stage finished executing.
    StageEnd,
}

impl EventType {
    /// Wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StageStart => "stage_start",
            Self::StageEnd => "stage_end",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a finished stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    /// The stage completed without error.
    Success,
    /// The stage raised an error.
    Failure,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::Failure => f.write_str("FAILURE"),
        }
    }
}

/// Build metadata shared by every stage of one pipeline run.
///
/// The multi-branch fields are only present for branch or change-request
/// builds. Blank values are normalised to `None` when an event is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Full name of the job, including folders (`team/app`).
    pub job_full_name: String,
    /// Build number within the job.
    pub build_number: u32,
    /// URL of the build, as reported by the execution engine.
    pub build_url: String,
    /// Branch being built.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_blank")]
    pub branch_name: Option<String>,
    /// Change request identifier.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_blank")]
    pub change_id: Option<String>,
    /// Target branch of the change request.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_blank")]
    pub change_target: Option<String>,
}

impl BuildContext {
    /// Creates a context for a plain (non multi-branch) build.
    pub fn new(
        job_full_name: impl Into<String>,
        build_number: u32,
        build_url: impl Into<String>,
    ) -> Self {
        Self {
            job_full_name: job_full_name.into(),
            build_number,
            build_url: build_url.into(),
            branch_name: None,
            change_id: None,
            change_target: None,
        }
    }

    /// Sets the branch name.
    #[must_use]
    pub fn with_branch(mut self, branch_name: impl Into<String>) -> Self {
        self.branch_name = Some(branch_name.into());
        self
    }

    /// Sets the change request identifier and its target branch.
    #[must_use]
    pub fn with_change(
        mut self,
        change_id: impl Into<String>,
        change_target: impl Into<String>,
    ) -> Self {
        self.change_id = Some(change_id.into());
        self.change_target = Some(change_target.into());
        self
    }

    /// Derives the globally unique stage id for a node of this build.
    pub fn stage_id(&self, node_id: &str) -> String {
        format!("{}#{}:{}", self.job_full_name, self.build_number, node_id)
    }

    fn normalize(&mut self) {
        for field in [&mut self.branch_name, &mut self.change_id, &mut self.change_target] {
            if field.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *field = None;
            }
        }
    }
}

/// Fields common to every stage event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Producer timestamp, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Globally unique stage identifier.
    pub stage_id: String,
    /// Human readable stage label.
    pub stage_name: String,
    /// Build the stage belongs to.
    #[serde(flatten)]
    pub build: BuildContext,
    /// Position of the stage in the execution graph.
    pub node_id: String,
}

impl EventEnvelope {
    /// Builds an envelope, deriving the stage id from the build and node.
    pub fn new(
        build: BuildContext,
        node_id: impl Into<String>,
        stage_name: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            timestamp,
            stage_id: build.stage_id(&node_id),
            stage_name: stage_name.into(),
            build,
            node_id,
        }
    }
}

/// Outcome carried by a `stage_end` event.
///
/// `result` always mirrors `status`, and `error_message` is only present on
/// [`StageStatus::Failure`]. A failure whose error carried no usable text
/// has no message. The constructors and [`StageEvent::from_json`] enforce
/// both rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    status: StageStatus,
    result: StageStatus,
    duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_blank")]
    error_message: Option<String>,
}

impl StageOutcome {
    /// Outcome of a stage that completed normally.
    pub fn success(duration_ms: u64) -> Self {
        Self {
            status: StageStatus::Success,
            result: StageStatus::Success,
            duration_ms,
            error_message: None,
        }
    }

    /// Outcome of a stage that failed with the given message.
    ///
    /// A blank message is dropped, like every other optional field.
    pub fn failure(duration_ms: u64, error_message: impl Into<String>) -> Self {
        let error_message = error_message.into();
        Self {
            status: StageStatus::Failure,
            result: StageStatus::Failure,
            duration_ms,
            error_message: Some(error_message).filter(|message| !message.trim().is_empty()),
        }
    }

    fn check(&self) -> crate::Result<()> {
        if self.result != self.status {
            return Err(CoreError::InvalidEvent(format!(
                "result {} does not match status {}",
                self.result, self.status
            )));
        }
        if self.status == StageStatus::Success && self.error_message.is_some() {
            return Err(CoreError::InvalidEvent(
                "error_message is only allowed on FAILURE".to_string(),
            ));
        }
        Ok(())
    }

    /// Terminal status.
    pub fn status(&self) -> StageStatus {
        self.status
    }

    /// Result, mirrors the status.
    pub fn result(&self) -> StageStatus {
        self.result
    }

    /// Elapsed stage time in milliseconds, 0 when no start was observed.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Error raised by the stage, only set on failure.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

/// Variant specific part of a stage event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Stage started; no extra fields.
    StageStart,
    /// Stage ended with an outcome.
    StageEnd(StageOutcome),
}

impl EventPayload {
    /// Discriminant of this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::StageStart => EventType::StageStart,
            Self::StageEnd(_) => EventType::StageEnd,
        }
    }
}

/// Marker serialised as the constant [`EVENT_VERSION`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SchemaVersion;

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(EVENT_VERSION)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == EVENT_VERSION {
            Ok(Self)
        } else {
            Err(de::Error::custom(format!(
                "unsupported event_version {version:?}, expected {EVENT_VERSION:?}"
            )))
        }
    }
}

/// An immutable stage lifecycle event.
///
/// Fields are only reachable through accessors, so a value handed to the
/// delivery queue is exactly what the producer built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    event_version: SchemaVersion,
    #[serde(flatten)]
    envelope: EventEnvelope,
    #[serde(flatten)]
    payload: EventPayload,
}

impl StageEvent {
    /// Creates an event from an envelope and payload.
    pub fn new(mut envelope: EventEnvelope, payload: EventPayload) -> Self {
        envelope.build.normalize();
        Self { event_version: SchemaVersion, envelope, payload }
    }

    /// Creates a `stage_start` event.
    pub fn stage_start(envelope: EventEnvelope) -> Self {
        Self::new(envelope, EventPayload::StageStart)
    }

    /// Creates a `stage_end` event.
    pub fn stage_end(envelope: EventEnvelope, outcome: StageOutcome) -> Self {
        Self::new(envelope, EventPayload::StageEnd(outcome))
    }

    /// Decodes an event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// [`CoreError::Codec`] for malformed JSON or an unknown version, and
    /// [`CoreError::InvalidEvent`] for a `stage_end` whose outcome breaks
    /// the [`StageOutcome`] rules.
    pub fn from_json(input: &[u8]) -> crate::Result<Self> {
        let event: Self = serde_json::from_slice(input)?;
        if let EventPayload::StageEnd(outcome) = &event.payload {
            outcome.check()?;
        }
        Ok(Self::new(event.envelope, event.payload))
    }

    /// Encodes the event to its JSON wire form.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Discriminant of this event.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Schema version, always [`EVENT_VERSION`].
    pub fn event_version(&self) -> &'static str {
        EVENT_VERSION
    }

    /// Common envelope.
    pub fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    /// Variant payload.
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Stage outcome, only present on `stage_end`.
    pub fn outcome(&self) -> Option<&StageOutcome> {
        match &self.payload {
            EventPayload::StageEnd(outcome) => Some(outcome),
            EventPayload::StageStart => None,
        }
    }

    /// Globally unique stage identifier.
    pub fn stage_id(&self) -> &str {
        &self.envelope.stage_id
    }

    /// Human readable stage label.
    pub fn stage_name(&self) -> &str {
        &self.envelope.stage_name
    }

    /// Producer timestamp in epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.envelope.timestamp
    }
}

fn non_blank<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
