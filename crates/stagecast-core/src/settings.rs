//! Delivery settings snapshot and the provider capability.
//!
//! Operators may change delivery settings while the service runs. The core
//! never holds a live reference to them: each component asks a
//! [`SettingsProvider`] for an immutable [`DeliverySettings`] snapshot at the
//! point it needs one and documents which values it captures once.

use std::{
    fmt,
    sync::{Arc, RwLock},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;
/// Default read timeout in seconds.
pub const DEFAULT_READ_TIMEOUT_SECONDS: u64 = 30;
/// Default delivery queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay before the first retry, in seconds.
pub const DEFAULT_INITIAL_RETRY_DELAY_SECONDS: u64 = 2;

const QUEUE_SIZE_WARNING_THRESHOLD: usize = 10_000;
const RETRIES_WARNING_THRESHOLD: u32 = 10;

/// Opaque bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

/// Immutable snapshot of operator-configured delivery parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Collector endpoint. Absent or blank disables delivery.
    pub endpoint_url: Option<String>,
    /// Bearer credential sent in the `Authorization` header.
    pub bearer_token: Option<BearerToken>,
    /// TCP connect timeout in seconds.
    pub connect_timeout_seconds: u64,
    /// Response read timeout in seconds.
    pub read_timeout_seconds: u64,
    /// Queue capacity, read once when the queue is created.
    pub max_queue_size: usize,
    /// Retries after the first attempt; 0 means a single attempt.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further retry.
    pub initial_retry_delay_seconds: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            bearer_token: None,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
            read_timeout_seconds: DEFAULT_READ_TIMEOUT_SECONDS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_retry_delay_seconds: DEFAULT_INITIAL_RETRY_DELAY_SECONDS,
        }
    }
}

impl DeliverySettings {
    /// Settings with defaults and the given endpoint.
    pub fn with_endpoint(endpoint_url: impl Into<String>) -> Self {
        Self { endpoint_url: Some(endpoint_url.into()), ..Self::default() }
    }

    /// Configured endpoint, `None` when absent or blank.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint_url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }

    /// Whether an endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        self.endpoint().is_some()
    }

    /// Token to send, `None` when absent or blank.
    pub fn token(&self) -> Option<&BearerToken> {
        self.bearer_token.as_ref().filter(|token| !token.is_blank())
    }

    /// TCP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Response read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    /// Delay before the first retry.
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_secs(self.initial_retry_delay_seconds)
    }

    /// Checks the settings the way the operator form does.
    ///
    /// Errors make the settings unusable; warnings flag values that work
    /// but are probably unintended.
    pub fn validate(&self) -> Vec<SettingsIssue> {
        let mut issues = Vec::new();

        if let Some(endpoint) = self.endpoint() {
            if let Err(e) = url::Url::parse(endpoint) {
                issues.push(SettingsIssue::error("endpoint_url", format!("Invalid URL: {e}")));
            }
        }

        if self.max_queue_size < 1 {
            issues.push(SettingsIssue::error("max_queue_size", "Queue size must be at least 1"));
        } else if self.max_queue_size > QUEUE_SIZE_WARNING_THRESHOLD {
            issues.push(SettingsIssue::warning(
                "max_queue_size",
                "Very large queue size may consume significant memory",
            ));
        }

        if self.max_retries > RETRIES_WARNING_THRESHOLD {
            issues.push(SettingsIssue::warning(
                "max_retries",
                "High retry count may delay event delivery significantly",
            ));
        }

        if self.connect_timeout_seconds == 0 {
            issues.push(SettingsIssue::error(
                "connect_timeout_seconds",
                "Timeout must be positive",
            ));
        }
        if self.read_timeout_seconds == 0 {
            issues.push(SettingsIssue::error("read_timeout_seconds", "Timeout must be positive"));
        }

        issues
    }

    /// Fails with the first validation error, ignoring warnings.
    pub fn ensure_valid(&self) -> Result<()> {
        match self.validate().into_iter().find(|issue| issue.severity == Severity::Error) {
            Some(issue) => Err(CoreError::InvalidSettings(issue.to_string())),
            None => Ok(()),
        }
    }
}

/// Severity of a settings validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The value cannot be used.
    Error,
    /// The value works but is suspicious.
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsIssue {
    /// Offending field.
    pub field: &'static str,
    /// Severity of the finding.
    pub severity: Severity,
    /// Operator facing message.
    pub message: String,
}

impl SettingsIssue {
    fn error(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, severity: Severity::Error, message: message.into() }
    }

    fn warning(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, severity: Severity::Warning, message: message.into() }
    }
}

impl fmt::Display for SettingsIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Source of delivery settings snapshots.
///
/// Every call may observe different values than the previous one.
pub trait SettingsProvider: Send + Sync + 'static {
    /// Takes an immutable snapshot of the current settings.
    fn snapshot(&self) -> Arc<DeliverySettings>;
}

impl SettingsProvider for DeliverySettings {
    fn snapshot(&self) -> Arc<DeliverySettings> {
        Arc::new(self.clone())
    }
}

impl<F> SettingsProvider for F
where
    F: Fn() -> DeliverySettings + Send + Sync + 'static,
{
    fn snapshot(&self) -> Arc<DeliverySettings> {
        Arc::new(self())
    }
}

/// Settings shared between the host and the core, replaceable at runtime.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    current: Arc<RwLock<Arc<DeliverySettings>>>,
}

impl SharedSettings {
    /// Creates shared settings holding the given initial snapshot.
    pub fn new(settings: DeliverySettings) -> Self {
        Self { current: Arc::new(RwLock::new(Arc::new(settings))) }
    }

    /// Publishes new settings; later snapshots observe them.
    pub fn replace(&self, settings: DeliverySettings) {
        let mut current = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Arc::new(settings);
    }
}

impl SettingsProvider for SharedSettings {
    fn snapshot(&self) -> Arc<DeliverySettings> {
        self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operator_defaults() {
        let settings = DeliverySettings::default();

        assert_eq!(settings.connect_timeout(), Duration::from_secs(10));
        assert_eq!(settings.read_timeout(), Duration::from_secs(30));
        assert_eq!(settings.max_queue_size, 1000);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.initial_retry_delay(), Duration::from_secs(2));
        assert!(!settings.is_enabled());
    }

    #[test]
    fn blank_endpoint_is_disabled() {
        assert!(!DeliverySettings::with_endpoint("   ").is_enabled());
        assert!(!DeliverySettings::with_endpoint("").is_enabled());
        assert_eq!(
            DeliverySettings::with_endpoint(" http://collector/events ").endpoint(),
            Some("http://collector/events")
        );
    }

    #[test]
    fn blank_token_is_ignored() {
        let settings = DeliverySettings {
            bearer_token: Some(BearerToken::new("  ")),
            ..DeliverySettings::default()
        };
        assert!(settings.token().is_none());
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let settings = DeliverySettings {
            bearer_token: Some(BearerToken::new("s3cr3t")),
            ..DeliverySettings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn validation_accepts_valid_and_empty_urls() {
        for url in ["http://localhost:8080/metrics", "https://api.example.com/events", ""] {
            assert!(DeliverySettings::with_endpoint(url).validate().is_empty(), "{url}");
        }
        assert!(DeliverySettings::default().validate().is_empty());
    }

    #[test]
    fn validation_rejects_invalid_url() {
        let issues = DeliverySettings::with_endpoint("not-a-valid-url").validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "endpoint_url");
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn queue_size_validation() {
        let check = |max_queue_size| {
            DeliverySettings { max_queue_size, ..DeliverySettings::default() }
                .validate()
                .first()
                .map(|issue| issue.severity)
        };

        assert_eq!(check(0), Some(Severity::Error));
        assert_eq!(check(100), None);
        assert_eq!(check(15_000), Some(Severity::Warning));
    }

    #[test]
    fn retry_validation() {
        let check = |max_retries| {
            DeliverySettings { max_retries, ..DeliverySettings::default() }
                .validate()
                .first()
                .map(|issue| issue.severity)
        };

        assert_eq!(check(3), None);
        assert_eq!(check(15), Some(Severity::Warning));
    }

    #[test]
    fn ensure_valid_ignores_warnings() {
        let warned = DeliverySettings { max_retries: 20, ..DeliverySettings::default() };
        assert!(warned.ensure_valid().is_ok());

        let broken = DeliverySettings { max_queue_size: 0, ..DeliverySettings::default() };
        assert!(matches!(broken.ensure_valid(), Err(CoreError::InvalidSettings(_))));
    }

    #[test]
    fn shared_settings_hot_reload() {
        let shared = SharedSettings::new(DeliverySettings::default());
        let before = shared.snapshot();

        shared.replace(DeliverySettings::with_endpoint("http://collector"));

        assert!(!before.is_enabled());
        assert!(shared.snapshot().is_enabled());
    }

    #[test]
    fn closures_provide_snapshots() {
        let provider = || DeliverySettings { max_retries: 0, ..DeliverySettings::default() };
        assert_eq!(provider.snapshot().max_retries, 0);
    }

    #[test]
    fn deserializes_partial_settings_with_defaults() {
        let settings: DeliverySettings = serde_json::from_str(
            r#"{"endpoint_url": "http://collector", "bearer_token": "abc", "max_retries": 5}"#,
        )
        .unwrap();

        assert_eq!(settings.endpoint(), Some("http://collector"));
        assert_eq!(settings.token().map(BearerToken::expose), Some("abc"));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
    }
}
