//! Layered configuration for the stagecast host process.

use std::{path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use stagecast_core::{settings, BearerToken, DeliverySettings, SettingsIssue, Severity};
use stagecast_delivery::ServiceConfig;

/// Configuration file read from the working directory by default.
pub const CONFIG_FILE: &str = "stagecast.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "STAGECAST_";

/// Host configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `STAGECAST_` (highest priority)
/// 2. Configuration file (`stagecast.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Delivery fields are re-read on SIGHUP; service fields only at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    // Delivery
    /// Collector endpoint. Unset or blank disables delivery.
    ///
    /// Environment variable: `STAGECAST_ENDPOINT_URL`
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Bearer token for the collector.
    ///
    /// Environment variable: `STAGECAST_BEARER_TOKEN`
    #[serde(default)]
    pub bearer_token: Option<BearerToken>,
    /// TCP connect timeout in seconds.
    ///
    /// Environment variable: `STAGECAST_CONNECT_TIMEOUT_SECONDS`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Response read timeout in seconds.
    ///
    /// Environment variable: `STAGECAST_READ_TIMEOUT_SECONDS`
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
    /// Delivery queue capacity, fixed at startup.
    ///
    /// Environment variable: `STAGECAST_MAX_QUEUE_SIZE`
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Retries after the first attempt.
    ///
    /// Environment variable: `STAGECAST_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in seconds.
    ///
    /// Environment variable: `STAGECAST_INITIAL_RETRY_DELAY_SECONDS`
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_seconds: u64,

    // Service
    /// Number of delivery workers (minimum 2).
    ///
    /// Environment variable: `STAGECAST_WORKER_COUNT`
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Dispatcher poll interval in milliseconds.
    ///
    /// Environment variable: `STAGECAST_POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period for in-flight deliveries on shutdown, in seconds.
    ///
    /// Environment variable: `STAGECAST_SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Config {
    /// Loads configuration from defaults, `stagecast.toml` and environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Loads configuration using `path` as the file layer.
    ///
    /// A missing file is not an error; its layer is simply empty.
    pub fn load_from(path: &Path) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Snapshot of the hot-reloadable delivery settings.
    pub fn to_delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            endpoint_url: self.endpoint_url.clone(),
            bearer_token: self.bearer_token.clone(),
            connect_timeout_seconds: self.connect_timeout_seconds,
            read_timeout_seconds: self.read_timeout_seconds,
            max_queue_size: self.max_queue_size,
            max_retries: self.max_retries,
            initial_retry_delay_seconds: self.initial_retry_delay_seconds,
        }
    }

    /// Service options fixed for the lifetime of the process.
    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            worker_count: self.worker_count,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Validates the configuration, returning warnings worth logging.
    pub fn validate(&self) -> Result<Vec<SettingsIssue>> {
        let (errors, warnings): (Vec<_>, Vec<_>) = self
            .to_delivery_settings()
            .validate()
            .into_iter()
            .partition(|issue| issue.severity == Severity::Error);

        if let Some(first) = errors.first() {
            bail!("{first}");
        }

        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than 0");
        }

        Ok(warnings)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            bearer_token: None,
            connect_timeout_seconds: default_connect_timeout(),
            read_timeout_seconds: default_read_timeout(),
            max_queue_size: default_max_queue_size(),
            max_retries: default_max_retries(),
            initial_retry_delay_seconds: default_initial_retry_delay(),
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    settings::DEFAULT_CONNECT_TIMEOUT_SECONDS
}

fn default_read_timeout() -> u64 {
    settings::DEFAULT_READ_TIMEOUT_SECONDS
}

fn default_max_queue_size() -> usize {
    settings::DEFAULT_MAX_QUEUE_SIZE
}

fn default_max_retries() -> u32 {
    settings::DEFAULT_MAX_RETRIES
}

fn default_initial_retry_delay() -> u64 {
    settings::DEFAULT_INITIAL_RETRY_DELAY_SECONDS
}

fn default_worker_count() -> usize {
    stagecast_delivery::DEFAULT_WORKER_COUNT
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, path::PathBuf, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    /// Writes `contents` to a per-test file under the system temp dir.
    fn config_file(name: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("stagecast-{}-{name}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn missing_file() -> PathBuf {
        env::temp_dir().join("stagecast-config-that-does-not-exist.toml")
    }

    #[test]
    fn defaults_match_delivery_defaults() {
        let _guard = TestEnvGuard::new();
        let config = Config::load_from(&missing_file()).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.to_delivery_settings(), DeliverySettings::default());
        assert_eq!(config.to_service_config(), ServiceConfig::default());
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let _guard = TestEnvGuard::new();
        let path = config_file(
            "file-layer",
            r#"
            endpoint_url = "https://collector.example/events"
            max_retries = 5
            worker_count = 4
            "#,
        );

        let config = Config::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.endpoint_url.as_deref(), Some("https://collector.example/events"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.to_service_config().worker_count, 4);
        assert_eq!(config.read_timeout_seconds, 30);
    }

    #[test]
    fn env_overrides_file() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("STAGECAST_MAX_QUEUE_SIZE", "50");
        guard.set_var("STAGECAST_BEARER_TOKEN", "from-env");
        let path = config_file("env-layer", "max_queue_size = 10\n");

        let config = Config::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let settings = config.to_delivery_settings();
        assert_eq!(settings.max_queue_size, 50);
        assert_eq!(settings.token().map(BearerToken::expose), Some("from-env"));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("STAGECAST_ENDPOINT_URL", "not a url");

        let error = Config::load_from(&missing_file()).unwrap_err();

        assert!(format!("{error:#}").contains("endpoint_url"));
    }

    #[test]
    fn zero_queue_size_is_rejected() {
        let config = Config { max_queue_size: 0, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn large_values_only_warn() {
        let config = Config { max_queue_size: 20_000, max_retries: 11, ..Config::default() };

        let warnings = config.validate().unwrap();

        let fields: Vec<_> = warnings.iter().map(|issue| issue.field).collect();
        assert_eq!(fields, vec!["max_queue_size", "max_retries"]);
    }

    #[test]
    fn token_is_not_debug_printed() {
        let config =
            Config { bearer_token: Some(BearerToken::new("hunter2")), ..Config::default() };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
