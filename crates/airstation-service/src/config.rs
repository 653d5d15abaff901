//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use airstation_core::{EvaluatorOptions, MonitorOptions, RetryConfig};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Sensor bridge settings.
    pub source: SourceConfig,
    /// Persistence and alerting settings.
    pub monitor: MonitorConfig,
    /// Where the threshold preferences live.
    pub preferences: PreferencesConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, reporting every problem at once.
    ///
    /// ```
    /// use airstation_service::Config;
    ///
    /// let config = Config::default();
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.source.validate());
        errors.extend(self.monitor.validate());
        errors.extend(self.preferences.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Buffer of the live reading channel feeding WebSocket clients.
    pub broadcast_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            broadcast_buffer: DEFAULT_BROADCAST_BUFFER,
        }
    }
}

/// Default WebSocket broadcast buffer.
pub const DEFAULT_BROADCAST_BUFFER: usize = 100;

impl ServerConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(message) = validate_socket_address(&self.bind) {
            errors.push(ValidationError::new("server.bind", message));
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError::new(
                "server.broadcast_buffer",
                "buffer must be at least 1",
            ));
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: airstation_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Sensor bridge connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Bridge address as `host:port`.
    pub address: String,
    /// Delay between `GET DATA` polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Delay before reconnecting after a failure, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Connect timeout, in milliseconds.
    pub connect_timeout_ms: u64,
}

/// Minimum bridge poll interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
/// Maximum bridge poll interval in milliseconds (1 minute).
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            address: "192.168.4.1:8080".to_string(),
            poll_interval_ms: 1000,
            reconnect_delay_ms: 2000,
            connect_timeout_ms: 2000,
        }
    }
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(message) = validate_socket_address(&self.address) {
            errors.push(ValidationError::new("source.address", message));
        }

        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            errors.push(ValidationError::new(
                "source.poll_interval_ms",
                format!(
                    "poll interval {} is too short (minimum {} ms)",
                    self.poll_interval_ms, MIN_POLL_INTERVAL_MS
                ),
            ));
        } else if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            errors.push(ValidationError::new(
                "source.poll_interval_ms",
                format!(
                    "poll interval {} is too long (maximum {} ms)",
                    self.poll_interval_ms, MAX_POLL_INTERVAL_MS
                ),
            ));
        }

        if self.reconnect_delay_ms == 0 {
            errors.push(ValidationError::new(
                "source.reconnect_delay_ms",
                "reconnect delay must be positive",
            ));
        }

        if self.connect_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "source.connect_timeout_ms",
                "connect timeout must be positive",
            ));
        }

        errors
    }
}

/// Persistence and alert evaluation timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum spacing of stored readings per kind, in seconds.
    pub debounce_secs: u64,
    /// Period of the alert evaluation, in seconds.
    pub evaluation_interval_secs: u64,
    /// Bound on a live read during evaluation, in seconds.
    pub live_timeout_secs: u64,
    /// History window for fallback and averaging, in seconds.
    pub history_window_secs: u64,
    /// How long a lethal-gas alarm sounds, in seconds.
    pub alarm_duration_secs: u64,
    /// Backoff for failed evaluations.
    pub retry: RetryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce_secs: airstation_core::DEFAULT_DEBOUNCE_INTERVAL.as_secs(),
            evaluation_interval_secs: 15 * 60,
            live_timeout_secs: airstation_core::DEFAULT_LIVE_TIMEOUT.as_secs(),
            history_window_secs: airstation_core::DEFAULT_HISTORY_WINDOW.as_secs(),
            alarm_duration_secs: airstation_core::DEFAULT_ALARM_DURATION.as_secs(),
            retry: RetryConfig::for_evaluation(),
        }
    }
}

impl MonitorConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn alarm_duration(&self) -> Duration {
        Duration::from_secs(self.alarm_duration_secs)
    }

    /// Core monitor options with the given live channel capacity.
    pub fn options(&self, channel_capacity: usize) -> MonitorOptions {
        MonitorOptions {
            debounce_interval: Duration::from_secs(self.debounce_secs),
            channel_capacity,
            evaluator: EvaluatorOptions {
                live_timeout: Duration::from_secs(self.live_timeout_secs),
                history_window: Duration::from_secs(self.history_window_secs),
            },
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let positive = [
            ("monitor.debounce_secs", self.debounce_secs),
            ("monitor.evaluation_interval_secs", self.evaluation_interval_secs),
            ("monitor.live_timeout_secs", self.live_timeout_secs),
            ("monitor.history_window_secs", self.history_window_secs),
            ("monitor.alarm_duration_secs", self.alarm_duration_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                errors.push(ValidationError::new(field, "must be greater than 0"));
            }
        }

        if self.evaluation_interval_secs > 0
            && self.live_timeout_secs >= self.evaluation_interval_secs
        {
            errors.push(ValidationError::new(
                "monitor.live_timeout_secs",
                format!(
                    "live timeout {}s must be shorter than the evaluation interval {}s",
                    self.live_timeout_secs, self.evaluation_interval_secs
                ),
            ));
        }

        if !(self.retry.backoff_multiplier.is_finite() && self.retry.backoff_multiplier >= 1.0) {
            errors.push(ValidationError::new(
                "monitor.retry.backoff_multiplier",
                "multiplier must be a finite number >= 1.0",
            ));
        }

        if self.retry.initial_delay > self.retry.max_delay {
            errors.push(ValidationError::new(
                "monitor.retry.initial_delay",
                "initial delay cannot exceed max delay",
            ));
        }

        errors
    }
}

/// Threshold preferences location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Path of the thresholds file.
    pub path: PathBuf,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: default_thresholds_path(),
        }
    }
}

impl PreferencesConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "preferences.path",
                "thresholds path cannot be empty",
            ));
        }

        errors
    }
}

fn validate_socket_address(address: &str) -> Result<(), String> {
    if address.is_empty() {
        return Err("address cannot be empty".to_string());
    }

    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(format!(
            "invalid address '{}': expected format 'host:port'",
            address
        ));
    };

    if host.is_empty() {
        return Err(format!("invalid address '{}': missing host", address));
    }

    match port.parse::<u16>() {
        Ok(0) => Err("port cannot be 0".to_string()),
        Ok(_) => Ok(()),
        Err(_) => Err(format!("invalid port '{}': must be a number 1-65535", port)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `monitor.retry.max_delay`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("airstation")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("server.toml")
}

/// Default thresholds file path.
pub fn default_thresholds_path() -> PathBuf {
    config_dir().join("thresholds.toml")
}
