//! Sensor bridge collector, alert scheduler and HTTP API for AirStation.
//!
//! This crate provides a service that:
//! - Polls the sensor bridge over TCP and feeds its readings to the monitor
//! - Stores rate-limited readings in the local history database
//! - Evaluates CO and PM2.5 thresholds on a schedule and raises alerts
//! - Exposes a REST API for history, thresholds and status
//! - Streams live readings over WebSocket
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Evaluation, persistence and alarm state
//! - `GET /api/readings/{kind}` - Windowed history
//! - `GET /api/readings/{kind}/latest` - Most recent stored reading
//! - `GET /api/readings/{kind}/stats` - Window aggregates
//! - `GET|PUT /api/thresholds` - Alert thresholds
//! - `WS /api/ws` - Live readings stream
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/airstation/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/airstation/history.db"
//!
//! [source]
//! address = "192.168.4.1:8080"
//! poll_interval_ms = 1000
//!
//! [monitor]
//! evaluation_interval_secs = 900
//! ```
//!
//! Thresholds are kept in a separate `thresholds.toml` (see [`thresholds`]).

pub mod api;
pub mod bridge;
pub mod config;
pub mod notify;
pub mod scheduler;
pub mod state;
pub mod thresholds;
pub mod ws;

pub use bridge::BridgeSource;
pub use config::{
    Config, ConfigError, MonitorConfig, PreferencesConfig, ServerConfig, SourceConfig,
    StorageConfig, ValidationError,
};
pub use notify::{TerminalBellSiren, TracingSink};
pub use scheduler::{EvaluationScheduler, EvaluationStats, EvaluationStatus};
pub use state::AppState;
pub use thresholds::FileBackend;
