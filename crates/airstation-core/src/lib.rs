//! Monitoring core for AirStation environmental sensors.
//!
//! This crate turns a push-based stream of raw sensor events into persisted
//! history and threshold alerts.
//!
//! # Features
//!
//! - **Live feed**: map raw bridge events to typed readings and fan them out
//! - **Rate-limited persistence**: at most one write per kind per interval
//! - **Windowed history**: range queries, reactive watches, combine-latest
//! - **Alert evaluation**: CO and PM2.5 with live-read timeouts and history
//!   fallback
//! - **Alarm sessions**: a single bounded audible alarm, replaced on re-trigger
//!
//! # Data flow
//!
//! ```text
//! ReadingSource ──► LiveFeed ──┬──► PersistenceController ──► HistoryStore
//!                              │                                   │
//!                              └──► AlertEvaluator ◄───────────────┘
//!                                         │
//!                                         ▼
//!                                      Notifier
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use airstation_core::mock::{MemoryHistory, MockReadingSource, RecordingNotifier};
//! use airstation_core::{Monitor, MonitorOptions, Preferences, ThresholdConfig};
//!
//! # async fn example() -> airstation_core::Result<()> {
//! let source = MockReadingSource::new();
//! let monitor = Monitor::start(
//!     &source,
//!     Arc::new(MemoryHistory::new()),
//!     Arc::new(Preferences::in_memory(ThresholdConfig::default())),
//!     Arc::new(RecordingNotifier::new()),
//!     MonitorOptions::default(),
//! )?;
//!
//! let outcome = monitor.evaluator().tick().await?;
//! println!("{outcome:?}");
//! monitor.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod combine;
pub mod error;
pub mod evaluator;
pub mod frame;
pub mod history;
pub mod live;
pub mod mapper;
pub mod mock;
pub mod monitor;
pub mod notifier;
pub mod persist;
pub mod preferences;
pub mod quality;
pub mod retry;
pub mod source;

pub use combine::{CombineLatest, combine_latest};
pub use error::{BoxError, Error, Result};
pub use evaluator::{
    AlertEvaluator, DEFAULT_HISTORY_WINDOW, DEFAULT_LIVE_TIMEOUT, Evaluation, EvaluatorOptions,
    TickOutcome, TickReport, ValueSource,
};
pub use frame::{decode_frame, decode_frame_at};
pub use history::{HistoryStore, mean, watch_history, window_start};
pub use live::{LiveFeed, LiveReader, ReadingStream};
pub use mapper::map;
pub use monitor::{Monitor, MonitorOptions};
pub use notifier::{
    AlarmNotifier, AlarmSession, Alert, AlertLevel, DEFAULT_ALARM_DURATION, NotificationSink,
    Notifier, Siren,
};
pub use persist::{DEFAULT_DEBOUNCE_INTERVAL, PersistenceController, PersistenceStats};
pub use preferences::{MemoryBackend, Preferences, PreferencesBackend, ThresholdConfig};
pub use quality::{Breakpoints, QualityLevel, breakpoints, classify};
pub use retry::{RetryConfig, with_retry};
pub use source::{EventHandler, ReadingSource, Subscription};

// Re-export from airstation-types
pub use airstation_types::{PersistedReading, RawSensorEvent, Reading, SensorKind};
