//! SQLite history store for AirStation sensor readings.
//!
//! This crate provides durable, append-only storage for persisted readings
//! and the windowed range queries the monitoring core needs.
//!
//! # Features
//!
//! - One `readings` table with a `(kind, timestamp)` index for range scans
//! - Fluent [`HistoryQuery`] builder
//! - [`SqliteHistory`], an async [`HistoryStore`](airstation_core::HistoryStore)
//!   adapter that publishes every append to live watchers
//!
//! # Example
//!
//! ```no_run
//! use airstation_store::{HistoryQuery, Store};
//! use airstation_types::SensorKind;
//!
//! let store = Store::open_default()?;
//!
//! let query = HistoryQuery::new().kind(SensorKind::Co).limit(10);
//! let recent = store.query_history(&query)?;
//! # Ok::<(), airstation_store::Error>(())
//! ```

mod error;
mod history;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use history::SqliteHistory;
pub use queries::HistoryQuery;
pub use store::{KindStats, Store};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/airstation/history.db`
/// - macOS: `~/Library/Application Support/airstation/history.db`
/// - Windows: `C:\Users\<user>\AppData\Local\airstation\history.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("airstation")
        .join("history.db")
}
