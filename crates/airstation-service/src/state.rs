//! Application state shared across handlers.
//!
//! # Broadcast Channel Behavior
//!
//! `readings_tx` carries every live mapped reading to WebSocket clients.
//! It is sized by `server.broadcast_buffer`; a client that falls behind
//! loses the oldest readings and never blocks the feed.

use std::sync::{Arc, OnceLock};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use airstation_core::{AlarmNotifier, PersistenceController, Preferences, Reading};
use airstation_store::SqliteHistory;

use crate::config::Config;
use crate::scheduler::EvaluationStats;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Persisted readings.
    pub history: Arc<SqliteHistory>,
    /// Threshold preferences.
    pub preferences: Arc<Preferences>,
    /// Live readings for WebSocket clients.
    pub readings_tx: broadcast::Sender<Reading>,
    /// Evaluation loop counters.
    pub evaluation: Arc<EvaluationStats>,
    persistence: OnceLock<Arc<PersistenceController>>,
    alarm: OnceLock<Arc<AlarmNotifier>>,
}

impl AppState {
    pub fn new(
        history: Arc<SqliteHistory>,
        preferences: Arc<Preferences>,
        config: Config,
    ) -> Arc<Self> {
        let (readings_tx, _) = broadcast::channel(config.server.broadcast_buffer.max(1));
        Arc::new(Self {
            config,
            history,
            preferences,
            readings_tx,
            evaluation: Arc::new(EvaluationStats::new()),
            persistence: OnceLock::new(),
            alarm: OnceLock::new(),
        })
    }

    /// Expose the running monitor's persistence counters and alarm.
    pub fn attach(&self, persistence: Arc<PersistenceController>, alarm: Arc<AlarmNotifier>) {
        let _ = self.persistence.set(persistence);
        let _ = self.alarm.set(alarm);
    }

    pub fn persistence(&self) -> Option<&Arc<PersistenceController>> {
        self.persistence.get()
    }

    pub fn alarm(&self) -> Option<&Arc<AlarmNotifier>> {
        self.alarm.get()
    }

    /// Relay live readings to WebSocket clients until `cancel` fires or the
    /// feed closes.
    pub async fn relay_readings(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<Reading>,
        cancel: CancellationToken,
    ) {
        loop {
            let reading = tokio::select! {
                _ = cancel.cancelled() => break,
                reading = rx.recv() => reading,
            };
            match reading {
                Ok(reading) => {
                    // No receivers just means no clients are connected.
                    let _ = self.readings_tx.send(reading);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Live relay lagged by {} readings", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
