//! Rate-limited write path from the live feed into the history store.
//!
//! For each sensor kind at most one reading is persisted per interval: a
//! reading is accepted only if more than `interval` has passed since the last
//! accepted reading of the same kind. Everything else is dropped; there is no
//! trailing write of the latest value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use airstation_types::{PersistedReading, Reading, SensorKind};

use crate::error::Result;
use crate::history::HistoryStore;

/// Minimum spacing between persisted readings of the same kind.
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_secs(5);

/// Counters describing what the controller did with incoming readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceStats {
    /// Readings forwarded to the store and written.
    pub accepted: u64,
    /// Readings discarded by the rate limit.
    pub dropped: u64,
    /// Readings forwarded but rejected by the store.
    pub failed: u64,
}

/// Per-kind at-most-once-per-interval persistence policy.
pub struct PersistenceController {
    store: Arc<dyn HistoryStore>,
    interval: Duration,
    last_written: [Mutex<Option<Instant>>; SensorKind::COUNT],
    accepted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl PersistenceController {
    /// Create a controller writing to `store` with the default interval.
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self::with_interval(store, DEFAULT_DEBOUNCE_INTERVAL)
    }

    /// Create a controller with a custom interval.
    pub fn with_interval(store: Arc<dyn HistoryStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            last_written: std::array::from_fn(|_| Mutex::new(None)),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check-and-set the last-write slot of `kind` at `now`.
    ///
    /// The slot is updated before the append is attempted, so a failed write
    /// still consumes the interval.
    fn admit_at(&self, kind: SensorKind, now: Instant) -> bool {
        let mut slot = self.last_written[kind.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *slot {
            Some(last) if now.saturating_duration_since(last) <= self.interval => false,
            _ => {
                *slot = Some(now);
                true
            }
        }
    }

    /// Offer a reading; returns the persisted row when it was written.
    ///
    /// Store failures are counted and returned; they are not retried.
    pub async fn on_reading(&self, reading: Reading) -> Result<Option<PersistedReading>> {
        if !self.admit_at(reading.kind, Instant::now()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropping {} (rate limited)", reading);
            return Ok(None);
        }

        match self.store.append(reading).await {
            Ok(row) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!("Persisted {} as #{}", reading, row.id);
                Ok(Some(row))
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Current counters.
    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Consume live readings until cancelled or the feed closes.
    pub async fn run(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<Reading>,
        cancel: CancellationToken,
    ) {
        info!("Persistence controller started ({:?} interval)", self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Persistence controller cancelled");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(reading) => {
                        if let Err(e) = self.on_reading(reading).await {
                            error!("Failed to persist {}: {}", reading, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Persistence controller lagged, skipped {} readings", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Live feed closed");
                        break;
                    }
                }
            }
        }
        let stats = self.stats();
        info!(
            "Persistence controller stopped: {} written, {} dropped, {} failed",
            stats.accepted, stats.dropped, stats.failed
        );
    }
}

impl std::fmt::Debug for PersistenceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceController")
            .field("interval", &self.interval)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryHistory;
    use proptest::prelude::*;

    fn controller() -> (Arc<MemoryHistory>, PersistenceController) {
        let history = Arc::new(MemoryHistory::new());
        let controller = PersistenceController::new(history.clone());
        (history, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_reading_is_written() {
        let (history, controller) = controller();
        let row = controller
            .on_reading(Reading::now(SensorKind::Co, 3.0))
            .await
            .unwrap();
        assert!(row.is_some());
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_kind_within_interval_is_dropped() {
        let (history, controller) = controller();
        controller.on_reading(Reading::now(SensorKind::Co, 1.0)).await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        let row = controller.on_reading(Reading::now(SensorKind::Co, 2.0)).await.unwrap();
        assert!(row.is_none());

        // Exactly at the interval is still inside it.
        tokio::time::advance(Duration::from_secs(2)).await;
        let row = controller.on_reading(Reading::now(SensorKind::Co, 3.0)).await.unwrap();
        assert!(row.is_none());

        tokio::time::advance(Duration::from_millis(1)).await;
        let row = controller.on_reading(Reading::now(SensorKind::Co, 4.0)).await.unwrap();
        assert_eq!(row.map(|r| r.reading.value), Some(4.0));

        assert_eq!(history.len(), 2);
        assert_eq!(
            controller.stats(),
            PersistenceStats {
                accepted: 2,
                dropped: 2,
                failed: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_independent() {
        let (history, controller) = controller();
        controller.on_reading(Reading::now(SensorKind::Co, 1.0)).await.unwrap();
        controller.on_reading(Reading::now(SensorKind::Pm25, 10.0)).await.unwrap();
        controller.on_reading(Reading::now(SensorKind::Pm10, 20.0)).await.unwrap();
        controller.on_reading(Reading::now(SensorKind::Co, 2.0)).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_is_reported_and_consumes_interval() {
        let (history, controller) = controller();
        history.fail_appends(true);

        let err = controller
            .on_reading(Reading::now(SensorKind::Co, 1.0))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(controller.stats().failed, 1);

        history.fail_appends(false);
        let row = controller.on_reading(Reading::now(SensorKind::Co, 2.0)).await.unwrap();
        assert!(row.is_none());
        assert!(history.is_empty());
        assert_eq!(controller.stats().dropped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_kind_writes_once() {
        let history = Arc::new(MemoryHistory::new());
        let controller = Arc::new(PersistenceController::new(history.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    controller
                        .on_reading(Reading::now(SensorKind::Pm25, f64::from(i)))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(history.len(), 1);
        let stats = controller.stats();
        assert_eq!((stats.accepted, stats.dropped), (1, 15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_consumes_until_cancelled() {
        let history = Arc::new(MemoryHistory::new());
        let controller = Arc::new(PersistenceController::new(history.clone()));
        let (tx, rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(controller.clone().run(rx, cancel.clone()));

        tx.send(Reading::now(SensorKind::Lpg, 100.0)).unwrap();
        tx.send(Reading::now(SensorKind::Lpg, 101.0)).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        tx.send(Reading::now(SensorKind::Lpg, 102.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        cancel.cancel();
        task.await.unwrap();

        let values: Vec<f64> = history.all().iter().map(|r| r.reading.value).collect();
        assert_eq!(values, vec![100.0, 102.0]);
    }

    proptest! {
        #[test]
        fn prop_accepted_writes_are_spaced(mut offsets in proptest::collection::vec(0u64..60_000, 1..64)) {
            offsets.sort_unstable();
            let controller = PersistenceController::new(Arc::new(MemoryHistory::new()));
            let base = Instant::now();

            let accepted: Vec<u64> = offsets
                .iter()
                .copied()
                .filter(|ms| {
                    controller.admit_at(SensorKind::Pm25, base + Duration::from_millis(*ms))
                })
                .collect();

            prop_assert_eq!(accepted.first(), offsets.first());
            for pair in accepted.windows(2) {
                prop_assert!(pair[1] - pair[0] > 5_000);
            }
        }
    }
}
