//! History store abstraction and reactive windowed queries.
//!
//! A [`HistoryStore`] is append-only. Range queries return readings of one
//! kind with `timestamp >= now - window`, ascending by timestamp. Every
//! successful append is also published on a broadcast channel so that
//! [`watch_history`] can keep a window current without re-querying.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use airstation_types::{PersistedReading, Reading, SensorKind};

use crate::error::Result;

/// Append-only reading history with time-windowed range queries.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a reading and return it with its assigned id.
    ///
    /// Failures are reported to the caller and never retried here.
    async fn append(&self, reading: Reading) -> Result<PersistedReading>;

    /// All stored readings of `kind` with `timestamp >= since`, ascending.
    async fn query_since(
        &self,
        kind: SensorKind,
        since: OffsetDateTime,
    ) -> Result<Vec<PersistedReading>>;

    /// Receiver for every reading appended after this call.
    fn subscribe_appends(&self) -> broadcast::Receiver<PersistedReading>;

    /// Readings of `kind` from the last `window`, ascending by timestamp.
    async fn query(&self, kind: SensorKind, window: Duration) -> Result<Vec<Reading>> {
        let since = window_start(OffsetDateTime::now_utc(), window);
        let rows = self.query_since(kind, since).await?;
        Ok(rows.into_iter().map(|row| row.reading).collect())
    }

    /// Most recent stored reading of `kind`, if any.
    async fn latest(&self, kind: SensorKind) -> Result<Option<PersistedReading>> {
        let rows = self.query_since(kind, OffsetDateTime::UNIX_EPOCH).await?;
        Ok(rows.last().copied())
    }
}

/// Start of a window ending at `now`.
///
/// Windows too large to represent reach back to the Unix epoch.
pub fn window_start(now: OffsetDateTime, window: Duration) -> OffsetDateTime {
    time::Duration::try_from(window)
        .ok()
        .and_then(|span| now.checked_sub(span))
        .map_or(OffsetDateTime::UNIX_EPOCH, |start| {
            start.max(OffsetDateTime::UNIX_EPOCH)
        })
}

/// Arithmetic mean of the reading values, `None` when empty.
pub fn mean(readings: &[Reading]) -> Option<f64> {
    if readings.is_empty() {
        return None;
    }
    let sum: f64 = readings.iter().map(|r| r.value).sum();
    Some(sum / readings.len() as f64)
}

struct WindowWatch {
    store: Arc<dyn HistoryStore>,
    kind: SensorKind,
    window: Duration,
    appends: broadcast::Receiver<PersistedReading>,
    entries: Vec<PersistedReading>,
    primed: bool,
}

impl WindowWatch {
    fn snapshot(&self) -> Vec<Reading> {
        self.entries.iter().map(|row| row.reading).collect()
    }

    fn evict_expired(&mut self) {
        let start = window_start(OffsetDateTime::now_utc(), self.window);
        self.entries.retain(|row| row.reading.timestamp >= start);
    }

    /// Insert keeping ascending timestamp order; returns false for duplicates.
    fn insert(&mut self, row: PersistedReading) -> bool {
        if self.entries.iter().any(|existing| existing.id == row.id) {
            return false;
        }
        let at = self
            .entries
            .partition_point(|existing| existing.reading.timestamp <= row.reading.timestamp);
        self.entries.insert(at, row);
        true
    }

    async fn reload(&mut self) {
        let since = window_start(OffsetDateTime::now_utc(), self.window);
        match self.store.query_since(self.kind, since).await {
            Ok(rows) => self.entries = rows,
            Err(e) => warn!("Failed to reload {} history window: {}", self.kind, e),
        }
    }

    async fn next_window(&mut self) -> Option<Vec<Reading>> {
        if !self.primed {
            self.primed = true;
            return Some(self.snapshot());
        }

        loop {
            match self.appends.recv().await {
                Ok(row) if row.reading.kind == self.kind => {
                    if self.insert(row) {
                        self.evict_expired();
                        return Some(self.snapshot());
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("History watch lagged by {}, reloading window", skipped);
                    self.reload().await;
                    self.evict_expired();
                    return Some(self.snapshot());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Watch the last `window` of `kind` readings.
///
/// Yields the current window first, then the refreshed window after every
/// matching append. The append subscription is taken before the snapshot
/// query, so no append is missed; appends already in the snapshot are
/// ignored by id.
pub async fn watch_history(
    store: Arc<dyn HistoryStore>,
    kind: SensorKind,
    window: Duration,
) -> Result<BoxStream<'static, Vec<Reading>>> {
    let appends = store.subscribe_appends();
    let since = window_start(OffsetDateTime::now_utc(), window);
    let entries = store.query_since(kind, since).await?;

    let state = WindowWatch {
        store,
        kind,
        window,
        appends,
        entries,
        primed: false,
    };

    Ok(stream::unfold(state, |mut state| async move {
        let window = state.next_window().await?;
        Some((window, state))
    })
    .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryHistory;

    fn ago(secs: i64) -> OffsetDateTime {
        OffsetDateTime::now_utc() - time::Duration::seconds(secs)
    }

    #[test]
    fn test_window_start_saturates() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(window_start(now, Duration::ZERO), now);
        assert_eq!(
            window_start(now, Duration::from_secs(u64::MAX)),
            OffsetDateTime::UNIX_EPOCH
        );
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        let readings: Vec<Reading> = [10.0, 20.0, 30.0]
            .into_iter()
            .map(|v| Reading::now(SensorKind::Pm25, v))
            .collect();
        assert_eq!(mean(&readings), Some(20.0));
    }

    #[tokio::test]
    async fn test_query_window_and_order() {
        let history = MemoryHistory::new();
        history.seed(Reading::new(SensorKind::Co, 1.0, ago(900)));
        history.seed(Reading::new(SensorKind::Co, 3.0, ago(60)));
        history.seed(Reading::new(SensorKind::Co, 2.0, ago(300)));
        history.seed(Reading::new(SensorKind::Pm25, 9.0, ago(30)));

        let readings = history
            .query(SensorKind::Co, Duration::from_secs(600))
            .await
            .unwrap();
        let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_latest() {
        let history = MemoryHistory::new();
        assert!(history.latest(SensorKind::Co).await.unwrap().is_none());

        history.seed(Reading::new(SensorKind::Co, 1.0, ago(120)));
        history.seed(Reading::new(SensorKind::Co, 4.0, ago(10)));
        let latest = history.latest(SensorKind::Co).await.unwrap().unwrap();
        assert_eq!(latest.reading.value, 4.0);
    }

    #[tokio::test]
    async fn test_watch_emits_snapshot_then_increments() {
        let history = Arc::new(MemoryHistory::new());
        history.seed(Reading::new(SensorKind::Pm25, 10.0, ago(120)));
        history.seed(Reading::new(SensorKind::Pm25, 99.0, ago(3600)));

        let mut watch = watch_history(history.clone(), SensorKind::Pm25, Duration::from_secs(600))
            .await
            .unwrap();

        let first = watch.next().await.unwrap();
        assert_eq!(first.iter().map(|r| r.value).collect::<Vec<_>>(), vec![10.0]);

        history.append(Reading::now(SensorKind::Co, 5.0)).await.unwrap();
        history.append(Reading::now(SensorKind::Pm25, 20.0)).await.unwrap();

        let second = watch.next().await.unwrap();
        assert_eq!(
            second.iter().map(|r| r.value).collect::<Vec<_>>(),
            vec![10.0, 20.0]
        );
    }

    #[tokio::test]
    async fn test_watch_keeps_ascending_order_for_late_rows() {
        let history = Arc::new(MemoryHistory::new());
        history.seed(Reading::new(SensorKind::Co, 2.0, ago(60)));

        let mut watch = watch_history(history.clone(), SensorKind::Co, Duration::from_secs(600))
            .await
            .unwrap();
        watch.next().await.unwrap();

        history
            .append(Reading::new(SensorKind::Co, 1.0, ago(300)))
            .await
            .unwrap();
        let window = watch.next().await.unwrap();
        assert_eq!(window.iter().map(|r| r.value).collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_watch_fails_when_snapshot_fails() {
        let history = Arc::new(MemoryHistory::new());
        history.fail_queries(true);
        let result = watch_history(history, SensorKind::Co, Duration::from_secs(60)).await;
        assert!(result.is_err());
    }
}
