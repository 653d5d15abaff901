//! Async [`HistoryStore`] adapter over the SQLite [`Store`].

use std::path::Path;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard, broadcast};

use airstation_core::HistoryStore;
use airstation_types::{PersistedReading, Reading, SensorKind};

use crate::error::Result;
use crate::queries::HistoryQuery;
use crate::store::Store;

const APPEND_CHANNEL_CAPACITY: usize = 256;

/// Shared SQLite history that publishes every append.
///
/// The connection sits behind an async mutex; statements are short and
/// indexed, so they run inline on the calling task.
pub struct SqliteHistory {
    store: Mutex<Store>,
    appends: broadcast::Sender<PersistedReading>,
}

impl SqliteHistory {
    pub fn new(store: Store) -> Self {
        let (appends, _) = broadcast::channel(APPEND_CHANNEL_CAPACITY);
        Self {
            store: Mutex::new(store),
            appends,
        }
    }

    /// Open or create a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    /// Direct access to the underlying store.
    ///
    /// Writes made through the guard are not published to watchers.
    pub async fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().await
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn append(&self, reading: Reading) -> airstation_core::Result<PersistedReading> {
        let store = self.store.lock().await;
        let row = store.insert_reading(&reading)?;
        // Published under the lock so watchers see ids in insertion order.
        let _ = self.appends.send(row);
        Ok(row)
    }

    async fn query_since(
        &self,
        kind: SensorKind,
        since: OffsetDateTime,
    ) -> airstation_core::Result<Vec<PersistedReading>> {
        let query = HistoryQuery::new().kind(kind).since(since).oldest_first();
        let store = self.store.lock().await;
        Ok(store.query_history(&query)?)
    }

    fn subscribe_appends(&self) -> broadcast::Receiver<PersistedReading> {
        self.appends.subscribe()
    }

    async fn latest(&self, kind: SensorKind) -> airstation_core::Result<Option<PersistedReading>> {
        let store = self.store.lock().await;
        Ok(store.latest(kind)?)
    }
}

impl std::fmt::Debug for SqliteHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHistory")
            .field("watchers", &self.appends.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use airstation_core::watch_history;
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_append_publishes_persisted_row() {
        let history = SqliteHistory::open_in_memory().unwrap();
        let mut rx = history.subscribe_appends();

        let row = history.append(Reading::now(SensorKind::Co, 12.0)).await.unwrap();
        let published = rx.recv().await.unwrap();
        assert_eq!(published, row);
        assert_eq!(history.lock().await.count(None).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_window_excludes_old_and_other_kinds() {
        let history = SqliteHistory::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();
        let old = now - time::Duration::minutes(30);

        history.append(Reading::new(SensorKind::Pm25, 99.0, old)).await.unwrap();
        history.append(Reading::new(SensorKind::Pm10, 50.0, now)).await.unwrap();
        history.append(Reading::new(SensorKind::Pm25, 10.0, now)).await.unwrap();

        let window = history
            .query(SensorKind::Pm25, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].value, 10.0);
    }

    #[tokio::test]
    async fn test_latest_uses_newest_timestamp() {
        let history = SqliteHistory::open_in_memory().unwrap();
        assert!(history.latest(SensorKind::Co).await.unwrap().is_none());

        let now = OffsetDateTime::now_utc();
        history.append(Reading::new(SensorKind::Co, 3.0, now)).await.unwrap();
        history
            .append(Reading::new(SensorKind::Co, 1.0, now - time::Duration::seconds(10)))
            .await
            .unwrap();

        let latest = history.latest(SensorKind::Co).await.unwrap().unwrap();
        assert_eq!(latest.reading.value, 3.0);
    }

    #[tokio::test]
    async fn test_watch_history_follows_appends() {
        let history = Arc::new(SqliteHistory::open_in_memory().unwrap());
        history.append(Reading::now(SensorKind::Pm25, 5.0)).await.unwrap();

        let store: Arc<dyn HistoryStore> = history.clone();
        let mut windows = watch_history(store, SensorKind::Pm25, Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(windows.next().await.unwrap().len(), 1);

        history.append(Reading::now(SensorKind::Co, 1.0)).await.unwrap();
        history.append(Reading::now(SensorKind::Pm25, 7.0)).await.unwrap();

        let window = windows.next().await.unwrap();
        let values: Vec<f64> = window.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![5.0, 7.0]);
    }

    #[tokio::test]
    async fn test_store_errors_map_to_storage() {
        let history = SqliteHistory::open_in_memory().unwrap();
        history
            .lock()
            .await
            .connection()
            .execute_batch("DROP TABLE readings")
            .unwrap();

        let err = history.append(Reading::now(SensorKind::Co, 1.0)).await.unwrap_err();
        assert!(matches!(err, airstation_core::Error::Storage(_)));
        assert!(err.is_retryable());
    }
}
