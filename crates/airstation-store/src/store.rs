//! Main store implementation.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use time::OffsetDateTime;
use tracing::{debug, info};

use airstation_types::{PersistedReading, Reading, SensorKind};

use crate::error::{Error, Result};
use crate::queries::{HistoryQuery, to_millis};
use crate::schema;

/// Aggregates over the readings of one kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindStats {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
}

/// SQLite-based store for persisted readings.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let mut conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&mut conn)?;

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::initialize(&mut conn)?;
        Ok(Self { conn, path: None })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a reading and return it with its assigned id.
    pub fn insert_reading(&self, reading: &Reading) -> Result<PersistedReading> {
        self.conn.execute(
            "INSERT INTO readings (kind, value, timestamp_ms) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                reading.kind.as_str(),
                reading.value,
                to_millis(reading.timestamp)
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Inserted {} as #{}", reading, id);
        Ok(PersistedReading::new(id, *reading))
    }

    /// Query readings with filters.
    pub fn query_history(&self, query: &HistoryQuery) -> Result<Vec<PersistedReading>> {
        let (sql, params) = query.build();
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, kind, value, timestamp_ms)| row_to_reading(id, &kind, value, timestamp_ms))
            .collect()
    }

    /// Most recent reading of `kind`.
    pub fn latest(&self, kind: SensorKind) -> Result<Option<PersistedReading>> {
        let query = HistoryQuery::new().kind(kind).limit(1);
        Ok(self.query_history(&query)?.pop())
    }

    /// Count readings, optionally of one kind.
    pub fn count(&self, kind: Option<SensorKind>) -> Result<u64> {
        let count: i64 = match kind {
            Some(kind) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE kind = ?",
                [kind.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Count, min, max and mean of `kind` readings at or after `since`.
    pub fn stats(&self, kind: SensorKind, since: OffsetDateTime) -> Result<KindStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*), MIN(value), MAX(value), AVG(value) FROM readings
             WHERE kind = ?1 AND timestamp_ms >= ?2",
            rusqlite::params![kind.as_str(), to_millis(since)],
            |row| {
                Ok(KindStats {
                    count: row.get::<_, i64>(0)? as u64,
                    min: row.get(1)?,
                    max: row.get(2)?,
                    avg: row.get(3)?,
                })
            },
        )?;

        Ok(stats)
    }
}

fn row_to_reading(id: i64, kind: &str, value: f64, timestamp_ms: i64) -> Result<PersistedReading> {
    let kind: SensorKind = kind
        .parse()
        .map_err(|_| Error::UnknownKind(kind.to_string()))?;
    let timestamp = OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_ms) * 1_000_000)
        .map_err(|_| Error::InvalidTimestamp(timestamp_ms))?;
    Ok(PersistedReading::new(id, Reading::new(kind, value, timestamp)))
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    fn at(secs: i64) -> OffsetDateTime {
        datetime!(2024-06-01 12:00 UTC) + Duration::seconds(secs)
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_reading(&Reading::new(SensorKind::Co, 1.0, at(0))).unwrap();
        let b = store.insert_reading(&Reading::new(SensorKind::Co, 2.0, at(0))).unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.count(None).unwrap(), 2);
    }

    #[test]
    fn test_window_query_is_ascending_and_inclusive() {
        let store = Store::open_in_memory().unwrap();
        store.insert_reading(&Reading::new(SensorKind::Pm25, 3.0, at(30))).unwrap();
        store.insert_reading(&Reading::new(SensorKind::Pm25, 1.0, at(10))).unwrap();
        store.insert_reading(&Reading::new(SensorKind::Pm25, 0.5, at(5))).unwrap();
        store.insert_reading(&Reading::new(SensorKind::Pm10, 9.0, at(20))).unwrap();
        store.insert_reading(&Reading::new(SensorKind::Pm25, 2.0, at(20))).unwrap();

        let query = HistoryQuery::new()
            .kind(SensorKind::Pm25)
            .since(at(10))
            .oldest_first();
        let rows = store.query_history(&query).unwrap();

        let values: Vec<f64> = rows.iter().map(|r| r.reading.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert!(rows.iter().all(|r| r.reading.kind == SensorKind::Pm25));
    }

    #[test]
    fn test_timestamps_round_trip_at_millisecond_precision() {
        let store = Store::open_in_memory().unwrap();
        let ts = datetime!(2024-06-01 12:00:00.123 UTC);
        store.insert_reading(&Reading::new(SensorKind::Humidity, 40.0, ts)).unwrap();

        let latest = store.latest(SensorKind::Humidity).unwrap().unwrap();
        assert_eq!(latest.reading.timestamp, ts);
        assert_eq!(latest.reading.unit(), "%");
    }

    #[test]
    fn test_latest_picks_newest_timestamp() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest(SensorKind::Co).unwrap().is_none());

        store.insert_reading(&Reading::new(SensorKind::Co, 5.0, at(100))).unwrap();
        store.insert_reading(&Reading::new(SensorKind::Co, 4.0, at(50))).unwrap();
        assert_eq!(store.latest(SensorKind::Co).unwrap().unwrap().reading.value, 5.0);
    }

    #[test]
    fn test_stats() {
        let store = Store::open_in_memory().unwrap();
        let empty = store.stats(SensorKind::Lpg, at(0)).unwrap();
        assert_eq!(empty.count, 0);
        assert!(empty.avg.is_none());

        for (i, value) in [100.0, 300.0, 200.0].into_iter().enumerate() {
            store
                .insert_reading(&Reading::new(SensorKind::Lpg, value, at(i as i64)))
                .unwrap();
        }
        let stats = store.stats(SensorKind::Lpg, at(0)).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Some(100.0));
        assert_eq!(stats.max, Some(300.0));
        assert_eq!(stats.avg, Some(200.0));
    }

    #[test]
    fn test_unknown_kind_row_is_an_error() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO readings (kind, value, timestamp_ms) VALUES ('radon', 1.0, 0)",
                [],
            )
            .unwrap();
        let err = store.query_history(&HistoryQuery::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownKind(kind) if kind == "radon"));
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let store = Store::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(path.exists());
    }
}
