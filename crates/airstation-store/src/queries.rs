//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use airstation_store::{HistoryQuery, Store};
//! use airstation_types::SensorKind;
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let ten_minutes_ago = OffsetDateTime::now_utc() - Duration::minutes(10);
//!
//! let query = HistoryQuery::new()
//!     .kind(SensorKind::Pm25)
//!     .since(ten_minutes_ago)
//!     .oldest_first();
//!
//! let window = store.query_history(&query)?;
//! # Ok::<(), airstation_store::Error>(())
//! ```

use time::OffsetDateTime;

use airstation_types::SensorKind;

/// Fluent query builder for persisted readings.
///
/// By default, queries return results ordered by timestamp descending
/// (newest first). Ties are broken by row id in the same direction.
#[derive(Debug, Default, Clone)]
pub struct HistoryQuery {
    pub kind: Option<SensorKind>,
    pub since: Option<OffsetDateTime>,
    pub until: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    /// Descending by timestamp when set (the default).
    pub newest_first: bool,
}

impl HistoryQuery {
    /// Every stored reading of every kind, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only include readings of `kind`.
    pub fn kind(mut self, kind: SensorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Lower bound on the reading timestamp, inclusive.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Upper bound on the reading timestamp, inclusive.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Return at most `limit` rows.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Chronological order, as window consumers expect.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL statement and its parameters.
    pub(crate) fn build(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(kind) = self.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp_ms >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp_ms <= ?");
            params.push(Box::new(to_millis(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let order = if self.newest_first { "DESC" } else { "ASC" };
        let mut sql = format!(
            "SELECT id, kind, value, timestamp_ms FROM readings {} \
             ORDER BY timestamp_ms {order}, id {order}",
            where_clause
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        (sql, params)
    }
}

/// Unix milliseconds, rounded down.
pub(crate) fn to_millis(time: OffsetDateTime) -> i64 {
    time.unix_timestamp_nanos().div_euclid(1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_new_defaults() {
        let query = HistoryQuery::new();
        assert!(query.kind.is_none());
        assert!(query.since.is_none());
        assert!(query.until.is_none());
        assert!(query.limit.is_none());
        assert!(query.newest_first);
    }

    #[test]
    fn test_build_without_filters() {
        let (sql, params) = HistoryQuery::new().build();
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("ORDER BY timestamp_ms DESC, id DESC"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_with_all_filters() {
        let (sql, params) = HistoryQuery::new()
            .kind(SensorKind::Co)
            .since(datetime!(2024-01-01 0:00 UTC))
            .until(datetime!(2024-01-02 0:00 UTC))
            .limit(5)
            .oldest_first()
            .build();

        assert!(sql.contains("WHERE kind = ? AND timestamp_ms >= ? AND timestamp_ms <= ?"));
        assert!(sql.contains("ORDER BY timestamp_ms ASC, id ASC"));
        assert!(sql.ends_with("LIMIT 5"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_to_millis_rounds_down() {
        let t = datetime!(2024-01-01 0:00:00.0019 UTC);
        assert_eq!(to_millis(t) % 1000, 1);
    }
}
