//! Database schema and migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Each entry of
//! [`MIGRATIONS`] moves the database up one version and runs in its own
//! transaction.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

/// Ordered migrations; index `n` upgrades version `n` to `n + 1`.
///
/// Rows are append-only. `id` is AUTOINCREMENT so ids are never reused and
/// grow strictly in insertion order.
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        value REAL NOT NULL,
        timestamp_ms INTEGER NOT NULL
    );
    CREATE INDEX idx_readings_kind_time ON readings(kind, timestamp_ms);
"#];

/// Schema version after all migrations have run.
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring `conn` up to [`SCHEMA_VERSION`].
pub fn initialize(conn: &mut Connection) -> Result<()> {
    let current = user_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(Error::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let target = index as u32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        info!("Database schema migrated to version {}", target);
    }

    Ok(())
}

fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
