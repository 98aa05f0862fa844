//! SQLite schema migrations.
//!
//! The schema version lives in `PRAGMA user_version`. `MIGRATIONS[i]` moves
//! the schema from version `i` to `i + 1`; all pending steps run in one
//! transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

const MIGRATIONS: &[&str] = &[
    // v1: one row per record; `seq` is the commit sequence snapshot
    // cutoffs compare against.
    r#"
    CREATE TABLE records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        hash BLOB NOT NULL UNIQUE,
        prev_hash BLOB NOT NULL,     -- all zeros for a first record
        rec_no INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,  -- writer clock, unix ms
        accuracy REAL NOT NULL,
        value BLOB NOT NULL,
        signature BLOB NOT NULL,     -- all zeros when unsigned
        ingested_at INTEGER NOT NULL -- local clock, unix ms
    );

    CREATE INDEX idx_records_prev_hash ON records(prev_hash);
    "#,
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring `conn` up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            found, CURRENT_VERSION
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, sql) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        tx.execute_batch(sql)
            .map_err(|e| StoreError::Migration(format!("v{}: {}", version + 1, e)))?;
        tracing::debug!(version = version + 1, "applied schema migration");
    }
    // PRAGMA does not take bound parameters.
    tx.execute_batch(&format!("PRAGMA user_version = {}", CURRENT_VERSION))?;
    tx.commit()?;

    Ok(())
}
