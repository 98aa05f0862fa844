//! SQLite implementation of the LogStore trait.
//!
//! This is the durable backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. The `seq` column (the rowid)
//! is the commit sequence that snapshot cutoffs compare against.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use capsule_core::{Ed25519Signature, Metadata, Record, RecordHash, RecordHeader};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, LogStore, SnapshotId, StoreSnapshot, WriteSummary};

const RECORD_COLUMNS: &str = "hash, prev_hash, rec_no, timestamp, accuracy, value, signature";
const METADATA_COLUMNS: &str = "hash, prev_hash, rec_no, timestamp";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    snapshots: Mutex<HashSet<u64>>,
    next_snapshot: AtomicU64,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            snapshots: Mutex::new(HashSet::new()),
            next_snapshot: AtomicU64::new(0),
        }
    }

    /// Run a blocking operation on the connection from a worker thread.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("connection mutex: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

fn hash_column(row: &rusqlite::Row<'_>, idx: &str) -> rusqlite::Result<RecordHash> {
    let bytes: Vec<u8> = row.get(idx)?;
    RecordHash::try_from(bytes.as_slice()).map_err(|_| {
        rusqlite::Error::InvalidColumnType(0, idx.into(), rusqlite::types::Type::Blob)
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let signature_bytes: Vec<u8> = row.get("signature")?;
    let signature = Ed25519Signature::try_from(signature_bytes.as_slice()).map_err(|_| {
        rusqlite::Error::InvalidColumnType(6, "signature".into(), rusqlite::types::Type::Blob)
    })?;
    let value: Vec<u8> = row.get("value")?;

    Ok(Record {
        hash: hash_column(row, "hash")?,
        header: RecordHeader {
            prev_hash: hash_column(row, "prev_hash")?,
            rec_no: row.get::<_, i64>("rec_no")? as u64,
            timestamp: row.get("timestamp")?,
            accuracy: row.get("accuracy")?,
        },
        value: Bytes::from(value),
        signature,
    })
}

fn row_to_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<Metadata> {
    Ok(Metadata {
        hash: hash_column(row, "hash")?,
        prev_hash: hash_column(row, "prev_hash")?,
        rec_no: row.get::<_, i64>("rec_no")? as u64,
        timestamp: row.get("timestamp")?,
    })
}

fn select_by_hashes<T>(
    conn: &Connection,
    columns: &str,
    hashes: &[RecordHash],
    map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {} FROM records WHERE hash = ?1", columns))?;
    let mut out = Vec::with_capacity(hashes.len());
    for hash in hashes {
        if let Some(item) = stmt.query_row(params![hash.as_bytes().as_slice()], map).optional()? {
            out.push(item);
        }
    }
    Ok(out)
}

fn max_seq(conn: &Connection) -> Result<u64> {
    let seq: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM records", [], |row| row.get(0))?;
    Ok(seq as u64)
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn read_records(&self, hashes: &[RecordHash]) -> Result<Vec<Record>> {
        let hashes = hashes.to_vec();
        self.run(move |conn| select_by_hashes(conn, RECORD_COLUMNS, &hashes, row_to_record))
            .await
    }

    async fn read_metadata(&self, hashes: &[RecordHash]) -> Result<Vec<Metadata>> {
        let hashes = hashes.to_vec();
        self.run(move |conn| select_by_hashes(conn, METADATA_COLUMNS, &hashes, row_to_metadata))
            .await
    }

    async fn read_all_records(&self) -> Result<Vec<Record>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM records ORDER BY seq", RECORD_COLUMNS))?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
        })
        .await
    }

    async fn read_all_metadata(&self) -> Result<Vec<Metadata>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM records ORDER BY seq", METADATA_COLUMNS))?;
            let rows = stmt.query_map([], row_to_metadata)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
        })
        .await
    }

    async fn write_records(&self, records: &[Record]) -> Result<WriteSummary> {
        let records = records.to_vec();
        self.run(move |conn| {
            let now = crate::now_millis();
            let tx = conn.transaction()?;
            let mut summary = WriteSummary::default();
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO records (
                        hash, prev_hash, rec_no, timestamp, accuracy, value, signature, ingested_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for record in &records {
                    let changed = stmt.execute(params![
                        record.hash.as_bytes().as_slice(),
                        record.header.prev_hash.as_bytes().as_slice(),
                        record.header.rec_no as i64,
                        record.header.timestamp,
                        record.header.accuracy,
                        record.value.as_ref(),
                        record.signature.as_bytes().as_slice(),
                        now,
                    ])?;
                    summary.record(if changed == 1 {
                        InsertResult::Inserted
                    } else {
                        InsertResult::AlreadyExists
                    });
                }
            }
            tx.commit()?;
            Ok(summary)
        })
        .await
    }

    async fn record_count(&self) -> Result<u64> {
        self.run(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    async fn check_record_existence(&self, cutoff: u64, hash: &RecordHash) -> Result<bool> {
        let hash = *hash;
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM records WHERE hash = ?1 AND seq <= ?2",
                    params![hash.as_bytes().as_slice(), clamp(cutoff)],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn find_metadata(&self, hash: &RecordHash, cutoff: u64) -> Result<Option<Metadata>> {
        let hash = *hash;
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM records WHERE hash = ?1 AND seq <= ?2", METADATA_COLUMNS),
                params![hash.as_bytes().as_slice(), clamp(cutoff)],
                row_to_metadata,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_next_records(&self, hash: &RecordHash, cutoff: u64) -> Result<Vec<Metadata>> {
        let hash = *hash;
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM records WHERE prev_hash = ?1 AND seq <= ?2 ORDER BY seq",
                METADATA_COLUMNS
            ))?;
            let rows =
                stmt.query_map(params![hash.as_bytes().as_slice(), clamp(cutoff)], row_to_metadata)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
        })
        .await
    }

    async fn create_snapshot(&self) -> Result<StoreSnapshot> {
        let (cutoff, begins, ends) = self
            .run(|conn| {
                // One read transaction so the cutoff and frontier agree.
                let tx = conn.transaction()?;
                let cutoff = max_seq(&tx)?;
                let seq = clamp(cutoff);

                let begins = {
                    let mut stmt = tx.prepare_cached(
                        "SELECT r.hash, r.prev_hash FROM records r
                         WHERE r.seq <= ?1
                           AND (r.prev_hash = ?2
                                OR NOT EXISTS (SELECT 1 FROM records p
                                               WHERE p.hash = r.prev_hash AND p.seq <= ?1))",
                    )?;
                    let rows = stmt.query_map(
                        params![seq, RecordHash::NULL.as_bytes().as_slice()],
                        |row| Ok((hash_column(row, "hash")?, hash_column(row, "prev_hash")?)),
                    )?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };

                let ends = {
                    let mut stmt = tx.prepare_cached(
                        "SELECT r.hash FROM records r
                         WHERE r.seq <= ?1
                           AND NOT EXISTS (SELECT 1 FROM records c
                                           WHERE c.prev_hash = r.hash AND c.seq <= ?1)",
                    )?;
                    let rows = stmt.query_map(params![seq], |row| hash_column(row, "hash"))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };

                tx.commit()?;
                Ok((cutoff, begins, ends))
            })
            .await?;

        let id = self.next_snapshot.fetch_add(1, Ordering::Relaxed) + 1;
        self.snapshots
            .lock()
            .map_err(|e| StoreError::Poisoned(format!("snapshot registry: {}", e)))?
            .insert(id);

        Ok(StoreSnapshot {
            id: SnapshotId(id),
            cutoff,
            begins,
            ends,
        })
    }

    fn destroy_snapshot(&self, id: SnapshotId) {
        // Cutoff queries hold no SQLite resources; only the registry entry goes.
        let mut open = match self.snapshots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        open.remove(&id.0);
    }

    fn open_snapshots(&self) -> usize {
        match self.snapshots.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

fn clamp(cutoff: u64) -> i64 {
    cutoff.min(i64::MAX as u64) as i64
}
