//! SQLite-based storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use daycache_core::{
    DataError, DateKey, FetchRecord, Payload, Result, StorageBackend, StoredFetch, Summary,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

/// SQLite-based storage for fetched datasets.
///
/// Metadata lives in `fetch_records` (one row per date, primary key on the
/// date) and payloads in `fetch_payloads`. Every `put` is a single
/// transaction, so readers see either the previous record or the new one.
/// Blocking calls run on `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) a SQLite store at the given path.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| DataError::StorageWrite(e.to_string()))?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DataError::StorageWrite(e.to_string()))?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DataError::StorageWrite(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS fetch_records (
                date TEXT PRIMARY KEY NOT NULL,
                source TEXT NOT NULL,
                record_count INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL,
                payload_ref TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| DataError::StorageWrite(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS fetch_payloads (
                payload_ref TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| DataError::StorageWrite(e.to_string()))?;

        debug!("SQLite storage schema initialized");
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// `on_err` picks the error variant for lock and task failures.
    async fn with_conn<T, F>(&self, on_err: fn(String) -> DataError, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| on_err(e.to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| on_err(e.to_string()))?
    }
}

const RECORD_COLUMNS: &str = "date, source, record_count, checksum, created_at, payload_ref";

/// Map a `fetch_records` row (in [`RECORD_COLUMNS`] order) to raw parts.
fn record_parts(row: &Row<'_>) -> rusqlite::Result<RecordParts> {
    Ok(RecordParts {
        date: row.get(0)?,
        source: row.get(1)?,
        record_count: row.get(2)?,
        checksum: row.get(3)?,
        created_at: row.get(4)?,
        payload_ref: row.get(5)?,
    })
}

/// Untyped columns of a `fetch_records` row.
struct RecordParts {
    date: String,
    source: String,
    record_count: i64,
    checksum: String,
    created_at: String,
    payload_ref: String,
}

impl RecordParts {
    fn into_record(self) -> Result<FetchRecord> {
        let record_count = usize::try_from(self.record_count).map_err(|e| {
            DataError::StorageRead(format!("Invalid record count {}: {e}", self.record_count))
        })?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                DataError::StorageRead(format!("Invalid timestamp '{}': {e}", self.created_at))
            })?;
        let date = self
            .date
            .parse::<DateKey>()
            .map_err(|e| DataError::StorageRead(e.to_string()))?;

        Ok(FetchRecord {
            date,
            source: self.source,
            record_count,
            checksum: self.checksum,
            created_at,
            payload_ref: self.payload_ref,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    #[instrument(skip(self), fields(date = %date))]
    async fn get(&self, date: DateKey) -> Result<Option<StoredFetch>> {
        let date_str = date.to_string();

        let row = self
            .with_conn(DataError::StorageRead, move |conn| {
                conn.query_row(
                    "SELECT r.date, r.source, r.record_count, r.checksum, r.created_at,
                            r.payload_ref, p.data
                     FROM fetch_records r
                     LEFT JOIN fetch_payloads p ON p.payload_ref = r.payload_ref
                     WHERE r.date = ?1",
                    params![date_str],
                    |row| Ok((record_parts(row)?, row.get::<_, Option<Vec<u8>>>(6)?)),
                )
                .optional()
                .map_err(|e| DataError::StorageRead(e.to_string()))
            })
            .await?;

        let Some((parts, data)) = row else {
            debug!("No stored record found");
            return Ok(None);
        };

        let record = parts.into_record()?;
        let data = data.ok_or_else(|| {
            DataError::StorageRead(format!("Missing payload {}", record.payload_ref))
        })?;
        let stored = StoredFetch {
            record,
            payload: Payload::from_bytes(data),
        };
        stored.verify()?;

        debug!(records = stored.record.record_count, "Found stored record");
        Ok(Some(stored))
    }

    #[instrument(skip(self, payload, summary), fields(date = %date, bytes = payload.len()))]
    async fn put(
        &self,
        date: DateKey,
        payload: &Payload,
        summary: &Summary,
    ) -> Result<FetchRecord> {
        let candidate = FetchRecord::new(date, payload, summary);
        let data = payload.as_bytes().to_vec();

        let (record, changed) = self
            .with_conn(DataError::StorageWrite, move |conn| {
                let write_err = |e: rusqlite::Error| DataError::StorageWrite(e.to_string());
                let tx = conn.transaction().map_err(write_err)?;

                let existing = tx
                    .query_row(
                        &format!("SELECT {RECORD_COLUMNS} FROM fetch_records WHERE date = ?1"),
                        params![candidate.date.to_string()],
                        record_parts,
                    )
                    .optional()
                    .map_err(write_err)?;
                let previous_ref = existing.as_ref().map(|parts| parts.payload_ref.clone());

                // An unreadable existing row is overwritten rather than compared.
                if let Some(existing) = existing
                    .and_then(|parts| parts.into_record().ok())
                    .filter(|record| record.same_content(&candidate))
                {
                    // Heal a missing payload row without touching the record.
                    tx.execute(
                        "INSERT OR IGNORE INTO fetch_payloads (payload_ref, data) VALUES (?1, ?2)",
                        params![existing.payload_ref, data],
                    )
                    .map_err(write_err)?;
                    tx.commit().map_err(write_err)?;
                    return Ok((existing, false));
                }

                let record_count = i64::try_from(candidate.record_count)
                    .map_err(|e| DataError::StorageWrite(e.to_string()))?;

                tx.execute(
                    "INSERT INTO fetch_payloads (payload_ref, data) VALUES (?1, ?2)
                     ON CONFLICT(payload_ref) DO UPDATE SET data = excluded.data",
                    params![candidate.payload_ref, data],
                )
                .map_err(write_err)?;

                tx.execute(
                    &format!(
                        "INSERT INTO fetch_records ({RECORD_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(date) DO UPDATE SET
                             source = excluded.source,
                             record_count = excluded.record_count,
                             checksum = excluded.checksum,
                             created_at = excluded.created_at,
                             payload_ref = excluded.payload_ref"
                    ),
                    params![
                        candidate.date.to_string(),
                        candidate.source,
                        record_count,
                        candidate.checksum,
                        candidate.created_at.to_rfc3339(),
                        candidate.payload_ref,
                    ],
                )
                .map_err(write_err)?;

                if let Some(previous_ref) =
                    previous_ref.filter(|r| *r != candidate.payload_ref)
                {
                    tx.execute(
                        "DELETE FROM fetch_payloads WHERE payload_ref = ?1",
                        params![previous_ref],
                    )
                    .map_err(write_err)?;
                }

                tx.commit().map_err(write_err)?;
                Ok((candidate, true))
            })
            .await?;

        if changed {
            debug!(checksum = %record.checksum, "Stored record");
        } else {
            debug!(checksum = %record.checksum, "Content unchanged, keeping stored record");
        }
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn list_dates(&self) -> Result<Vec<DateKey>> {
        let raw = self
            .with_conn(DataError::StorageRead, |conn| {
                let read_err = |e: rusqlite::Error| DataError::StorageRead(e.to_string());
                let mut stmt = conn
                    .prepare("SELECT date FROM fetch_records ORDER BY date ASC")
                    .map_err(read_err)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(read_err)?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
                    .map_err(read_err)
            })
            .await?;

        let mut dates = raw
            .iter()
            .map(|s| {
                s.parse::<DateKey>()
                    .map_err(|e| DataError::StorageRead(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        dates.sort_unstable();

        debug!("Found {} stored dates", dates.len());
        Ok(dates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[tokio::test]
    async fn test_sqlite_storage_initialization() {
        let storage = SqliteStorage::in_memory();
        assert!(storage.is_ok());
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        conformance::get_missing_returns_none(&SqliteStorage::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_put_then_get() {
        conformance::put_then_get(&SqliteStorage::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_identical_put_is_idempotent() {
        conformance::identical_put_is_idempotent(&SqliteStorage::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_changed_content_upserts() {
        conformance::changed_content_upserts(&SqliteStorage::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_list_dates_ascending() {
        conformance::list_dates_ascending(&SqliteStorage::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_concurrent_puts_stay_readable() {
        conformance::concurrent_puts_stay_readable(&SqliteStorage::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_superseded_payload_is_removed() {
        let storage = SqliteStorage::in_memory().unwrap();
        conformance::changed_content_upserts(&storage).await;

        let count = storage
            .with_conn(DataError::StorageRead, |conn| {
                conn.query_row("SELECT COUNT(*) FROM fetch_payloads", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(|e| DataError::StorageRead(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_corrupted_payload_is_read_error() {
        let storage = SqliteStorage::in_memory().unwrap();
        let date = conformance::date("2024-08-13");
        storage
            .put(date, &conformance::payload(3), &Summary::new(3, "test"))
            .await
            .unwrap();

        storage
            .with_conn(DataError::StorageWrite, |conn| {
                conn.execute("UPDATE fetch_payloads SET data = X'5B5D'", [])
                    .map_err(|e| DataError::StorageWrite(e.to_string()))
            })
            .await
            .unwrap();

        let result = storage.get(date).await;
        assert!(matches!(result, Err(DataError::StorageRead(_))));
    }

    #[tokio::test]
    async fn test_file_backed_storage_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daycache.db");
        let date = conformance::date("2024-08-13");

        {
            let storage = SqliteStorage::new(&path).unwrap();
            storage
                .put(date, &conformance::payload(2), &Summary::new(2, "test"))
                .await
                .unwrap();
        }

        let reopened = SqliteStorage::new(&path).unwrap();
        let stored = reopened.get(date).await.unwrap().unwrap();
        assert_eq!(stored.record.record_count, 2);
        assert_eq!(stored.payload, conformance::payload(2));
    }
}
