//! Filesystem storage backend.

use async_trait::async_trait;
use daycache_core::{
    DataError, DateKey, FetchRecord, Payload, Result, StorageBackend, StoredFetch, Summary,
};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// Directory holding one JSON sidecar per date.
const RECORDS_DIR: &str = "records";
/// Directory holding payload blobs.
const PAYLOADS_DIR: &str = "payloads";

/// Distinguishes temp files written concurrently by one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

type WriteLock = Arc<tokio::sync::Mutex<()>>;

/// One writer lock per sidecar path, shared by every `FsStorage` in the
/// process that was opened on the same root.
static WRITE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, WriteLock>>> = LazyLock::new(Default::default);

fn write_lock(record_path: &Path) -> WriteLock {
    let mut locks = WRITE_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    // Entries nobody holds or waits on can go.
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    Arc::clone(locks.entry(record_path.to_path_buf()).or_default())
}

/// Filesystem storage for fetched datasets.
///
/// Layout under the root directory:
///
/// ```text
/// records/2024-08-13.json                     metadata sidecar
/// payloads/2024-08-13.<checksum prefix>.json  payload blob
/// ```
///
/// `put` writes the payload first and the sidecar last, each through a
/// temporary file that is synced and renamed into place. The sidecar rename
/// is the commit point: until it happens `get` keeps returning the previous
/// record and its payload.
///
/// Writers of one date are serialized within the process, across every
/// instance opened on the same root path. Separate processes sharing a root
/// are not coordinated.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Open (or create) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns [`DataError::StorageWrite`] if the directories cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [RECORDS_DIR, PAYLOADS_DIR] {
            std::fs::create_dir_all(root.join(dir)).map_err(|e| {
                DataError::StorageWrite(format!("Cannot create {}: {e}", root.join(dir).display()))
            })?;
        }
        debug!(root = %root.display(), "Filesystem storage opened");
        Ok(Self { root })
    }

    /// The root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, date: DateKey) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{date}.json"))
    }

    fn payload_path(&self, payload_ref: &str) -> PathBuf {
        self.root.join(PAYLOADS_DIR).join(payload_ref)
    }

    /// Read the sidecar for a date; `Ok(None)` if there is none.
    async fn read_record(&self, date: DateKey) -> Result<Option<FetchRecord>> {
        let path = self.record_path(date);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DataError::StorageRead(format!(
                    "Cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| DataError::StorageRead(format!("Corrupt record {}: {e}", path.display())))
    }
}

/// Write `bytes` to `path` through a synced temporary file and a rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("blob");
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

#[async_trait]
impl StorageBackend for FsStorage {
    #[instrument(skip(self), fields(date = %date))]
    async fn get(&self, date: DateKey) -> Result<Option<StoredFetch>> {
        let Some(record) = self.read_record(date).await? else {
            debug!("No stored record found");
            return Ok(None);
        };

        let path = self.payload_path(&record.payload_ref);
        let data = tokio::fs::read(&path).await.map_err(|e| {
            DataError::StorageRead(format!("Missing payload {}: {e}", path.display()))
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
        let record_path = self.record_path(date);
        let lock = write_lock(&record_path);
        let _guard = lock.lock().await;

        // An unreadable sidecar is overwritten rather than compared.
        let existing = match self.read_record(date).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "Overwriting unreadable record; its payload may be orphaned");
                None
            }
        };

        let payload_path = self.payload_path(&candidate.payload_ref);

        if let Some(existing) = existing
            .as_ref()
            .filter(|record| record.same_content(&candidate))
        {
            let intact = tokio::fs::read(&payload_path)
                .await
                .is_ok_and(|bytes| Payload::from_bytes(bytes).checksum() == existing.checksum);
            if !intact {
                write_atomic(&payload_path, payload.as_bytes())
                    .await
                    .map_err(|e| DataError::StorageWrite(e.to_string()))?;
            }
            debug!(checksum = %existing.checksum, "Content unchanged, keeping stored record");
            return Ok(existing.clone());
        }

        write_atomic(&payload_path, payload.as_bytes())
            .await
            .map_err(|e| {
                DataError::StorageWrite(format!("Cannot write {}: {e}", payload_path.display()))
            })?;

        let sidecar = serde_json::to_vec_pretty(&candidate)
            .map_err(|e| DataError::StorageWrite(e.to_string()))?;
        write_atomic(&record_path, &sidecar).await.map_err(|e| {
            DataError::StorageWrite(format!("Cannot write {}: {e}", record_path.display()))
        })?;

        if let Some(previous) = existing.filter(|r| r.payload_ref != candidate.payload_ref) {
            let stale = self.payload_path(&previous.payload_ref);
            if let Err(e) = tokio::fs::remove_file(&stale).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %stale.display(), error = %e, "Failed to remove superseded payload");
                }
            }
        }

        debug!(checksum = %candidate.checksum, "Stored record");
        Ok(candidate)
    }

    #[instrument(skip(self))]
    async fn list_dates(&self) -> Result<Vec<DateKey>> {
        let dir = self.root.join(RECORDS_DIR);
        let read_err = |e: std::io::Error| {
            DataError::StorageRead(format!("Cannot list {}: {e}", dir.display()))
        };

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(read_err)?;
        let mut dates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            match stem.parse::<DateKey>() {
                Ok(date) => dates.push(date),
                Err(_) => debug!(file = name, "Ignoring unexpected file"),
            }
        }
        dates.sort_unstable();

        debug!("Found {} stored dates", dates.len());
        Ok(dates)
    }
}
