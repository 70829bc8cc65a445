//! Coordinator and storage configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use daycache_core::{Result, Serializer, StorageBackend};
use daycache_storage::FsStorage;
use serde::{Deserialize, Serialize};

/// Default number of dates kept in the memo cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Default deadline for a single upstream fetch, in milliseconds.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Settings for a [`FetchCoordinator`](crate::FetchCoordinator).
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use daycache::CoordinatorConfig;
///
/// let config: CoordinatorConfig = serde_json::from_str(r#"{ "cache_capacity": 16 }"#).unwrap();
/// assert_eq!(config.cache_capacity, 16);
/// assert_eq!(config.fetch_timeout_ms, 30_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum number of dates held in memory. Zero disables the memo cache.
    pub cache_capacity: usize,
    /// Deadline for one upstream fetch, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Extra string columns parsed as timestamps, on top of the defaults.
    pub timestamp_columns: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            timestamp_columns: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Set the memo cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the fetch deadline, truncated to whole milliseconds.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Parse an additional string column as timestamps.
    #[must_use]
    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_columns.push(column.into());
        self
    }

    /// The fetch deadline.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Build the serializer these settings describe.
    #[must_use]
    pub fn serializer(&self) -> Serializer {
        self.timestamp_columns
            .iter()
            .fold(Serializer::new(), |s, column| {
                s.with_timestamp_column(column.clone())
            })
    }
}

/// Which storage backend to open.
///
/// ```
/// use daycache::StorageConfig;
///
/// let config: StorageConfig =
///     serde_json::from_str(r#"{ "backend": "filesystem", "root": "/var/lib/daycache" }"#).unwrap();
/// assert!(matches!(config, StorageConfig::Filesystem { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// SQLite database file.
    Sqlite {
        /// Database path; created if missing.
        path: PathBuf,
    },
    /// SQLite database that lives only as long as the process.
    SqliteInMemory,
    /// Directory of JSON files.
    Filesystem {
        /// Root directory; created if missing.
        root: PathBuf,
    },
}

impl StorageConfig {
    /// Open the configured backend.
    ///
    /// # Errors
    /// Returns [`DataError::StorageWrite`](daycache_core::DataError::StorageWrite)
    /// if the backend cannot be created, or
    /// [`DataError::InvalidParameter`](daycache_core::DataError::InvalidParameter)
    /// if a SQLite backend is requested without the `sqlite` feature.
    pub fn open(&self) -> Result<Arc<dyn StorageBackend>> {
        match self {
            Self::Filesystem { root } => Ok(Arc::new(FsStorage::new(root.clone())?)),
            #[cfg(feature = "sqlite")]
            Self::Sqlite { path } => Ok(Arc::new(daycache_storage::SqliteStorage::new(path)?)),
            #[cfg(feature = "sqlite")]
            Self::SqliteInMemory => Ok(Arc::new(daycache_storage::SqliteStorage::in_memory()?)),
            #[cfg(not(feature = "sqlite"))]
            Self::Sqlite { .. } | Self::SqliteInMemory => {
                Err(daycache_core::DataError::InvalidParameter(
                    "SQLite storage requires the `sqlite` feature".to_string(),
                ))
            }
        }
    }
}
