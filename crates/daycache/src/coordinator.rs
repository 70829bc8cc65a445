//! Date-keyed fetch coordination with single-flight de-duplication.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, instrument, warn};

use daycache_core::{
    DataError, DateKey, FetchRecord, Fetcher, Origin, Payload, Record, ResolveMeta, Result,
    Serializer, StorageBackend,
};

use crate::config::CoordinatorConfig;
use crate::memo::MemoCache;

/// Outcome of [`FetchCoordinator::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The stored record backing the result.
    pub record: FetchRecord,
    /// Decoded records for the date.
    pub records: Arc<Vec<Record>>,
    /// Where the result came from.
    pub origin: Origin,
}

impl Resolved {
    /// Metadata for the boundary layer.
    #[must_use]
    pub fn meta(&self) -> ResolveMeta {
        ResolveMeta::new(&self.record, self.origin)
    }
}

type Flight = Shared<BoxFuture<'static, Result<Resolved>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlightKind {
    /// Storage first, upstream on a miss.
    Load,
    /// Upstream unconditionally.
    Refresh,
}

struct InFlight {
    id: u64,
    kind: FlightKind,
    flight: Flight,
}

struct Inner {
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn StorageBackend>,
    cache: MemoCache,
    serializer: Serializer,
    fetch_timeout: Duration,
    inflight: Mutex<HashMap<DateKey, InFlight>>,
    next_id: AtomicU64,
}

/// Resolves per-date datasets through the memo cache, durable storage and
/// the upstream fetcher, in that order.
///
/// Concurrent resolutions of one date share a single in-flight operation, so
/// the fetcher runs at most once per date at a time. Each operation runs on
/// its own task: dropping a `resolve` future never cancels work that other
/// callers are waiting on.
///
/// Cloning is cheap and every clone shares the same cache and in-flight map.
///
/// # Example
///
/// ```rust,ignore
/// use daycache::{CoordinatorConfig, FetchCoordinator, StorageConfig, WeatherLabFetcher};
/// use std::sync::Arc;
///
/// let storage = StorageConfig::Sqlite { path: "tracks.db".into() }.open()?;
/// let coordinator = FetchCoordinator::new(
///     Arc::new(WeatherLabFetcher::new()?),
///     storage,
///     &CoordinatorConfig::default(),
/// );
///
/// let resolved = coordinator.resolve("2024-08-13".parse()?, false).await?;
/// println!("{} records from {:?}", resolved.records.len(), resolved.origin);
/// ```
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("fetcher", &self.inner.fetcher.name())
            .field("storage", &self.inner.storage)
            .field("cache_capacity", &self.inner.cache.capacity())
            .field("fetch_timeout", &self.inner.fetch_timeout)
            .field("in_flight", &self.inner.inflight().len())
            .finish()
    }
}

impl FetchCoordinator {
    /// Create a coordinator over a fetcher and a storage backend.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn StorageBackend>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                storage,
                cache: MemoCache::new(config.cache_capacity),
                serializer: config.serializer(),
                fetch_timeout: config.fetch_timeout(),
                inflight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The memo cache, for inspection and explicit invalidation.
    #[must_use]
    pub fn cache(&self) -> &MemoCache {
        &self.inner.cache
    }

    /// The storage backend.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.storage
    }

    /// Resolve the dataset for `date`.
    ///
    /// Without `force`, a cached or stored result is returned and the fetcher
    /// only runs when neither has the date. With `force`, the cached entry is
    /// dropped and the dataset is fetched again, superseding what storage
    /// holds if the content changed.
    ///
    /// # Errors
    /// - [`DataError::NotFound`] if the source has nothing for the date
    /// - [`DataError::Fetch`] or [`DataError::FetchTimeout`] if retrieval failed
    /// - [`DataError::Serialization`] if the fetched table cannot be normalized
    /// - [`DataError::StorageRead`] or [`DataError::StorageWrite`] on storage failures
    ///
    /// A failed resolution leaves the cache and storage untouched.
    #[instrument(skip(self), fields(date = %date))]
    pub async fn resolve(&self, date: DateKey, force: bool) -> Result<Resolved> {
        if force {
            self.inner.cache.invalidate(date);
        } else if let Some(entry) = self.inner.cache.lookup(date) {
            debug!("Served from memo cache");
            return Ok(Resolved {
                record: entry.record,
                records: entry.records,
                origin: Origin::Cache,
            });
        }

        let kind = if force {
            FlightKind::Refresh
        } else {
            FlightKind::Load
        };

        loop {
            let resolved = self.join_or_start(date, kind).await?;
            // A forced call may have joined a load that never reached upstream.
            if force && resolved.origin != Origin::Fetched {
                debug!("Joined load was served without fetching, refreshing");
                continue;
            }
            return Ok(resolved);
        }
    }

    /// Dates that have a stored record, ascending.
    ///
    /// # Errors
    /// Returns [`DataError::StorageRead`] if storage cannot be listed.
    pub async fn list_available_dates(&self) -> Result<Vec<DateKey>> {
        self.inner.storage.list_dates().await
    }

    /// Attach to the in-flight operation for `date`, or start one of `kind`.
    fn join_or_start(&self, date: DateKey, kind: FlightKind) -> Flight {
        let mut inflight = self.inner.inflight();
        if let Some(existing) = inflight.get(&date) {
            debug!(kind = ?existing.kind, "Joining in-flight resolution");
            return existing.flight.clone();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        // The map lock is held until the entry is inserted, so the task
        // cannot remove its entry before it exists.
        let task = tokio::spawn(async move {
            let _release = FlightGuard {
                inner: Arc::clone(&inner),
                date,
                id,
            };
            let result = match kind {
                FlightKind::Load => inner.load(date).await,
                FlightKind::Refresh => inner.refresh(date).await,
            };
            if let Err(e) = &result {
                warn!(date = %date, error = %e, "Resolution failed");
            }
            result
        });

        let flight = task
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(DataError::Other(format!("Resolution task failed: {e}")))
                })
            })
            .boxed()
            .shared();

        inflight.insert(
            date,
            InFlight {
                id,
                kind,
                flight: flight.clone(),
            },
        );
        flight
    }
}

/// Releases a flight's in-flight token when the flight's task ends, whether
/// it returned or unwound.
struct FlightGuard {
    inner: Arc<Inner>,
    date: DateKey,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.finish(self.date, self.id);
    }
}

impl Inner {
    /// The map is only mutated under short, non-panicking critical sections.
    fn inflight(&self) -> MutexGuard<'_, HashMap<DateKey, InFlight>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the in-flight token, unless a newer operation already owns it.
    fn finish(&self, date: DateKey, id: u64) {
        let mut inflight = self.inflight();
        if inflight.get(&date).is_some_and(|f| f.id == id) {
            inflight.remove(&date);
        }
    }

    async fn load(&self, date: DateKey) -> Result<Resolved> {
        // Another flight may have filled the cache since the caller checked.
        if let Some(entry) = self.cache.lookup(date) {
            return Ok(Resolved {
                record: entry.record,
                records: entry.records,
                origin: Origin::Cache,
            });
        }

        if let Some(stored) = self.storage.get(date).await? {
            let records = Arc::new(stored.payload.records()?);
            self.cache
                .store(date, stored.record.clone(), Arc::clone(&records));
            debug!(date = %date, records = records.len(), "Served from storage");
            return Ok(Resolved {
                record: stored.record,
                records,
                origin: Origin::Storage,
            });
        }

        debug!(date = %date, "Not in storage");
        self.refresh(date).await
    }

    async fn refresh(&self, date: DateKey) -> Result<Resolved> {
        debug!(date = %date, fetcher = self.fetcher.name(), "Fetching from upstream");

        let raw = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch_for_date(date))
            .await
            .map_err(|_| DataError::FetchTimeout {
                date: date.to_string(),
                timeout: self.fetch_timeout,
            })??;

        let serializer = self.serializer.clone();
        let normalized = tokio::task::spawn_blocking(move || serializer.normalize(&raw))
            .await
            .map_err(|e| DataError::Other(format!("Normalization task failed: {e}")))??;

        let payload = Payload::from_records(&normalized.records)?;
        let record = self.storage.put(date, &payload, &normalized.summary).await?;

        let records = Arc::new(normalized.records);
        self.cache.store(date, record.clone(), Arc::clone(&records));
        debug!(date = %date, records = records.len(), checksum = %record.checksum, "Fetched and stored");

        Ok(Resolved {
            record,
            records,
            origin: Origin::Fetched,
        })
    }
}
