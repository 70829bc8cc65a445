#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/daycache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Date-keyed fetch memoization.
//!
//! This crate re-exports the core types and storage backends, and provides
//! the [`FetchCoordinator`] that ties a [`Fetcher`], a [`StorageBackend`] and
//! a [`MemoCache`] together.

// Core types and traits
pub use daycache_core::*;

// Storage backends
pub use daycache_storage::FsStorage;
#[cfg(feature = "sqlite")]
pub use daycache_storage::SqliteStorage;

// Fetchers
#[cfg(feature = "weatherlab")]
pub use daycache_weatherlab::{DataQuality, DaySummary, TrackSummary, WeatherLabFetcher, summarize};

mod config;
mod coordinator;
mod memo;

pub use config::{
    CoordinatorConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_FETCH_TIMEOUT_MS, StorageConfig,
};
pub use coordinator::{FetchCoordinator, Resolved};
pub use memo::{CacheEntry, MemoCache};
