#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/daycache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Storage backends for per-date fetch memoization.
//!
//! This crate provides implementations of the [`StorageBackend`] trait from `daycache-core`:
//!
//! - [`SqliteStorage`] - Relational storage (default, requires `sqlite` feature)
//! - [`FsStorage`] - One sidecar and one payload file per date

/// Filesystem storage implementation.
pub mod fs;

/// SQLite-based storage implementation.
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
pub(crate) mod conformance;

// Re-export the trait for convenience
pub use daycache_core::StorageBackend;

// Re-export implementations
pub use fs::FsStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
