#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/daycache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for per-date fetch memoization.
//!
//! This crate provides the foundational abstractions:
//!
//! - [`Fetcher`](fetcher::Fetcher) - Upstream source of per-date datasets
//! - [`StorageBackend`](storage::StorageBackend) - Durable date-addressed storage
//! - [`Serializer`](serialize::Serializer) - Table to JSON-safe record normalization
//! - [`DateKey`](types::DateKey), [`FetchRecord`](types::FetchRecord),
//!   [`Payload`](types::Payload) - The persisted data model

/// Error types for resolution.
pub mod error;
/// Fetcher trait for upstream retrieval.
pub mod fetcher;
/// Resolution origin and boundary metadata.
pub mod resolution;
/// Normalization of fetched tables.
pub mod serialize;
/// Storage backend trait.
pub mod storage;
/// Core data types (DateKey, FetchRecord, Payload, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use error::{DataError, Result};
pub use fetcher::Fetcher;
pub use resolution::{Origin, ResolveMeta};
pub use serialize::{Normalized, Serializer};
pub use storage::StorageBackend;
pub use types::{
    DateKey, FetchRecord, Payload, RawDataset, Record, StoredFetch, Summary, payload_ref,
};
