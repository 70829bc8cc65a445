//! Error types for fetch memoization.
//!
//! This module defines [`DataError`] which covers every failure that can occur
//! while fetching, normalizing, storing, or resolving a per-date dataset.
//!
//! `DataError` is `Clone` because a single failed fetch is delivered to every
//! caller that joined it.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during resolution of a per-date dataset.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// The raw dataset could not be normalized (e.g. an unparseable timestamp).
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Reading from the storage backend failed.
    #[error("Storage read error: {0}")]
    StorageRead(String),

    /// Writing to the storage backend failed.
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// The upstream fetch failed in a way that may succeed later.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The upstream fetch did not complete before the configured deadline.
    #[error("Fetch for {date} timed out after {timeout:?}")]
    FetchTimeout {
        /// The date that was being fetched.
        date: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// No upstream data exists for the requested date.
    #[error("No data available for {0}")]
    NotFound(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl DataError {
    /// Returns true if repeating the same call may succeed.
    ///
    /// Storage I/O, transient fetch failures and timeouts are retriable.
    /// Malformed data, missing upstream data and invalid input are not.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::StorageRead(_) | Self::StorageWrite(_) | Self::Fetch(_) | Self::FetchTimeout { .. }
        )
    }
}

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;
