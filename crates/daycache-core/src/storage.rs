//! Storage trait for persisting fetched datasets.
//!
//! This module defines the [`StorageBackend`] trait: one authoritative
//! metadata row and one payload blob per [`DateKey`].

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::Result,
    types::{DateKey, FetchRecord, Payload, StoredFetch, Summary},
};

/// Durable, date-addressed storage of normalized payloads.
///
/// Implementations are interchangeable: callers must not be able to tell
/// which one is active from the results of these methods.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Retrieves the authoritative stored result for a date.
    ///
    /// Returns `Ok(Some(stored))` if a record exists, `Ok(None)` if not. The
    /// payload is verified against its checksum before it is returned.
    async fn get(&self, date: DateKey) -> Result<Option<StoredFetch>>;

    /// Upserts the payload for a date and returns the authoritative record.
    ///
    /// Replaces any existing record for the same date atomically. Storing
    /// content identical to the current record leaves it unchanged.
    async fn put(&self, date: DateKey, payload: &Payload, summary: &Summary)
    -> Result<FetchRecord>;

    /// Lists every date with a stored record, ascending.
    async fn list_dates(&self) -> Result<Vec<DateKey>>;
}
