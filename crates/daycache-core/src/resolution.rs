//! Resolution origin and boundary metadata.
//!
//! This module defines [`Origin`] for reporting where a result was served from
//! and [`ResolveMeta`] for the metadata handed to the boundary layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DateKey, FetchRecord};

/// Where a resolved result came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Served from the in-process cache.
    Cache,
    /// Loaded from the storage backend.
    Storage,
    /// Freshly fetched from upstream.
    Fetched,
}

impl Origin {
    /// Returns true unless the result was freshly fetched.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        !matches!(self, Self::Fetched)
    }
}

/// Metadata describing a resolved result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveMeta {
    /// The resolved date.
    pub date: DateKey,
    /// Number of records returned.
    pub record_count: usize,
    /// Identifier of the upstream source.
    pub source: String,
    /// Content checksum of the stored payload.
    pub checksum: String,
    /// When the content was stored.
    pub created_at: DateTime<Utc>,
    /// Where the result was served from.
    pub origin: Origin,
    /// True unless the result was freshly fetched.
    pub cached: bool,
}

impl ResolveMeta {
    /// Builds boundary metadata from a stored record.
    #[must_use]
    pub fn new(record: &FetchRecord, origin: Origin) -> Self {
        Self {
            date: record.date,
            record_count: record.record_count,
            source: record.source.clone(),
            checksum: record.checksum.clone(),
            created_at: record.created_at,
            origin,
            cached: origin.is_cached(),
        }
    }
}
