//! Fetcher trait for retrieving per-date datasets from upstream.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::Result,
    types::{DateKey, RawDataset},
};

/// Upstream source of per-date datasets.
///
/// A fetcher is treated as an opaque, potentially slow and potentially failing
/// I/O capability. Implementations report a transient failure as
/// [`DataError::Fetch`](crate::DataError::Fetch) and the absence of upstream
/// data for a date as [`DataError::NotFound`](crate::DataError::NotFound).
#[async_trait]
pub trait Fetcher: Send + Sync + Debug {
    /// Returns the name of this fetcher (e.g., "weatherlab").
    fn name(&self) -> &str;

    /// Fetches the raw dataset for a date.
    async fn fetch_for_date(&self, date: DateKey) -> Result<RawDataset>;
}
