#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/daycache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! WeatherLab cyclone track fetcher.
//!
//! This crate provides [`WeatherLabFetcher`], an implementation of the
//! [`Fetcher`] trait from `daycache-core`, and [`summarize`], which reduces a
//! date's track table to per-storm figures.
//!
//! # Example
//!
//! ```no_run
//! use daycache_core::{DateKey, Fetcher};
//! use daycache_weatherlab::WeatherLabFetcher;
//!
//! # async fn example() -> daycache_core::Result<()> {
//! let fetcher = WeatherLabFetcher::new()?;
//! let date: DateKey = "2024-09-23".parse()?;
//!
//! let raw = fetcher.fetch_for_date(date).await?;
//! println!("Fetched {} rows", raw.frame.height());
//! # Ok(())
//! # }
//! ```

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use daycache_core::{DataError, DateKey, Fetcher, RawDataset, Result};
use polars::prelude::*;
use tokio::time::sleep;
use tracing::{debug, warn};

mod summary;
pub use summary::{DataQuality, DaySummary, TrackSummary, summarize};

/// Base URL of the FNV3 ensemble-mean paired track CSVs.
const WEATHERLAB_BASE_URL: &str =
    "https://deepmind.google.com/science/weatherlab/download/cyclones/FNV3/ensemble_mean/paired/csv";

/// Source identifier recorded with every fetch.
pub const SOURCE: &str = "weatherlab";

/// Default minimum gap between requests in milliseconds.
const DEFAULT_RATE_LIMIT_MS: u64 = 500;

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent for HTTP requests.
const USER_AGENT: &str = "Hurricane Impact Analysis/1.0 (Research Purpose)";

/// Fetches WeatherLab cyclone track CSVs.
#[derive(Debug)]
pub struct WeatherLabFetcher {
    client: reqwest::Client,
    base_url: String,
    rate_limit_ms: u64,
    last_request_time: AtomicU64,
}

impl WeatherLabFetcher {
    /// Create a fetcher with default settings.
    ///
    /// # Errors
    /// Returns [`DataError::Other`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DataError::Other(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Create a fetcher that uses the provided HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: WEATHERLAB_BASE_URL.to_string(),
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            last_request_time: AtomicU64::new(0),
        }
    }

    /// Point the fetcher at a different host (mirrors, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the minimum gap between requests.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit_ms = u64::try_from(rate_limit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// URL of the CSV for a date.
    #[must_use]
    pub fn url_for(&self, date: DateKey) -> String {
        let stamp = date.date().format("%Y_%m_%d");
        format!("{}/FNV3_{stamp}T00_00_paired.csv", self.base_url)
    }

    /// Dates the source typically publishes: the `days` days before `today`
    /// through `today`, ascending.
    #[must_use]
    pub fn candidate_dates(today: NaiveDate, days: u64) -> Vec<DateKey> {
        let start = today.checked_sub_days(Days::new(days)).unwrap_or(today);
        start
            .iter_days()
            .take_while(|d| *d <= today)
            .map(DateKey::new)
            .collect()
    }

    /// Download the tracks for `date` and summarize them per storm.
    ///
    /// # Errors
    /// Fails as [`Fetcher::fetch_for_date`] and [`summarize`] do.
    pub async fn summary_for_date(&self, date: DateKey) -> Result<DaySummary> {
        let raw = self.fetch_for_date(date).await?;
        summarize(&raw.frame, date)
    }

    /// Apply rate limiting before making a request.
    async fn apply_rate_limit(&self) {
        let now = now_millis();
        let last = self.last_request_time.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(last);

        if elapsed < self.rate_limit_ms {
            let wait_time = self.rate_limit_ms - elapsed;
            debug!("Rate limiting: waiting {}ms", wait_time);
            sleep(Duration::from_millis(wait_time)).await;
        }

        self.last_request_time.store(now_millis(), Ordering::Relaxed);
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Parse a WeatherLab CSV body, skipping blank and `#` comment lines.
///
/// Returns `Ok(None)` if the body holds no data lines at all.
fn parse_csv(body: &str) -> Result<Option<DataFrame>> {
    let data = body
        .lines()
        .filter(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .collect::<Vec<_>>()
        .join("\n");

    if data.is_empty() {
        return Ok(None);
    }

    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(Cursor::new(data.into_bytes()))
        .finish()
        .map(Some)
        .map_err(|e| DataError::Serialization(format!("Invalid WeatherLab CSV: {e}")))
}

#[async_trait]
impl Fetcher for WeatherLabFetcher {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch_for_date(&self, date: DateKey) -> Result<RawDataset> {
        self.apply_rate_limit().await;

        let url = self.url_for(date);
        debug!(date = %date, url = %url, "Downloading cyclone tracks");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DataError::Fetch(format!("Request for {date} failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::NotFound(date.to_string()));
        }

        if !response.status().is_success() {
            warn!(date = %date, status = %response.status(), "WeatherLab request failed");
            return Err(DataError::Fetch(format!(
                "HTTP {} for {}",
                response.status(),
                date
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DataError::Fetch(format!("Reading body for {date} failed: {e}")))?;

        let frame = parse_csv(&body)?.ok_or_else(|| DataError::NotFound(date.to_string()))?;
        debug!(date = %date, rows = frame.height(), "Downloaded cyclone tracks");

        Ok(RawDataset::new(frame, SOURCE))
    }
}
