//! Core data types for per-date fetch memoization.
//!
//! This module defines the fundamental data structures:
//!
//! - [`DateKey`] - Calendar date identifying one dataset snapshot
//! - [`Record`] - One normalized, JSON-safe output row
//! - [`Summary`] - Record count and source of a normalized dataset
//! - [`Payload`] - Encoded records as stored by a backend
//! - [`FetchRecord`] - Metadata for one persisted fetch
//! - [`StoredFetch`] - A metadata row paired with its payload
//! - [`RawDataset`] - Un-normalized data returned by a fetcher

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{DataError, Result};

/// Canonical text format of a [`DateKey`].
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A calendar date identifying one logical dataset snapshot.
///
/// Displays and parses as `YYYY-MM-DD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(NaiveDate);

impl DateKey {
    /// Creates a key from a date.
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Creates a key from year, month and day.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidParameter`] if the date does not exist.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| {
                DataError::InvalidParameter(format!("Invalid date: {year}-{month}-{day}"))
            })
    }

    /// Returns the underlying date.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for DateKey {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Self)
            .map_err(|e| DataError::InvalidParameter(format!("Invalid date '{s}': {e}")))
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

/// One normalized output row: column name to JSON value, in column order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Summary metadata produced alongside normalized records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of records in the dataset.
    pub record_count: usize,
    /// Identifier of the upstream source.
    pub source: String,
}

impl Summary {
    /// Creates a new summary.
    #[must_use]
    pub fn new(record_count: usize, source: impl Into<String>) -> Self {
        Self {
            record_count,
            source: source.into(),
        }
    }
}

/// Encoded normalized records, as handed to and returned by a storage backend.
///
/// The encoding is a JSON array of [`Record`]s. Encoding the same records
/// always produces the same bytes, so the checksum identifies the content.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Encodes records into a payload.
    ///
    /// # Errors
    /// Returns [`DataError::Serialization`] if encoding fails.
    pub fn from_records(records: &[Record]) -> Result<Self> {
        serde_json::to_vec(records)
            .map(Self)
            .map_err(|e| DataError::Serialization(e.to_string()))
    }

    /// Wraps bytes read back from storage.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the payload, returning the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 of the encoded bytes, lowercase hex.
    #[must_use]
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(&self.0))
    }

    /// Decodes the payload back into records.
    ///
    /// # Errors
    /// Returns [`DataError::StorageRead`] if the bytes are not a valid record array.
    pub fn records(&self) -> Result<Vec<Record>> {
        serde_json::from_slice(&self.0)
            .map_err(|e| DataError::StorageRead(format!("Corrupt payload: {e}")))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Name under which a payload with the given checksum is stored for `date`.
///
/// Both storage backends use this name so the reference recorded in a
/// [`FetchRecord`] does not depend on the active backend.
#[must_use]
pub fn payload_ref(date: DateKey, checksum: &str) -> String {
    let short = checksum.get(..16).unwrap_or(checksum);
    format!("{date}.{short}.json")
}

/// Metadata for one persisted fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRecord {
    /// Date the record belongs to.
    pub date: DateKey,
    /// Identifier of the upstream source.
    pub source: String,
    /// Number of records in the payload.
    pub record_count: usize,
    /// SHA-256 of the payload bytes, lowercase hex.
    pub checksum: String,
    /// When this content was first stored.
    pub created_at: DateTime<Utc>,
    /// Backend-agnostic name of the stored payload.
    pub payload_ref: String,
}

impl FetchRecord {
    /// Builds the record that describes `payload` stored for `date` now.
    #[must_use]
    pub fn new(date: DateKey, payload: &Payload, summary: &Summary) -> Self {
        let checksum = payload.checksum();
        Self {
            date,
            source: summary.source.clone(),
            record_count: summary.record_count,
            payload_ref: payload_ref(date, &checksum),
            checksum,
            created_at: Utc::now(),
        }
    }

    /// Returns true if both records describe the same stored content.
    ///
    /// The creation timestamp is ignored.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.date == other.date
            && self.checksum == other.checksum
            && self.source == other.source
            && self.record_count == other.record_count
    }
}

/// A metadata row together with the payload it describes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFetch {
    /// The authoritative metadata row.
    pub record: FetchRecord,
    /// The stored payload.
    pub payload: Payload,
}

impl StoredFetch {
    /// Checks the payload against the recorded checksum.
    ///
    /// # Errors
    /// Returns [`DataError::StorageRead`] on mismatch.
    pub fn verify(&self) -> Result<()> {
        let actual = self.payload.checksum();
        if actual != self.record.checksum {
            return Err(DataError::StorageRead(format!(
                "Checksum mismatch for {}: expected {}, found {}",
                self.record.date, self.record.checksum, actual
            )));
        }
        Ok(())
    }
}

/// Un-normalized dataset returned by a [`Fetcher`](crate::fetcher::Fetcher).
#[derive(Clone, Debug)]
pub struct RawDataset {
    /// The fetched table.
    pub frame: DataFrame,
    /// Identifier of the upstream source.
    pub source: String,
}

impl RawDataset {
    /// Creates a new raw dataset.
    #[must_use]
    pub fn new(frame: DataFrame, source: impl Into<String>) -> Self {
        Self {
            frame,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_records() -> Vec<Record> {
        let mut row = Record::new();
        row.insert("track_id".into(), json!("AL052024"));
        row.insert("lat".into(), json!(25.1));
        row.insert("radius".into(), serde_json::Value::Null);
        vec![row]
    }

    #[test]
    fn test_date_key_parse_and_display() {
        let key: DateKey = "2024-08-13".parse().unwrap();
        assert_eq!(key.to_string(), "2024-08-13");
        assert_eq!(key, DateKey::from_ymd(2024, 8, 13).unwrap());
    }

    #[test]
    fn test_date_key_rejects_malformed() {
        assert!(matches!(
            "2024-13-01".parse::<DateKey>(),
            Err(DataError::InvalidParameter(_))
        ));
        assert!("yesterday".parse::<DateKey>().is_err());
        assert!(DateKey::from_ymd(2023, 2, 29).is_err());
    }

    #[test]
    fn test_date_key_ordering() {
        let a: DateKey = "2024-08-13".parse().unwrap();
        let b: DateKey = "2024-09-01".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_date_key_serde_is_plain_string() {
        let key: DateKey = "2024-08-13".parse().unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2024-08-13\"");
    }

    #[test]
    fn test_payload_preserves_column_order() {
        let payload = Payload::from_records(&sample_records()).unwrap();
        let text = std::str::from_utf8(payload.as_bytes()).unwrap();
        assert_eq!(text, r#"[{"track_id":"AL052024","lat":25.1,"radius":null}]"#);
        assert_eq!(payload.records().unwrap(), sample_records());
    }

    #[test]
    fn test_checksum_tracks_content() {
        let a = Payload::from_records(&sample_records()).unwrap();
        let b = Payload::from_records(&sample_records()).unwrap();
        let c = Payload::from_records(&[]).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
        assert_eq!(a.checksum().len(), 64);
    }

    #[test]
    fn test_corrupt_payload_is_read_error() {
        let payload = Payload::from_bytes(b"{not json".to_vec());
        assert!(matches!(payload.records(), Err(DataError::StorageRead(_))));
    }

    #[test]
    fn test_fetch_record_ref_is_derived_from_date_and_checksum() {
        let date: DateKey = "2024-08-13".parse().unwrap();
        let payload = Payload::from_records(&sample_records()).unwrap();
        let record = FetchRecord::new(date, &payload, &Summary::new(1, "weatherlab"));
        assert_eq!(record.checksum, payload.checksum());
        assert_eq!(
            record.payload_ref,
            format!("2024-08-13.{}.json", &record.checksum[..16])
        );
    }

    #[test]
    fn test_same_content_ignores_creation_time() {
        let date: DateKey = "2024-08-13".parse().unwrap();
        let payload = Payload::from_records(&sample_records()).unwrap();
        let summary = Summary::new(1, "weatherlab");
        let first = FetchRecord::new(date, &payload, &summary);
        let mut second = FetchRecord::new(date, &payload, &summary);
        second.created_at = first.created_at + chrono::Duration::seconds(90);
        assert!(first.same_content(&second));

        let other_source = FetchRecord::new(date, &payload, &Summary::new(1, "mirror"));
        assert!(!first.same_content(&other_source));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let date: DateKey = "2024-08-13".parse().unwrap();
        let payload = Payload::from_records(&sample_records()).unwrap();
        let record = FetchRecord::new(date, &payload, &Summary::new(1, "weatherlab"));
        let good = StoredFetch {
            record: record.clone(),
            payload,
        };
        assert!(good.verify().is_ok());

        let bad = StoredFetch {
            record,
            payload: Payload::from_records(&[]).unwrap(),
        };
        assert!(matches!(bad.verify(), Err(DataError::StorageRead(_))));
    }
}
