//! Normalization of fetched tables into JSON-safe records.
//!
//! [`Serializer::normalize`] turns a [`RawDataset`] into an ordered sequence
//! of [`Record`]s:
//!
//! - datetime columns (and string columns registered as timestamp columns)
//!   become `YYYY-MM-DDTHH:MM:SS` strings in UTC
//! - date columns become `YYYY-MM-DD` strings
//! - duration columns become signed integer seconds
//! - nulls and non-finite floats become JSON `null`
//!
//! The output is a pure function of the input, so re-normalizing the same
//! dataset yields byte-identical payloads.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use serde_json::{Number, Value};

use crate::{
    error::{DataError, Result},
    types::{RawDataset, Record, Summary},
};

/// Output format for timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// String columns parsed as timestamps unless configured otherwise.
pub const DEFAULT_TIMESTAMP_COLUMNS: &[&str] = &["init_time", "valid_time"];

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Normalized records plus summary metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    /// Records in source row order.
    pub records: Vec<Record>,
    /// Record count and source.
    pub summary: Summary,
}

/// Converts raw tables into normalized records.
#[derive(Clone, Debug)]
pub struct Serializer {
    timestamp_columns: Vec<String>,
}

impl Default for Serializer {
    fn default() -> Self {
        Self {
            timestamp_columns: DEFAULT_TIMESTAMP_COLUMNS
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
        }
    }
}

impl Serializer {
    /// Create a serializer that parses the default timestamp columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also parse the named string column as a timestamp.
    #[must_use]
    pub fn with_timestamp_column(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.timestamp_columns.contains(&name) {
            self.timestamp_columns.push(name);
        }
        self
    }

    /// String columns that are parsed as timestamps.
    #[must_use]
    pub fn timestamp_columns(&self) -> &[String] {
        &self.timestamp_columns
    }

    /// Normalize a raw dataset.
    ///
    /// # Errors
    /// Returns [`DataError::Serialization`] if any value cannot be converted.
    /// Nothing is emitted on failure.
    pub fn normalize(&self, raw: &RawDataset) -> Result<Normalized> {
        let frame = &raw.frame;
        let height = frame.height();

        let mut columns = Vec::with_capacity(frame.width());
        for column in frame.get_columns() {
            let values = self.column_values(column)?;
            if values.len() != height {
                return Err(DataError::Serialization(format!(
                    "column '{}' has {} values, expected {}",
                    column.name(),
                    values.len(),
                    height
                )));
            }
            columns.push((column.name().to_string(), values.into_iter()));
        }

        let mut records = Vec::with_capacity(height);
        for _ in 0..height {
            let mut record = Record::with_capacity(columns.len());
            for (name, values) in &mut columns {
                record.insert(name.clone(), values.next().unwrap_or(Value::Null));
            }
            records.push(record);
        }

        Ok(Normalized {
            summary: Summary::new(records.len(), raw.source.clone()),
            records,
        })
    }

    fn column_values(&self, column: &Column) -> Result<Vec<Value>> {
        let name = column.name().as_str();
        let err = |e: PolarsError| DataError::Serialization(format!("column '{name}': {e}"));
        let dtype = column.dtype().clone();

        let values: Vec<Value> = match dtype {
            DataType::Null => vec![Value::Null; column.len()],
            DataType::Boolean => column
                .bool()
                .map_err(err)?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Bool))
                .collect(),
            DataType::String if self.is_timestamp_column(name) => column
                .str()
                .map_err(err)?
                .into_iter()
                .enumerate()
                .map(|(row, v)| match v {
                    None => Ok(Value::Null),
                    Some(s) => parse_timestamp(s).map(format_timestamp).ok_or_else(|| {
                        DataError::Serialization(format!(
                            "column '{name}', row {row}: unparseable timestamp '{s}'"
                        ))
                    }),
                })
                .collect::<Result<_>>()?,
            DataType::String => column
                .str()
                .map_err(err)?
                .into_iter()
                .map(|v| v.map_or(Value::Null, |s| Value::String(s.to_string())))
                .collect(),
            DataType::Date => {
                let days = column.cast(&DataType::Int32).map_err(err)?;
                days.i32()
                    .map_err(err)?
                    .into_iter()
                    .enumerate()
                    .map(|(row, v)| match v {
                        None => Ok(Value::Null),
                        Some(d) => date_from_epoch_days(d)
                            .map(|d| Value::String(d.format(crate::types::DATE_FORMAT).to_string()))
                            .ok_or_else(|| {
                                DataError::Serialization(format!(
                                    "column '{name}', row {row}: date out of range"
                                ))
                            }),
                    })
                    .collect::<Result<_>>()?
            }
            DataType::Datetime(unit, _) => {
                let physical = column.cast(&DataType::Int64).map_err(err)?;
                physical
                    .i64()
                    .map_err(err)?
                    .into_iter()
                    .enumerate()
                    .map(|(row, v)| match v {
                        None => Ok(Value::Null),
                        Some(ts) => datetime_from_physical(ts, unit)
                            .map(|dt| format_timestamp(dt.naive_utc()))
                            .ok_or_else(|| {
                                DataError::Serialization(format!(
                                    "column '{name}', row {row}: timestamp out of range"
                                ))
                            }),
                    })
                    .collect::<Result<_>>()?
            }
            DataType::Duration(unit) => {
                let per_second = units_per_second(unit);
                let physical = column.cast(&DataType::Int64).map_err(err)?;
                physical
                    .i64()
                    .map_err(err)?
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, |d| Value::from(d / per_second)))
                    .collect()
            }
            ref dt if dt.is_unsigned_integer() => {
                let wide = column.cast(&DataType::UInt64).map_err(err)?;
                wide.u64()
                    .map_err(err)?
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, Value::from))
                    .collect()
            }
            ref dt if dt.is_signed_integer() => {
                let wide = column.cast(&DataType::Int64).map_err(err)?;
                wide.i64()
                    .map_err(err)?
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, Value::from))
                    .collect()
            }
            ref dt if dt.is_float() => {
                let wide = column.cast(&DataType::Float64).map_err(err)?;
                wide.f64()
                    .map_err(err)?
                    .into_iter()
                    .map(|v| {
                        v.and_then(Number::from_f64)
                            .map_or(Value::Null, Value::Number)
                    })
                    .collect()
            }
            _ => {
                let text = column.cast(&DataType::String).map_err(err)?;
                text.str()
                    .map_err(err)?
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, |s| Value::String(s.to_string())))
                    .collect()
            }
        };

        Ok(values)
    }

    fn is_timestamp_column(&self, name: &str) -> bool {
        self.timestamp_columns.iter().any(|c| c == name)
    }
}

fn format_timestamp(dt: NaiveDateTime) -> Value {
    Value::String(dt.format(TIMESTAMP_FORMAT).to_string())
}

/// Parse the timestamp spellings seen in upstream CSVs.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, crate::types::DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

fn datetime_from_physical(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    }
}

const fn units_per_second(unit: TimeUnit) -> i64 {
    match unit {
        TimeUnit::Nanoseconds => 1_000_000_000,
        TimeUnit::Microseconds => 1_000_000,
        TimeUnit::Milliseconds => 1_000,
    }
}
