//! Per-date cyclone track summaries.

use daycache_core::{DataError, DateKey, Result};
use polars::prelude::*;
use serde::Serialize;

const TRACK_ID: &str = "track_id";
const VALID_TIME: &str = "valid_time";
const LAT: &str = "lat";
const LON: &str = "lon";
const WIND: &str = "maximum_sustained_wind_speed_knots";
const PRESSURE: &str = "minimum_sea_level_pressure_hpa";
const RADIUS: &str = "radius_34_knot_winds_ne_km";

/// Figures for one storm track on one forecast date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSummary {
    /// Storm identifier, e.g. `AL052024`.
    pub track_id: String,
    /// Number of forecast points on the track.
    pub records: usize,
    /// Highest sustained wind speed in knots.
    pub max_wind_speed: Option<f64>,
    /// Lowest sea level pressure in hPa.
    pub min_pressure: Option<f64>,
    /// Southernmost and northernmost latitude.
    pub lat_range: Option<(f64, f64)>,
    /// Westernmost and easternmost longitude.
    pub lon_range: Option<(f64, f64)>,
    /// Earliest and latest valid time, as found in the data.
    pub time_range: Option<(String, String)>,
    /// Whether any point carries a 34-knot wind radius.
    pub has_radius_data: bool,
}

/// Completeness of a date's track data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQuality {
    /// Every point has both latitude and longitude.
    pub has_coordinates: bool,
    /// Every point has a wind speed.
    pub has_wind_data: bool,
    /// Every point has a pressure.
    pub has_pressure_data: bool,
    /// At least one point has a 34-knot wind radius.
    pub has_radius_data: bool,
    /// Latitude range over all tracks.
    pub lat_range: Option<(f64, f64)>,
    /// Longitude range over all tracks.
    pub lon_range: Option<(f64, f64)>,
}

/// Summary of every track forecast on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    /// Forecast date.
    pub date: DateKey,
    /// Number of rows across all tracks.
    pub total_records: usize,
    /// One entry per track, ordered by track id.
    pub tracks: Vec<TrackSummary>,
    /// Completeness figures.
    pub data_quality: DataQuality,
}

fn polars_err(e: PolarsError) -> DataError {
    DataError::Serialization(format!("Cannot summarize tracks: {e}"))
}

/// Summarize a WeatherLab track table per storm.
///
/// `track_id`, `valid_time`, `lat` and `lon` are required. Wind, pressure and
/// wind-radius columns are optional and count as empty when absent.
///
/// # Errors
/// Returns [`DataError::InvalidParameter`] if a required column is missing and
/// [`DataError::Serialization`] if the table cannot be aggregated.
pub fn summarize(frame: &DataFrame, date: DateKey) -> Result<DaySummary> {
    for required in [TRACK_ID, VALID_TIME, LAT, LON] {
        if frame.column(required).is_err() {
            return Err(DataError::InvalidParameter(format!(
                "Track table has no '{required}' column"
            )));
        }
    }

    let height = frame.height();
    let mut frame = frame.clone();
    for optional in [WIND, PRESSURE, RADIUS] {
        if frame.column(optional).is_err() {
            frame
                .with_column(Column::full_null(
                    optional.into(),
                    height,
                    &DataType::Float64,
                ))
                .map_err(polars_err)?;
        }
    }

    let typed = frame.lazy().with_columns([
        col(TRACK_ID).cast(DataType::String),
        col(VALID_TIME).cast(DataType::String),
        col(LAT).cast(DataType::Float64),
        col(LON).cast(DataType::Float64),
        col(WIND).cast(DataType::Float64),
        col(PRESSURE).cast(DataType::Float64),
        col(RADIUS).cast(DataType::Float64),
    ]);

    let per_track = typed
        .clone()
        .group_by([col(TRACK_ID)])
        .agg([
            len().alias("records"),
            col(WIND).max().alias("max_wind"),
            col(PRESSURE).min().alias("min_pressure"),
            col(LAT).min().alias("lat_min"),
            col(LAT).max().alias("lat_max"),
            col(LON).min().alias("lon_min"),
            col(LON).max().alias("lon_max"),
            col(VALID_TIME).min().alias("time_start"),
            col(VALID_TIME).max().alias("time_end"),
            col(RADIUS).count().alias("radius_points"),
        ])
        .sort([TRACK_ID], SortMultipleOptions::default())
        .collect()
        .map_err(polars_err)?;

    let overall = typed
        .select([
            col(LAT).null_count().alias("lat_nulls"),
            col(LON).null_count().alias("lon_nulls"),
            col(WIND).null_count().alias("wind_nulls"),
            col(PRESSURE).null_count().alias("pressure_nulls"),
            col(RADIUS).count().alias("radius_points"),
            col(LAT).min().alias("lat_min"),
            col(LAT).max().alias("lat_max"),
            col(LON).min().alias("lon_min"),
            col(LON).max().alias("lon_max"),
        ])
        .collect()
        .map_err(polars_err)?;

    Ok(DaySummary {
        date,
        total_records: height,
        tracks: track_summaries(&per_track)?,
        data_quality: data_quality(&overall, height)?,
    })
}

fn track_summaries(per_track: &DataFrame) -> Result<Vec<TrackSummary>> {
    let ids = strings(per_track, TRACK_ID)?;
    let records = counts(per_track, "records")?;
    let max_wind = floats(per_track, "max_wind")?;
    let min_pressure = floats(per_track, "min_pressure")?;
    let lat_min = floats(per_track, "lat_min")?;
    let lat_max = floats(per_track, "lat_max")?;
    let lon_min = floats(per_track, "lon_min")?;
    let lon_max = floats(per_track, "lon_max")?;
    let time_start = strings(per_track, "time_start")?;
    let time_end = strings(per_track, "time_end")?;
    let radius_points = counts(per_track, "radius_points")?;

    Ok((0..per_track.height())
        .map(|i| TrackSummary {
            track_id: ids[i].clone().unwrap_or_default(),
            records: usize::try_from(records[i].unwrap_or_default()).unwrap_or(usize::MAX),
            max_wind_speed: max_wind[i],
            min_pressure: min_pressure[i],
            lat_range: lat_min[i].zip(lat_max[i]),
            lon_range: lon_min[i].zip(lon_max[i]),
            time_range: time_start[i].clone().zip(time_end[i].clone()),
            has_radius_data: radius_points[i].unwrap_or_default() > 0,
        })
        .collect())
}

fn data_quality(overall: &DataFrame, height: usize) -> Result<DataQuality> {
    let first_count = |name: &str| -> Result<u64> {
        Ok(counts(overall, name)?.first().copied().flatten().unwrap_or_default())
    };
    let first_float =
        |name: &str| -> Result<Option<f64>> { Ok(floats(overall, name)?.first().copied().flatten()) };

    let complete = |nulls: u64| height > 0 && nulls == 0;
    Ok(DataQuality {
        has_coordinates: complete(first_count("lat_nulls")? + first_count("lon_nulls")?),
        has_wind_data: complete(first_count("wind_nulls")?),
        has_pressure_data: complete(first_count("pressure_nulls")?),
        has_radius_data: first_count("radius_points")? > 0,
        lat_range: first_float("lat_min")?.zip(first_float("lat_max")?),
        lon_range: first_float("lon_min")?.zip(first_float("lon_max")?),
    })
}

fn floats(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = frame
        .column(name)
        .and_then(|c| c.cast(&DataType::Float64))
        .map_err(polars_err)?;
    Ok(column.f64().map_err(polars_err)?.into_iter().collect())
}

fn counts(frame: &DataFrame, name: &str) -> Result<Vec<Option<u64>>> {
    let column = frame
        .column(name)
        .and_then(|c| c.cast(&DataType::UInt64))
        .map_err(polars_err)?;
    Ok(column.u64().map_err(polars_err)?.into_iter().collect())
}

fn strings(frame: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = frame
        .column(name)
        .and_then(|c| c.cast(&DataType::String))
        .map_err(polars_err)?;
    Ok(column
        .str()
        .map_err(polars_err)?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_csv;
    use crate::tests::SAMPLE;

    fn date() -> DateKey {
        "2024-08-13".parse().unwrap()
    }

    #[test]
    fn test_summarize_sample() {
        let frame = parse_csv(SAMPLE).unwrap().unwrap();
        let summary = summarize(&frame, date()).unwrap();

        assert_eq!(summary.date, date());
        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.tracks.len(), 1);

        let track = &summary.tracks[0];
        assert_eq!(track.track_id, "AL052024");
        assert_eq!(track.records, 2);
        assert_eq!(track.max_wind_speed, Some(50.5));
        assert_eq!(track.min_pressure, None);
        assert_eq!(track.lat_range, Some((16.5, 17.1)));
        assert_eq!(track.lon_range, Some((-61.0, -60.2)));
        assert_eq!(
            track.time_range,
            Some((
                "2024-08-13 00:00:00".to_string(),
                "2024-08-13 06:00:00".to_string()
            ))
        );
        assert!(track.has_radius_data);

        let quality = &summary.data_quality;
        assert!(quality.has_coordinates);
        assert!(quality.has_wind_data);
        assert!(!quality.has_pressure_data);
        assert!(quality.has_radius_data);
        assert_eq!(quality.lat_range, Some((16.5, 17.1)));
    }

    #[test]
    fn test_summarize_orders_tracks() {
        let frame = df! {
            "track_id" => ["EP092024", "AL052024", "EP092024"],
            "valid_time" => ["2024-08-13 12:00:00", "2024-08-13 00:00:00", "2024-08-13 06:00:00"],
            "lat" => [Some(14.0), Some(16.5), None],
            "lon" => [-110.0, -60.2, -111.5],
            "maximum_sustained_wind_speed_knots" => [Some(80.0), Some(45.0), None],
            "minimum_sea_level_pressure_hpa" => [975.0, 1002.0, 980.0],
        }
        .unwrap();

        let summary = summarize(&frame, date()).unwrap();
        let ids: Vec<&str> = summary.tracks.iter().map(|t| t.track_id.as_str()).collect();
        assert_eq!(ids, ["AL052024", "EP092024"]);

        let eastern = &summary.tracks[1];
        assert_eq!(eastern.records, 2);
        assert_eq!(eastern.max_wind_speed, Some(80.0));
        assert_eq!(eastern.min_pressure, Some(975.0));
        assert_eq!(eastern.lat_range, Some((14.0, 14.0)));
        assert_eq!(
            eastern.time_range,
            Some((
                "2024-08-13 06:00:00".to_string(),
                "2024-08-13 12:00:00".to_string()
            ))
        );
        assert!(!eastern.has_radius_data);

        let quality = &summary.data_quality;
        assert!(!quality.has_coordinates);
        assert!(!quality.has_wind_data);
        assert!(quality.has_pressure_data);
        assert!(!quality.has_radius_data);
        assert_eq!(quality.lon_range, Some((-111.5, -60.2)));
    }

    #[test]
    fn test_summarize_requires_track_columns() {
        let frame = df! { "track_id" => ["AL052024"], "lat" => [16.5] }.unwrap();
        assert!(matches!(
            summarize(&frame, date()),
            Err(DataError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_summary_serializes() {
        let frame = parse_csv(SAMPLE).unwrap().unwrap();
        let value = serde_json::to_value(summarize(&frame, date()).unwrap()).unwrap();
        assert_eq!(value["date"], "2024-08-13");
        assert_eq!(value["tracks"][0]["lat_range"], serde_json::json!([16.5, 17.1]));
    }
}
