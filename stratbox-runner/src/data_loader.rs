//! CSV bar loading for the CLI and test fixtures.
//!
//! Expected header: `timestamp,open,high,low,close,volume`. Timestamps are
//! RFC 3339 or plain dates (`2024-01-02`, taken as midnight UTC).

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use stratbox_core::domain::Bar;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to read bars: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: {message}")]
    Row { row: usize, message: String },
}

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bars = Vec::new();
    for (i, row) in reader.deserialize::<BarRow>().enumerate() {
        let row = row?;
        let timestamp = parse_bar_timestamp(&row.timestamp).map_err(|message| {
            DataError::Row {
                row: i + 1,
                message,
            }
        })?;
        let bar = Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        };
        if !bar.is_sane() {
            warn!(row = i + 1, "bar fails sanity check (high < low or non-finite)");
        }
        bars.push(bar);
    }
    Ok(bars)
}

/// RFC 3339 first, then a bare date at midnight UTC.
pub fn parse_bar_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| format!("unrecognized timestamp {raw:?} (want RFC 3339 or YYYY-MM-DD)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_rfc3339_and_bare_dates() {
        assert_eq!(
            parse_bar_timestamp("2024-01-02T15:30:00Z").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 15, 30, 0).unwrap()
        );
        assert_eq!(
            parse_bar_timestamp("2024-01-02").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
        assert!(parse_bar_timestamp("yesterday").is_err());
    }

    #[test]
    fn loads_bars_from_csv() {
        let dir = std::env::temp_dir().join(format!("stratbox_csv_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bars.csv");
        std::fs::write(
            &path,
            "timestamp,open,high,low,close,volume\n\
             2024-01-02,100.0,102.0,99.0,101.0,10000\n\
             2024-01-03,101.0,103.0,100.0,102.5,12000\n",
        )
        .unwrap();

        let bars = load_bars_csv(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 102.5);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bad_timestamp_reports_the_row() {
        let dir = std::env::temp_dir().join(format!("stratbox_csv_bad_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bars.csv");
        std::fs::write(
            &path,
            "timestamp,open,high,low,close,volume\nnot-a-date,1,1,1,1,1\n",
        )
        .unwrap();

        let err = load_bars_csv(&path).unwrap_err();
        assert!(matches!(err, DataError::Row { row: 1, .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
