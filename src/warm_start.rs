//! Warm start of the candle window from historical bars.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::buffer::CandleStore;
use crate::candle::Candle;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "date", alias = "datetime")]
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse a CSV timestamp. Offsets are honoured; naive values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Read all candles from a CSV with `timestamp, open, high, low, close`
/// columns, sorted ascending by timestamp.
pub fn read_candles(path: &Path) -> Result<Vec<Candle>> {
    let fail = |reason: String| Error::WarmStart {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::Reader::from_path(path).map_err(|e| fail(e.to_string()))?;
    let mut candles = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| fail(e.to_string()))?;
        let bucket_start = parse_timestamp(&row.timestamp)
            .ok_or_else(|| fail(format!("row {}: bad timestamp {:?}", line + 1, row.timestamp)))?;
        candles.push(Candle {
            bucket_start,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
        });
    }
    candles.sort_by_key(|c| c.bucket_start);
    Ok(candles)
}

/// Replace the store contents with the most recent historical candles.
///
/// Loads the last `max(requested, lookback + 1)` rows. Returns the number of
/// candles held afterwards.
pub fn load_csv(
    store: &CandleStore,
    path: impl AsRef<Path>,
    lookback: usize,
    requested: Option<usize>,
) -> Result<usize> {
    let path = path.as_ref();
    let candles = read_candles(path)?;
    if candles.is_empty() {
        return Err(Error::WarmStart {
            path: path.to_path_buf(),
            reason: "no rows".into(),
        });
    }

    let take = requested.unwrap_or(0).max(lookback + 1);
    let tail = &candles[candles.len().saturating_sub(take)..];
    let loaded = store.replace(tail.iter().copied());
    info!("Warm-started buffer with {} historical candles from {:?}", loaded, path);
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn write_csv(rows: &[&str], header: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{header}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 9, 15, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02 09:15:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T09:15:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 14:45:00+05:30"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 09:15"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_load_sorts_and_takes_tail() {
        let file = write_csv(
            &[
                "2024-01-02 09:18:00,103,104,102,103.5",
                "2024-01-02 09:15:00,100,101,99,100.5",
                "2024-01-02 09:17:00,102,103,101,102.5",
                "2024-01-02 09:16:00,101,102,100,101.5",
            ],
            "date,open,high,low,close",
        );

        let store = CandleStore::new(10);
        let loaded = load_csv(&store, file.path(), 2, Some(1)).unwrap();

        assert_eq!(loaded, 3);
        let closes: Vec<f64> = store.to_vec().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![101.5, 102.5, 103.5]);
    }

    #[test]
    fn test_load_respects_larger_request() {
        let rows: Vec<String> = (0..10)
            .map(|i| format!("2024-01-02T09:{:02}:00Z,1,1,1,{}", 10 + i, i + 1))
            .collect();
        let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
        let file = write_csv(&rows, "timestamp,open,high,low,close");

        let store = CandleStore::new(20);
        assert_eq!(load_csv(&store, file.path(), 2, Some(8)).unwrap(), 8);
        assert_eq!(store.last().map(|c| c.close), Some(10.0));
    }

    #[test]
    fn test_missing_file_is_warm_start_error() {
        let store = CandleStore::new(5);
        let err = load_csv(&store, "/nonexistent/bars.csv", 2, None).unwrap_err();
        assert!(matches!(err, Error::WarmStart { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_bad_row_leaves_store_untouched() {
        let file = write_csv(
            &["2024-01-02 09:15:00,100,101,99,100.5", "not-a-date,1,1,1,1"],
            "date,open,high,low,close",
        );
        let store = CandleStore::new(5);
        store.push(Candle::open_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 1.0));

        assert!(load_csv(&store, file.path(), 1, None).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_file_is_error() {
        let file = write_csv(&[], "date,open,high,low,close");
        let store = CandleStore::new(5);
        assert!(matches!(
            load_csv(&store, file.path(), 1, None),
            Err(Error::WarmStart { .. })
        ));
    }
}
