//! Tick, candle and prediction records.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::{Error, Result};

/// Tick record as delivered by the feed, before validation.
///
/// Prices are expected to be unit-converted already; timestamps are epoch
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RawTick {
    pub price: f64,
    #[serde(alias = "exchange_timestamp", alias = "ts_ms")]
    pub timestamp_ms: i64,
}

impl RawTick {
    pub fn new(price: f64, timestamp_ms: i64) -> Self {
        Self { price, timestamp_ms }
    }

    /// Decode one JSON feed message.
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::TickParse(e.to_string()))
    }
}

/// A validated price tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<RawTick> for Tick {
    type Error = Error;

    fn try_from(raw: RawTick) -> Result<Self> {
        if !raw.price.is_finite() {
            return Err(Error::TickParse(format!("price {} is not finite", raw.price)));
        }
        let timestamp = DateTime::from_timestamp_millis(raw.timestamp_ms).ok_or_else(|| {
            Error::TickParse(format!("timestamp {} ms is out of range", raw.timestamp_ms))
        })?;
        Ok(Self {
            price: raw.price,
            timestamp,
        })
    }
}

/// One finalized OHLC bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    /// Start of the bucket, truncated to the bar duration.
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Opens a bar where every price field equals `price`.
    pub fn open_at(bucket_start: DateTime<Utc>, price: f64) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Folds a later price from the same bucket into the bar.
    pub fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// A forecast close for the bar starting at `target_timestamp`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionRecord {
    pub target_timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Truncates `ts` down to a multiple of `bar` since the Unix epoch.
///
/// Returns `None` for non-positive bar durations.
pub fn floor_to_bar(ts: DateTime<Utc>, bar: TimeDelta) -> Option<DateTime<Utc>> {
    let step = bar.num_milliseconds();
    if step <= 0 {
        return None;
    }
    let ms = ts.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(step))
}
