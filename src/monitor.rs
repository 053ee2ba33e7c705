//! Read-only views for display consumers.
//!
//! Nothing here writes to the stores; a consumer polls
//! [`CandleStore::get_last_n`] and [`ResultStore::snapshot`] and derives what
//! it shows from the copies.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::buffer::{CandleStore, PredictionSnapshot, ResultStore};
use crate::candle::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Latest forecast compared with the latest close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastDelta {
    pub target_timestamp: DateTime<Utc>,
    pub predicted: f64,
    pub diff: f64,
    pub diff_pct: f64,
    pub direction: Direction,
}

/// Metrics shown next to the price chart.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMetrics {
    pub last_close: f64,
    pub candles_shown: usize,
    pub forecast: Option<ForecastDelta>,
    pub accuracy: Option<Accuracy>,
}

impl LiveMetrics {
    /// Build metrics from snapshots. Returns `None` with fewer than two
    /// candles, since there is nothing to chart yet.
    pub fn compute(candles: &[Candle], predictions: &PredictionSnapshot) -> Option<Self> {
        if candles.len() < 2 {
            return None;
        }
        let last_close = candles.last()?.close;

        let forecast = predictions.iter().last().map(|(target_timestamp, predicted)| {
            let diff = predicted - last_close;
            ForecastDelta {
                target_timestamp,
                predicted,
                diff,
                diff_pct: diff / last_close * 100.0,
                direction: if diff > 0.0 {
                    Direction::Up
                } else {
                    Direction::Down
                },
            }
        });

        Some(Self {
            last_close,
            candles_shown: candles.len(),
            forecast,
            accuracy: score_predictions(candles, predictions),
        })
    }

    /// Read both stores and compute metrics over the last `window` candles.
    pub fn read(candles: &CandleStore, results: &ResultStore, window: usize) -> Option<Self> {
        let candles = candles.get_last_n(window);
        let predictions = results.snapshot();
        Self::compute(&candles, &predictions)
    }
}

impl fmt::Display for LiveMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "last close {:.2}", self.last_close)?;
        match &self.forecast {
            Some(fc) => write!(
                f,
                " | prediction {:.2} for {} | diff {:+.2} ({:+.2}%) | {}",
                fc.predicted,
                fc.target_timestamp.format("%H:%M"),
                fc.diff,
                fc.diff_pct,
                fc.direction
            )?,
            None => write!(f, " | prediction -")?,
        }
        if let Some(acc) = &self.accuracy {
            write!(f, " | MAE {:.2} MAPE {:.2}% over {}", acc.mae, acc.mape, acc.samples)?;
        }
        Ok(())
    }
}

/// Error of past forecasts against realized closes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accuracy {
    pub samples: usize,
    pub mae: f64,
    pub mape: f64,
}

/// Mean absolute error. `None` for empty or mismatched inputs.
pub fn mae(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum();
    Some(sum / actual.len() as f64)
}

/// Mean absolute percentage error, in percent.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| ((a - p) / a).abs())
        .sum();
    Some(sum / actual.len() as f64 * 100.0)
}

/// Score forecasts whose target bar has been realized.
///
/// A forecast for bar `t` is matched with the close of the candle whose
/// bucket starts at `t`. Later forecasts for the same bar win.
pub fn score_predictions(candles: &[Candle], predictions: &PredictionSnapshot) -> Option<Accuracy> {
    let realized: HashMap<DateTime<Utc>, f64> =
        candles.iter().map(|c| (c.bucket_start, c.close)).collect();

    let mut latest: HashMap<DateTime<Utc>, f64> = HashMap::new();
    for (ts, price) in predictions.iter() {
        latest.insert(ts, price);
    }

    let (actual, predicted): (Vec<f64>, Vec<f64>) = latest
        .iter()
        .filter_map(|(ts, price)| realized.get(ts).map(|close| (*close, *price)))
        .unzip();

    Some(Accuracy {
        samples: actual.len(),
        mae: mae(&actual, &predicted)?,
        mape: mape(&actual, &predicted)?,
    })
}
