//! Feature computation for model inputs.
//!
//! The model consumes one sequence of per-bar log returns of the four OHLC
//! fields, scaled with the same fitted scaler used in training. Column order
//! must match training exactly: open, high, low, close.

use ndarray::{Array2, Array3, Axis};

use crate::candle::Candle;
use crate::scaler::Scaler;
use crate::{Error, Result};

/// Price fields tracked as features, in model column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
}

impl PriceField {
    pub const ALL: [PriceField; 4] = [
        PriceField::Open,
        PriceField::High,
        PriceField::Low,
        PriceField::Close,
    ];

    /// Number of feature columns.
    pub const COUNT: usize = Self::ALL.len();

    /// Column index in the feature matrix.
    pub fn column(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
        }
    }

    pub fn value(self, candle: &Candle) -> f64 {
        match self {
            PriceField::Open => candle.open,
            PriceField::High => candle.high,
            PriceField::Low => candle.low,
            PriceField::Close => candle.close,
        }
    }
}

/// Compute bar-to-bar log returns for every price field.
///
/// Row `i` holds `ln(candles[i + 1].f / candles[i].f)`, so `n` candles give
/// `n - 1` rows. Any non-positive price fails the whole computation.
pub fn compute_log_returns(candles: &[Candle]) -> Result<Array2<f64>> {
    for candle in candles {
        for field in PriceField::ALL {
            let value = field.value(candle);
            // `!(v > 0)` also catches NaN
            if !(value > 0.0) {
                return Err(Error::NonPositivePrice {
                    field: field.name(),
                    value,
                    bucket_start: candle.bucket_start,
                });
            }
        }
    }

    let rows = candles.len().saturating_sub(1);
    let mut returns = Array2::<f64>::zeros((rows, PriceField::COUNT));
    for (i, pair) in candles.windows(2).enumerate() {
        for field in PriceField::ALL {
            returns[[i, field.column()]] = (field.value(&pair[1]) / field.value(&pair[0])).ln();
        }
    }
    Ok(returns)
}

/// Scaled model input built from one window of candles.
#[derive(Debug, Clone)]
pub struct FeatureWindow {
    /// Single-sequence batch, shape `(1, lookback, 4)`
    pub batch: Array3<f32>,
    /// Raw close of the most recent candle
    pub anchor_price: f64,
}

impl FeatureWindow {
    pub fn lookback(&self) -> usize {
        self.batch.len_of(Axis(1))
    }
}

/// Turns the most recent `lookback + 1` candles into a scaled feature batch.
#[derive(Debug, Clone, Copy)]
pub struct FeaturePipeline {
    lookback: usize,
}

impl FeaturePipeline {
    pub fn new(lookback: usize) -> Self {
        Self { lookback }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Candles needed for one window.
    pub fn required_candles(&self) -> usize {
        self.lookback + 1
    }

    /// Build the scaled batch and anchor price.
    ///
    /// # Arguments
    /// * `candles` - Window in ascending time order; extra leading candles are ignored
    /// * `scaler` - Fitted scaler applied to the log-return matrix
    ///
    /// # Errors
    /// `InsufficientData` with fewer than `lookback + 1` candles,
    /// `NonPositivePrice` when a log return is undefined.
    pub fn build(&self, candles: &[Candle], scaler: &dyn Scaler) -> Result<FeatureWindow> {
        let required = self.required_candles();
        if candles.len() < required {
            return Err(Error::InsufficientData {
                required,
                available: candles.len(),
            });
        }
        let window = &candles[candles.len() - required..];

        let log_returns = compute_log_returns(window)?;
        let scaled = scaler.transform(&log_returns)?;

        let batch = scaled
            .mapv(|v| v as f32)
            .into_shape_with_order((1, self.lookback, PriceField::COUNT))
            .map_err(|e| Error::Scaler(format!("unexpected scaled shape: {e}")))?;

        // `window` is non-empty since `required >= 1`
        let anchor_price = window[window.len() - 1].close;

        Ok(FeatureWindow {
            batch,
            anchor_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler::FittedScaler;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 15, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                bucket_start: start + TimeDelta::minutes(i as i64),
                open: c - 0.5,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
            })
            .collect()
    }

    #[test]
    fn test_compute_log_returns_basic() {
        let candles = candles_from_closes(&[100.0, 101.0, 102.0, 101.5]);
        let returns = compute_log_returns(&candles).unwrap();

        assert_eq!(returns.dim(), (3, 4));
        let close = PriceField::Close.column();
        assert!((returns[[0, close]] - (101.0_f64 / 100.0).ln()).abs() < 1e-10);
        assert!((returns[[1, close]] - (102.0_f64 / 101.0).ln()).abs() < 1e-10);
        assert!((returns[[2, close]] - (101.5_f64 / 102.0).ln()).abs() < 1e-10);

        let high = PriceField::High.column();
        assert!((returns[[0, high]] - (102.0_f64 / 101.0).ln()).abs() < 1e-10);
    }

    #[test]
    fn test_compute_log_returns_zero_price() {
        let mut candles = candles_from_closes(&[100.0, 101.0, 102.0]);
        candles[1].low = 0.0;

        match compute_log_returns(&candles) {
            Err(Error::NonPositivePrice { field, value, .. }) => {
                assert_eq!(field, "low");
                assert_eq!(value, 0.0);
            }
            other => panic!("expected NonPositivePrice, got {other:?}"),
        }
    }

    #[test]
    fn test_compute_log_returns_rejects_nan() {
        let mut candles = candles_from_closes(&[100.0, 101.0]);
        candles[0].open = f64::NAN;
        assert!(matches!(
            compute_log_returns(&candles),
            Err(Error::NonPositivePrice { field: "open", .. })
        ));
    }

    #[test]
    fn test_pipeline_shape_and_anchor() {
        let pipeline = FeaturePipeline::new(5);
        let candles = candles_from_closes(&[100.0, 100.5, 101.0, 100.8, 101.2, 101.9]);
        let scaler = FittedScaler::identity(4);

        let window = pipeline.build(&candles, &scaler).unwrap();
        assert_eq!(window.batch.dim(), (1, 5, 4));
        assert_eq!(window.lookback(), 5);
        assert_eq!(window.anchor_price, 101.9);

        let expected = (101.9_f64 / 101.2).ln() as f32;
        assert!((window.batch[[0, 4, PriceField::Close.column()]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_pipeline_uses_most_recent_window() {
        let pipeline = FeaturePipeline::new(2);
        let candles = candles_from_closes(&[50.0, 100.0, 110.0, 121.0]);
        let window = pipeline.build(&candles, &FittedScaler::identity(4)).unwrap();

        assert_eq!(window.batch.dim(), (1, 2, 4));
        assert_eq!(window.anchor_price, 121.0);
        let first = window.batch[[0, 0, PriceField::Close.column()]];
        assert!((first - (110.0_f64 / 100.0).ln() as f32).abs() < 1e-6);
    }

    #[test]
    fn test_pipeline_insufficient_data() {
        let pipeline = FeaturePipeline::new(5);
        let candles = candles_from_closes(&[100.0, 101.0, 102.0]);

        match pipeline.build(&candles, &FittedScaler::identity(4)) {
            Err(Error::InsufficientData {
                required,
                available,
            }) => {
                assert_eq!(required, 6);
                assert_eq!(available, 3);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_applies_scaler() {
        let pipeline = FeaturePipeline::new(1);
        let candles = candles_from_closes(&[100.0, 110.0]);
        let scaler = FittedScaler::Standard {
            mean: vec![0.0; 4],
            scale: vec![2.0; 4],
        };

        let window = pipeline.build(&candles, &scaler).unwrap();
        let raw = (110.0_f64 / 100.0).ln();
        let got = window.batch[[0, 0, PriceField::Close.column()]] as f64;
        assert!((got - raw / 2.0).abs() < 1e-6);
    }
}
