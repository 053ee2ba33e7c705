//! Price prediction inference interface.
//!
//! [`PriceModel`] is the opaque inference collaborator; [`OnnxModel`] is the
//! production implementation. [`Forecaster`] runs one full forecast: features,
//! inference, inverse scaling and conversion back to a price.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{DateTime, TimeDelta, Utc};
use ndarray::{Array2, Array3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use tracing::{debug, info};

use crate::candle::{floor_to_bar, Candle, PredictionRecord};
use crate::features::{FeaturePipeline, PriceField};
use crate::scaler::Scaler;
use crate::{Error, Result};

/// Model mapping a `(1, lookback, features)` batch to one scaled log return.
pub trait PriceModel: Send + Sync {
    fn predict(&self, batch: &Array3<f32>) -> anyhow::Result<f64>;
}

impl<F> PriceModel for F
where
    F: Fn(&Array3<f32>) -> anyhow::Result<f64> + Send + Sync,
{
    fn predict(&self, batch: &Array3<f32>) -> anyhow::Result<f64> {
        self(batch)
    }
}

/// ONNX Runtime backed model.
pub struct OnnxModel {
    // `Session::run` needs exclusive access.
    session: Mutex<Session>,
}

impl OnnxModel {
    /// Load an ONNX model.
    ///
    /// # Example
    /// ```no_run
    /// use candle_forecast::OnnxModel;
    ///
    /// let model = OnnxModel::load("models/model.onnx", true).unwrap();
    /// ```
    pub fn load(model_path: impl AsRef<Path>, optimize_graph: bool) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            anyhow::bail!("model file not found: {}", model_path.display());
        }

        let session = Session::builder()?
            .with_optimization_level(if optimize_graph {
                GraphOptimizationLevel::Level3
            } else {
                GraphOptimizationLevel::Level1
            })?
            .with_intra_threads(1)? // Single-threaded for determinism
            .commit_from_file(model_path)
            .with_context(|| format!("loading ONNX model {}", model_path.display()))?;

        info!("Loaded ONNX model from {:?}", model_path);
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl PriceModel for OnnxModel {
    fn predict(&self, batch: &Array3<f32>) -> anyhow::Result<f64> {
        let input_tensor = Value::from_array(batch.clone())?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let outputs = session.run(ort::inputs![input_tensor])?;

        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
        let value = data
            .first()
            .copied()
            .ok_or_else(|| anyhow!("model returned an empty tensor"))?;
        Ok(value as f64)
    }
}

/// Map a scaled close log return back to raw space.
///
/// The value is placed in the close column of an otherwise zero row before
/// the inverse transform, mirroring how the scaler was fitted.
pub fn unscale_close_return(scaled: f64, scaler: &dyn Scaler) -> Result<f64> {
    let mut padded = Array2::<f64>::zeros((1, scaler.feature_count()));
    let close = PriceField::Close.column();
    if close >= padded.ncols() {
        return Err(Error::Scaler(format!(
            "scaler has {} features, close column is {close}",
            padded.ncols()
        )));
    }
    padded[[0, close]] = scaled;
    let restored = scaler.inverse_transform(&padded)?;
    Ok(restored[[0, close]])
}

/// Convert a log return relative to `anchor_price` into a price.
pub fn inverse_log_return_to_price(log_return: f64, anchor_price: f64) -> f64 {
    anchor_price * log_return.exp()
}

/// Start of the bar after the one containing `now`.
pub fn next_bar_timestamp(now: DateTime<Utc>, bar_duration: TimeDelta) -> Option<DateTime<Utc>> {
    floor_to_bar(now, bar_duration).map(|start| start + bar_duration)
}

/// One-shot forecast of the next bar's close.
#[derive(Clone)]
pub struct Forecaster {
    pipeline: FeaturePipeline,
    model: Arc<dyn PriceModel>,
    scaler: Arc<dyn Scaler>,
    bar_duration: TimeDelta,
}

impl Forecaster {
    /// Assemble a forecaster.
    ///
    /// # Arguments
    /// * `pipeline` - Feature pipeline sized to the model's lookback
    /// * `model` - Inference backend returning a scaled close log return
    /// * `scaler` - Scaler fitted on the OHLC log-return columns
    /// * `bar_duration` - Bar length used to compute the target timestamp
    ///
    /// Fails with `Scaler` unless the scaler covers exactly the four OHLC
    /// columns.
    pub fn new(
        pipeline: FeaturePipeline,
        model: Arc<dyn PriceModel>,
        scaler: Arc<dyn Scaler>,
        bar_duration: TimeDelta,
    ) -> Result<Self> {
        if scaler.feature_count() != PriceField::COUNT {
            return Err(Error::Scaler(format!(
                "scaler was fitted on {} features, pipeline produces {}",
                scaler.feature_count(),
                PriceField::COUNT
            )));
        }
        if bar_duration <= TimeDelta::zero() {
            return Err(Error::Config(format!(
                "bar duration must be positive, got {bar_duration}"
            )));
        }
        Ok(Self {
            pipeline,
            model,
            scaler,
            bar_duration,
        })
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    /// Forecast the close of the bar after `now` from `candles`.
    ///
    /// The target timestamp comes from the wall clock, not from the candles,
    /// so it runs ahead of the data when the feed lags.
    pub fn forecast(&self, candles: &[Candle], now: DateTime<Utc>) -> Result<PredictionRecord> {
        let window = self.pipeline.build(candles, self.scaler.as_ref())?;

        let scaled = self
            .model
            .predict(&window.batch)
            .map_err(Error::inference)?;
        if !scaled.is_finite() {
            return Err(Error::inference(format!("model returned {scaled}")));
        }

        let log_return = unscale_close_return(scaled, self.scaler.as_ref())?;
        let price = inverse_log_return_to_price(log_return, window.anchor_price);
        debug!(scaled, log_return, anchor = window.anchor_price, price, "forecast computed");

        let target_timestamp = next_bar_timestamp(now, self.bar_duration)
            .ok_or_else(|| Error::Config("cannot align target timestamp".into()))?;

        Ok(PredictionRecord {
            target_timestamp,
            price,
        })
    }
}
