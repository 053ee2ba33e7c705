//! Live next-bar price forecasting from a tick stream.
//!
//! Ticks are aggregated into fixed-duration OHLC candles, kept in a bounded
//! rolling window, and turned into a scaled log-return matrix on a fixed
//! period. An external model predicts the next close, which is published to a
//! bounded result log for display.

pub mod aggregator;
pub mod buffer;
pub mod candle;
pub mod config;
pub mod error;
pub mod features;
pub mod monitor;
pub mod predictor;
pub mod scaler;
pub mod scheduler;
pub mod warm_start;

pub use aggregator::{spawn_ingest, AggregatorState, TickAggregator};
pub use buffer::{BoundedStore, CandleStore, PredictionSnapshot, ResultStore, RollingBuffer};
pub use candle::{Candle, PredictionRecord, RawTick, Tick};
pub use config::Config;
pub use error::Error;
pub use features::{FeaturePipeline, FeatureWindow, PriceField};
pub use predictor::{Forecaster, OnnxModel, PriceModel};
pub use scaler::{FittedScaler, Scaler, ScalerArtifact};
pub use scheduler::{PredictionScheduler, SchedulerHandle, SchedulerState};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
