use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Boxed failure coming out of an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed tick: {0}")]
    TickParse(String),

    #[error("insufficient data: need {required} candles, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("non-positive {field} price {value} in candle at {bucket_start}")]
    NonPositivePrice {
        field: &'static str,
        value: f64,
        bucket_start: DateTime<Utc>,
    },

    #[error("inference failed: {0}")]
    Inference(#[source] BoxError),

    #[error("warm start from {path:?} failed: {reason}")]
    WarmStart { path: PathBuf, reason: String },

    #[error("scaler error: {0}")]
    Scaler(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn inference(err: impl Into<BoxError>) -> Self {
        Self::Inference(err.into())
    }
}
