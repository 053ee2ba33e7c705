#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use candle_forecast::{Candle, FittedScaler, Forecaster, FeaturePipeline, PriceModel};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use ndarray::Array3;

pub fn minute(m: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 9, 15, 0).unwrap() + TimeDelta::minutes(m)
}

/// Candles on consecutive minutes with a gentle upward drift.
pub fn candles(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = 100.0 + i as f64 * 0.25;
            Candle {
                bucket_start: minute(i as i64),
                open: close - 0.1,
                high: close + 0.3,
                low: close - 0.3,
                close,
            }
        })
        .collect()
}

/// Model that always returns `value` and counts its calls.
pub struct CountingModel {
    pub value: f64,
    pub calls: AtomicUsize,
}

impl CountingModel {
    pub fn new(value: f64) -> Arc<Self> {
        Arc::new(Self {
            value,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PriceModel for CountingModel {
    fn predict(&self, _batch: &Array3<f32>) -> anyhow::Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value)
    }
}

/// Model that blocks its thread for `delay` on every call, like a heavy
/// ONNX session would.
pub struct SlowModel {
    pub delay: Duration,
    pub started: AtomicBool,
}

impl SlowModel {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            started: AtomicBool::new(false),
        })
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl PriceModel for SlowModel {
    fn predict(&self, _batch: &Array3<f32>) -> anyhow::Result<f64> {
        self.started.store(true, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(0.0)
    }
}

pub fn forecaster(lookback: usize, model: Arc<dyn PriceModel>) -> Forecaster {
    Forecaster::new(
        FeaturePipeline::new(lookback),
        model,
        Arc::new(FittedScaler::identity(4)),
        TimeDelta::minutes(1),
    )
    .expect("forecaster")
}
