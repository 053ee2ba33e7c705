//! Periodic prediction task.
//!
//! The scheduler starts in [`SchedulerState::Waiting`], polling the candle
//! store until it holds enough candles for one forecast, then switches to
//! [`SchedulerState::Active`] and forecasts once per period. A failed cycle
//! is logged and skipped; the schedule is never shifted to retry it.
//!
//! Each live cycle runs the forecast on tokio's blocking pool so a slow model
//! never stalls the ingest or display tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::buffer::{CandleStore, ResultStore};
use crate::candle::{Candle, PredictionRecord};
use crate::predictor::Forecaster;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Waiting,
    Active,
}

pub struct PredictionScheduler {
    forecaster: Forecaster,
    candles: Arc<CandleStore>,
    results: Arc<ResultStore>,
    poll_interval: Duration,
    period: Duration,
}

impl PredictionScheduler {
    /// Create a scheduler over shared stores.
    ///
    /// # Arguments
    /// * `forecaster` - Features, model and scaler for one forecast
    /// * `candles` - Store filled by the ingest task
    /// * `results` - Store the forecasts are published to
    /// * `poll_interval` - Readiness poll period while waiting
    /// * `period` - Period between live cycles
    ///
    /// Both durations must be non-zero.
    pub fn new(
        forecaster: Forecaster,
        candles: Arc<CandleStore>,
        results: Arc<ResultStore>,
        poll_interval: Duration,
        period: Duration,
    ) -> Result<Self> {
        if poll_interval.is_zero() || period.is_zero() {
            return Err(Error::Config(format!(
                "scheduler periods must be positive (poll {:?}, period {:?})",
                poll_interval, period
            )));
        }
        Ok(Self {
            forecaster,
            candles,
            results,
            poll_interval,
            period,
        })
    }

    fn snapshot_window(&self) -> Result<Vec<Candle>> {
        let required = self.forecaster.pipeline().required_candles();
        let window = self.candles.get_last_n(required);
        if window.len() < required {
            return Err(Error::InsufficientData {
                required,
                available: window.len(),
            });
        }
        Ok(window)
    }

    fn publish(&self, record: PredictionRecord) {
        self.results.push(record);
        info!(
            "Predicted price for {}: {:.2}",
            record.target_timestamp, record.price
        );
    }

    /// Snapshot the window, forecast, and publish the result on the calling
    /// thread.
    ///
    /// The store lock is only held for the snapshot copy; the forecast runs on
    /// the copy.
    pub fn run_once(&self) -> Result<()> {
        let window = self.snapshot_window()?;
        let record = self.forecaster.forecast(&window, Utc::now())?;
        self.publish(record);
        Ok(())
    }

    /// Same as [`run_once`](Self::run_once) with the forecast moved to the
    /// blocking pool.
    pub async fn run_cycle(&self) -> Result<()> {
        let window = self.snapshot_window()?;
        let forecaster = self.forecaster.clone();
        let record = tokio::task::spawn_blocking(move || forecaster.forecast(&window, Utc::now()))
            .await
            .map_err(Error::inference)??;
        self.publish(record);
        Ok(())
    }

    /// Spawn the scheduler loop on the current tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Waiting);
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(task_cancel, state_tx).await });
        SchedulerHandle {
            cancel,
            state: state_rx,
            join,
        }
    }

    async fn run(self, cancel: CancellationToken, state: watch::Sender<SchedulerState>) {
        let required = self.forecaster.pipeline().required_candles();
        info!("Predictor waiting for {} candles", required);

        loop {
            if cancel.is_cancelled() {
                return;
            }
            if self.candles.len() >= required {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(self.poll_interval) => {}
            }
        }

        state.send_replace(SchedulerState::Active);
        info!("Predictor buffer ready, starting live predictions");

        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }
            match self.run_cycle().await {
                Ok(()) => {}
                Err(e @ (Error::InsufficientData { .. } | Error::NonPositivePrice { .. })) => {
                    warn!("Skipping prediction cycle: {}", e)
                }
                Err(e) => error!("Prediction error: {}", e),
            }
        }
        info!("Predictor stopped");
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SchedulerState>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Token that stops the scheduler when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a stop and wait up to `timeout` for the loop to exit.
    ///
    /// Returns `false` if the task did not finish in time; it is left to
    /// finish on its own.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        self.cancel.cancel();
        match time::timeout(timeout, self.join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Predictor task failed: {}", e);
                true
            }
            Err(_) => {
                warn!("Predictor did not stop within {:?}", timeout);
                false
            }
        }
    }
}
