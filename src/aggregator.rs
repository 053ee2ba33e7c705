//! Tick-to-candle aggregation.
//!
//! [`TickAggregator`] is a two-state machine: `Idle` until the first tick,
//! then `Building` the bar of the current bucket. A tick from a different
//! bucket finalizes the open bar and starts the next one from that tick.
//!
//! Ticks are assumed to arrive in non-decreasing time order. A late tick for
//! a bucket that was already closed simply opens a new bar for that bucket.

use std::sync::Arc;

use chrono::TimeDelta;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{CandleStore, ResultStore};
use crate::candle::{floor_to_bar, Candle, RawTick, Tick};
use crate::{Error, Result};

/// Aggregation state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregatorState {
    /// No bar open yet
    Idle,
    /// Accumulating ticks into the bar for `Candle::bucket_start`
    Building(Candle),
}

#[derive(Debug)]
pub struct TickAggregator {
    bar_duration: TimeDelta,
    state: AggregatorState,
}

impl TickAggregator {
    pub fn new(bar_duration: TimeDelta) -> Result<Self> {
        if bar_duration <= TimeDelta::zero() {
            return Err(Error::Config(format!(
                "bar duration must be positive, got {bar_duration}"
            )));
        }
        Ok(Self {
            bar_duration,
            state: AggregatorState::Idle,
        })
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// The bar currently being built, if any.
    pub fn current(&self) -> Option<&Candle> {
        match &self.state {
            AggregatorState::Idle => None,
            AggregatorState::Building(candle) => Some(candle),
        }
    }

    /// Feed one tick. Returns the finalized bar when the tick crosses into a
    /// new bucket.
    pub fn on_tick(&mut self, tick: Tick) -> Result<Option<Candle>> {
        let bucket = floor_to_bar(tick.timestamp, self.bar_duration).ok_or_else(|| {
            Error::TickParse(format!("timestamp {} cannot be bucketed", tick.timestamp))
        })?;

        match &mut self.state {
            AggregatorState::Idle => {
                debug!("Started first candle at {} with price {}", bucket, tick.price);
                self.state = AggregatorState::Building(Candle::open_at(bucket, tick.price));
                Ok(None)
            }
            AggregatorState::Building(current) if current.bucket_start == bucket => {
                current.update(tick.price);
                Ok(None)
            }
            AggregatorState::Building(current) => {
                let finished = *current;
                *current = Candle::open_at(bucket, tick.price);
                Ok(Some(finished))
            }
        }
    }

    /// Validate and feed a raw feed record. Malformed records leave the state
    /// untouched.
    pub fn on_raw(&mut self, raw: RawTick) -> Result<Option<Candle>> {
        let tick = Tick::try_from(raw)?;
        self.on_tick(tick)
    }
}

/// Spawn the ingest task.
///
/// Drains tick messages from `ticks`, appends finalized candles to `candles`
/// and, after each one, logs the latest forecast from `results`. Stops when
/// the channel closes or `cancel` fires; the partially built bar is dropped.
pub fn spawn_ingest(
    mut ticks: mpsc::Receiver<RawTick>,
    mut aggregator: TickAggregator,
    candles: Arc<CandleStore>,
    results: Arc<ResultStore>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Tick aggregator waiting for first tick");
        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = ticks.recv() => match msg {
                    Some(raw) => raw,
                    None => {
                        info!("Tick feed closed");
                        break;
                    }
                },
            };

            match aggregator.on_raw(raw) {
                Ok(Some(candle)) => {
                    info!(
                        bucket = %candle.bucket_start,
                        open = candle.open,
                        high = candle.high,
                        low = candle.low,
                        close = candle.close,
                        "Final candle"
                    );
                    candles.push(candle);
                    if let Some(next) = results.last() {
                        info!(
                            "NEXT CANDLE PREDICTION ({}): {:.2}",
                            next.target_timestamp, next.price
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Dropping tick {:?}: {}", raw, e),
            }
        }
    })
}
