//! Live next-bar forecaster.
//!
//! Reads JSON-lines ticks (`{"price": .., "timestamp_ms": ..}`) from a file or
//! stdin, aggregates them into candles and logs a forecast every period.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use candle_forecast::monitor::LiveMetrics;
use candle_forecast::{
    spawn_ingest, warm_start, CandleStore, Config, FeaturePipeline, Forecaster, OnnxModel,
    PredictionScheduler, RawTick, ResultStore, ScalerArtifact, TickAggregator,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines tick source; stdin when omitted
    #[arg(short, long)]
    ticks: Option<PathBuf>,

    /// Override the ONNX model path
    #[arg(long)]
    model: Option<PathBuf>,

    /// Override the scaler JSON path
    #[arg(long)]
    scaler: Option<PathBuf>,

    /// Override the warm-start CSV path
    #[arg(long)]
    warm_start: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    if let Some(model) = args.model {
        config.model.model_path = model;
    }
    if let Some(scaler) = args.scaler {
        config.model.scaler_path = scaler;
    }
    if let Some(csv) = args.warm_start {
        config.warm_start.csv_path = Some(csv);
    }
    config.validate()?;
    info!("Configuration loaded: {:?}", config);

    // Model and scaler are the only fatal dependencies.
    let model = OnnxModel::load(&config.model.model_path, config.model.optimize_graph)
        .context("loading inference model")?;
    let artifact = ScalerArtifact::from_file(&config.model.scaler_path).context("loading scaler")?;
    if let Some(trained) = artifact.lookback_period {
        if trained != config.window.lookback {
            warn!(
                "Scaler was saved with lookback {}, configured lookback is {}",
                trained, config.window.lookback
            );
        }
    }
    let bar_duration = config.bar_duration()?;
    let forecaster = Forecaster::new(
        FeaturePipeline::new(config.window.lookback),
        Arc::new(model),
        Arc::new(artifact.scaler),
        bar_duration,
    )?;

    let candles = Arc::new(CandleStore::for_lookback(
        config.window.lookback,
        config.window.margin,
    ));
    let results = Arc::new(ResultStore::new(config.results.history));

    if let Some(path) = &config.warm_start.csv_path {
        if let Err(e) = warm_start::load_csv(
            &candles,
            path,
            config.window.lookback,
            config.warm_start.rows,
        ) {
            warn!("Warm-start failed: {}. Buffer will fill from live ticks.", e);
        }
    }

    let cancel = CancellationToken::new();
    let (tick_tx, tick_rx) = mpsc::channel(config.feed.channel_capacity);

    let mut ingest = spawn_ingest(
        tick_rx,
        TickAggregator::new(bar_duration)?,
        Arc::clone(&candles),
        Arc::clone(&results),
        cancel.clone(),
    );
    let feed = tokio::spawn(read_ticks(args.ticks, tick_tx, cancel.clone()));
    info!("Tick feed started");

    let scheduler = PredictionScheduler::new(
        forecaster,
        Arc::clone(&candles),
        Arc::clone(&results),
        config.poll_interval(),
        config.prediction_period(),
    )?
    .spawn();
    info!("Predictor started");

    let monitor = tokio::spawn(run_monitor(
        Arc::clone(&candles),
        Arc::clone(&results),
        config.monitor.window,
        config.monitor_interval(),
        cancel.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, shutting down"),
        _ = &mut ingest => info!("Ingest finished, shutting down"),
    }

    cancel.cancel();
    let timeout = config.shutdown_timeout();
    if scheduler.shutdown(timeout).await {
        info!("Predictor stopped");
    }
    match time::timeout(timeout, feed).await {
        Ok(Ok(Err(e))) => warn!("Tick feed failed: {:#}", e),
        Err(_) => warn!("feed task did not stop within {:?}", timeout),
        _ => {}
    }
    if time::timeout(timeout, monitor).await.is_err() {
        warn!("monitor task did not stop within {:?}", timeout);
    }
    // The select above may already have polled the ingest handle to completion.
    if !ingest.is_finished() && time::timeout(timeout, ingest).await.is_err() {
        warn!("ingest task did not stop within {:?}", timeout);
    }

    info!("System shutdown complete");
    Ok(())
}

async fn read_ticks(
    source: Option<PathBuf>,
    ticks: mpsc::Sender<RawTick>,
    cancel: CancellationToken,
) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &source {
        Some(path) => Box::new(BufReader::new(
            File::open(path)
                .await
                .with_context(|| format!("opening tick file {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match RawTick::from_json(&line) {
            Ok(tick) => {
                if ticks.send(tick).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Tick parse error: {}", e),
        }
    }
    Ok(())
}

async fn run_monitor(
    candles: Arc<CandleStore>,
    results: Arc<ResultStore>,
    window: usize,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(every);
    let mut shown: Option<LiveMetrics> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let metrics = LiveMetrics::read(&candles, &results, window);
        if metrics != shown {
            if let Some(m) = &metrics {
                info!("{}", m);
            }
            shown = metrics;
        }
    }
}
