//! Runtime configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Rolling window and bar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Number of log-return rows fed to the model
    pub lookback: usize,
    /// Spare candle slots kept beyond the lookback
    pub margin: usize,
    /// Bar duration in seconds
    pub bar_duration_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lookback: 60,
            margin: 5,
            bar_duration_secs: 60,
        }
    }
}

/// Prediction scheduler timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Period between prediction cycles in seconds
    pub prediction_period_secs: u64,
    /// Poll interval while waiting for enough candles
    pub poll_interval_ms: u64,
    /// Bounded wait for the scheduler to stop
    pub shutdown_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            prediction_period_secs: 60,
            poll_interval_ms: 1_000,
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Maximum number of predictions kept for display
    pub history: usize,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self { history: 300 }
    }
}

/// Locations of the externally trained artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    /// Enable full ONNX graph optimization
    pub optimize_graph: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/model.onnx"),
            scaler_path: PathBuf::from("models/scaler.json"),
            optimize_graph: true,
        }
    }
}

/// Historical candles loaded before live ticks arrive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmStartConfig {
    pub csv_path: Option<PathBuf>,
    /// Rows to load; raised to `lookback + 1` when smaller
    pub rows: Option<usize>,
}

/// Periodic live-metrics reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Number of candles read per refresh
    pub window: usize,
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: 100,
            interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Capacity of the tick channel between feed and aggregator
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
        }
    }
}

/// Complete forecaster configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub schedule: ScheduleConfig,
    pub results: ResultsConfig,
    pub model: ModelConfig,
    pub warm_start: WarmStartConfig,
    pub monitor: MonitorConfig,
    pub feed: FeedConfig,
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.lookback == 0 {
            return Err(Error::Config("window.lookback must be at least 1".into()));
        }
        if self.window.bar_duration_secs == 0 {
            return Err(Error::Config("window.bar_duration_secs must be positive".into()));
        }
        if self.schedule.prediction_period_secs == 0 || self.schedule.poll_interval_ms == 0 {
            return Err(Error::Config("schedule periods must be positive".into()));
        }
        if self.results.history == 0 {
            return Err(Error::Config("results.history must be at least 1".into()));
        }
        if self.feed.channel_capacity == 0 {
            return Err(Error::Config("feed.channel_capacity must be at least 1".into()));
        }
        if self.monitor.interval_ms == 0 {
            return Err(Error::Config("monitor.interval_ms must be positive".into()));
        }
        self.bar_duration()?;
        Ok(())
    }

    /// Bar length, rejecting values `TimeDelta` cannot represent.
    pub fn bar_duration(&self) -> Result<TimeDelta> {
        let secs = self.window.bar_duration_secs;
        i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| Error::Config(format!("window.bar_duration_secs {secs} is out of range")))
    }

    /// Candles consumed by one forecast.
    pub fn required_candles(&self) -> usize {
        self.window.lookback + 1
    }

    pub fn prediction_period(&self) -> Duration {
        Duration::from_secs(self.schedule.prediction_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.schedule.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.schedule.shutdown_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.window.lookback, 60);
        assert_eq!(config.window.margin, 5);
        assert_eq!(config.results.history, 300);
        assert_eq!(config.required_candles(), 61);
        assert_eq!(config.bar_duration().unwrap(), TimeDelta::minutes(1));
        assert_eq!(config.prediction_period(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [window]
            lookback = 30

            [warm_start]
            csv_path = "data/one_minute.csv"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.lookback, 30);
        assert_eq!(config.window.bar_duration_secs, 60);
        assert_eq!(config.schedule.prediction_period_secs, 60);
        assert_eq!(
            config.warm_start.csv_path.as_deref(),
            Some(Path::new("data/one_minute.csv"))
        );
        assert!(config.warm_start.rows.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_lookback() {
        let mut config = Config::default();
        config.window.lookback = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_bar() {
        let mut config = Config::default();
        config.window.bar_duration_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_monitor_interval() {
        let mut config = Config::default();
        config.monitor.interval_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_out_of_range_bar_is_config_error() {
        let mut config = Config::default();
        config.window.bar_duration_secs = u64::MAX;
        assert!(matches!(config.bar_duration(), Err(Error::Config(_))));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        // Fits in i64 but not in a TimeDelta.
        config.window.bar_duration_secs = i64::MAX as u64;
        assert!(matches!(config.bar_duration(), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.toml");
        let mut config = Config::default();
        config.results.history = 10;
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.results.history, 10);
        assert_eq!(loaded.window.lookback, 60);
    }
}
