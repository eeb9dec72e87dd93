//! Configuration for the heart monitor agent.
//!
//! Settings come from a JSON file, then environment variables, then command
//! line flags, each layer overriding the previous one. The result is
//! validated once and passed by reference into every component.

use crate::core::{FeatureLayout, Thresholds};
use crate::source::DeviceConfig;
use crate::telemetry::CollectorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sensor device settings
    pub device: DeviceConfig,

    /// Model file (`.eim`) to run
    pub model_path: Option<PathBuf>,

    /// Upper bound on a single classifier call, in seconds
    pub classifier_timeout_secs: Option<f64>,

    /// Sensor sampling frequency; must match the model's training data
    pub sample_rate_hz: u32,

    /// Length of the sliding window
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Minimum time between inference cycles
    #[serde(with = "duration_serde")]
    pub step: Duration,

    /// Time between routine telemetry reports
    #[serde(with = "duration_serde")]
    pub routine_interval: Duration,

    /// Event thresholds
    pub thresholds: Thresholds,

    /// How channels are combined into the feature vector
    pub feature_layout: FeatureLayout,

    /// Telemetry collector
    pub collector: CollectorConfig,

    /// CSV audit log
    pub audit_log_path: PathBuf,

    /// Path for storing run statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heartmonitor-agent");

        Self {
            device: DeviceConfig::default(),
            model_path: None,
            classifier_timeout_secs: None,
            sample_rate_hz: 50,
            window: Duration::from_secs(10),
            step: Duration::from_secs(2),
            routine_interval: Duration::from_secs(15),
            thresholds: Thresholds::default(),
            feature_layout: FeatureLayout::default(),
            collector: CollectorConfig::default(),
            audit_log_path: data_dir.join("heartmonitor_log.csv"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heartmonitor-agent")
            .join("config.json")
    }

    /// Path of the persisted run statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        if let Some(parent) = self.audit_log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HR_SERIAL") {
            self.device.path = v;
        }
        if let Some(v) = lookup("HR_BAUD") {
            self.device.baud = parse_var("HR_BAUD", &v)?;
        }
        if let Some(v) = lookup("HR_FREQ") {
            self.sample_rate_hz = parse_var("HR_FREQ", &v)?;
        }
        if let Some(v) = lookup("HR_WIN") {
            self.window = parse_secs("HR_WIN", &v)?;
        }
        if let Some(v) = lookup("HR_STEP") {
            self.step = parse_secs("HR_STEP", &v)?;
        }
        if let Some(v) = lookup("HR_ROUTINE_INTERVAL") {
            self.routine_interval = parse_secs("HR_ROUTINE_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("HR_CLASS") {
            self.thresholds.target_class = v;
        }
        if let Some(v) = lookup("HR_THRESH") {
            self.thresholds.sudden = parse_var("HR_THRESH", &v)?;
        }
        if let Some(v) = lookup("HR_ANOM") {
            self.thresholds.anomaly = parse_var("HR_ANOM", &v)?;
        }
        if let Some(v) = lookup("HR_MODEL") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("HR_LOG") {
            self.audit_log_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("THINGSPEAK_WRITE_KEY") {
            self.collector.write_key = Some(v);
        }
        Ok(())
    }

    /// Number of samples held by each channel window.
    pub fn window_len(&self) -> usize {
        (self.window.as_secs_f64() * self.sample_rate_hz as f64) as usize
    }

    /// Classifier call timeout, if configured.
    pub fn classifier_timeout(&self) -> Option<Duration> {
        self.classifier_timeout_secs
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Check settings that do not depend on the model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::Invalid(
                "sample rate must be greater than zero".to_string(),
            ));
        }
        if self.window_len() == 0 {
            return Err(ConfigError::Invalid(format!(
                "window of {:?} at {} Hz holds no samples",
                self.window, self.sample_rate_hz
            )));
        }
        if self.step.is_zero() {
            return Err(ConfigError::Invalid("step must be greater than zero".to_string()));
        }
        if self.routine_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "routine interval must be greater than zero".to_string(),
            ));
        }
        if self.thresholds.target_class.trim().is_empty() {
            return Err(ConfigError::Invalid("target class name is empty".to_string()));
        }
        for (name, value) in [
            ("sudden", self.thresholds.sudden),
            ("anomaly", self.thresholds.anomaly),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} threshold {value} is outside [0, 1]"
                )));
            }
        }
        if self.collector.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "telemetry queue capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var,
        value: value.to_string(),
    })
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_var(var, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Env {
        var,
        value: value.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as fractional seconds.
pub mod duration_serde {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
