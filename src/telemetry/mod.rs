//! Telemetry delivery to the remote collector.
//!
//! Delivery is best-effort: a failed report is logged and counted, never
//! retried, and never stops ingestion. The audit log keeps the record of
//! every inference cycle regardless.

pub mod dispatcher;
pub mod queue;
pub mod report;

#[cfg(feature = "collector")]
pub mod client;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use dispatcher::TelemetryDispatcher;
pub use queue::QueuedSink;
pub use report::TelemetryReport;

#[cfg(feature = "collector")]
pub use client::{BlockingCollectorClient, CollectorClient};

/// Default collector endpoint (ThingSpeak channel update).
pub const DEFAULT_COLLECTOR_URL: &str = "https://api.thingspeak.com/update";

/// Collector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Update endpoint
    pub url: String,
    /// Channel write key; telemetry is disabled without one
    pub write_key: Option<String>,
    /// Per-request timeout
    #[serde(with = "crate::config::duration_serde")]
    pub timeout: Duration,
    /// Hand reports to a background worker through a queue of this size
    pub queue_capacity: Option<usize>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_COLLECTOR_URL.to_string(),
            write_key: None,
            timeout: Duration::from_secs(6),
            queue_capacity: None,
        }
    }
}

/// Telemetry delivery failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Transport-level failure (DNS, connect, timeout)
    #[error("collector network error: {0}")]
    Network(String),
    /// Non-200 response
    #[error("collector server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// 200 response whose body signals the update was not accepted
    #[error("collector rejected the update")]
    Rejected,
    /// Client could not be set up
    #[error("collector client error: {0}")]
    Client(String),
}

/// Capability to submit one report to the collector.
pub trait MetricsSink: Send {
    fn submit(&self, report: &TelemetryReport) -> Result<(), TelemetryError>;

    /// Finish pending work before shutdown.
    fn close(&mut self) {}
}

impl<S: MetricsSink + Sync + ?Sized> MetricsSink for Arc<S> {
    fn submit(&self, report: &TelemetryReport) -> Result<(), TelemetryError> {
        (**self).submit(report)
    }
}

/// Sink used when no collector is configured. Reports are discarded.
#[derive(Debug, Default)]
pub struct DisabledSink;

impl MetricsSink for DisabledSink {
    fn submit(&self, report: &TelemetryReport) -> Result<(), TelemetryError> {
        tracing::debug!(hr = report.hr, spo2 = report.spo2, "telemetry disabled, report dropped");
        Ok(())
    }
}

/// Build the sink described by `config`.
pub fn create_sink(config: &CollectorConfig) -> Result<Box<dyn MetricsSink>, TelemetryError> {
    let Some(write_key) = config.write_key.clone().filter(|k| !k.trim().is_empty()) else {
        tracing::warn!("no collector write key configured, telemetry disabled");
        return Ok(Box::new(DisabledSink));
    };

    let sink = open_collector(config, write_key)?;

    match config.queue_capacity {
        Some(capacity) => Ok(Box::new(QueuedSink::spawn(sink, capacity))),
        None => Ok(sink),
    }
}

#[cfg(feature = "collector")]
fn open_collector(
    config: &CollectorConfig,
    write_key: String,
) -> Result<Box<dyn MetricsSink>, TelemetryError> {
    let client = BlockingCollectorClient::new(&config.url, write_key, config.timeout)?;
    Ok(Box::new(client))
}

#[cfg(not(feature = "collector"))]
fn open_collector(
    _config: &CollectorConfig,
    _write_key: String,
) -> Result<Box<dyn MetricsSink>, TelemetryError> {
    Err(TelemetryError::Client(
        "collector feature not enabled at compile time".to_string(),
    ))
}
