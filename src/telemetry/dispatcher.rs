//! Routine and event report dispatch.

use super::{MetricsSink, TelemetryReport};
use crate::audit::SharedMonitorStats;

/// Sends reports to the collector without ever failing the caller.
pub struct TelemetryDispatcher {
    sink: Box<dyn MetricsSink>,
    stats: SharedMonitorStats,
}

impl TelemetryDispatcher {
    pub fn new(sink: Box<dyn MetricsSink>, stats: SharedMonitorStats) -> Self {
        Self { sink, stats }
    }

    /// Send a time-driven report. Returns whether the sink accepted it.
    pub fn send_routine(&self, report: &TelemetryReport) -> bool {
        let delivered = self.deliver("routine", report);
        self.stats.record_routine(delivered);
        delivered
    }

    /// Send an event-driven report. Returns whether the sink accepted it.
    pub fn send_event(&self, report: &TelemetryReport) -> bool {
        let delivered = self.deliver("event", report);
        self.stats.record_event_report(delivered);
        delivered
    }

    fn deliver(&self, kind: &'static str, report: &TelemetryReport) -> bool {
        match self.sink.submit(report) {
            Ok(()) => {
                tracing::info!(
                    kind,
                    hr = report.hr,
                    spo2 = report.spo2,
                    ecg = report.ecg,
                    "telemetry sent"
                );
                true
            }
            Err(e) => {
                tracing::warn!(kind, at = %report.timestamp, "telemetry delivery failed: {e}");
                false
            }
        }
    }

    /// Flush pending reports before shutdown.
    pub fn close(&mut self) {
        self.sink.close();
    }
}
