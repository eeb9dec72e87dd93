//! The ingestion loop.
//!
//! [`Monitor`] owns the channel windows and the scheduler and drives the
//! collaborators: one line in, at most one routine report and one inference
//! cycle out. Apart from a failed classifier start-up, no failure inside the
//! loop stops it.

use crate::audit::{AuditRecord, AuditSink, SharedMonitorStats, StatsSnapshot};
use crate::classifier::Classifier;
use crate::config::Config;
use crate::core::{
    build_feature_vector, classify_result, ChannelWindows, Clock, EventDecision, FeatureError,
    FeatureLayout, InferenceScheduler, ScheduledAction, Thresholds,
};
use crate::source::{parse_line, Sample, SampleError, SampleSource, SourceEvent};
use crate::telemetry::{MetricsSink, TelemetryDispatcher, TelemetryReport};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Errors constructing a monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("model input does not fit the configured window: {0}")]
    Layout(#[from] FeatureError),
}

/// Result of feeding one raw line.
#[derive(Debug)]
pub enum LineOutcome {
    /// The line was discarded; windows are unchanged
    Malformed(SampleError),
    Accepted(StepOutcome),
}

/// What one accepted sample triggered.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Delivery result of the routine report, if one was due
    pub routine_delivered: Option<bool>,
    /// The inference cycle, if one was due
    pub cycle: Option<CycleOutcome>,
}

/// Result of one inference cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// No report or audit record was produced
    Skipped(String),
}

/// A completed inference cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub decision: EventDecision,
    pub report: TelemetryReport,
    /// Delivery result of the event report; `None` when no event fired
    pub event_delivered: Option<bool>,
    /// Whether the audit record was written
    pub audited: bool,
}

/// Why [`Monitor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was cleared
    Stopped,
    /// The sensor stream ended
    SourceClosed,
    /// Reading from the sensor failed
    SourceFailed,
}

/// Streaming windowed-inference monitor.
pub struct Monitor {
    windows: ChannelWindows,
    scheduler: InferenceScheduler,
    layout: FeatureLayout,
    thresholds: Thresholds,
    classifier: Box<dyn Classifier>,
    dispatcher: TelemetryDispatcher,
    audit: Option<Box<dyn AuditSink>>,
    stats: SharedMonitorStats,
}

impl Monitor {
    /// Create a monitor for a started classifier.
    ///
    /// Fails when the classifier's input length cannot be filled from the
    /// configured window.
    pub fn new(
        config: &Config,
        classifier: Box<dyn Classifier>,
        sink: Box<dyn MetricsSink>,
        audit: Option<Box<dyn AuditSink>>,
        stats: SharedMonitorStats,
    ) -> Result<Self, MonitorError> {
        let window_len = config.window_len();
        config
            .feature_layout
            .check(classifier.input_len(), window_len)?;

        tracing::info!(
            window_len,
            input_len = classifier.input_len(),
            layout = ?config.feature_layout,
            "monitor ready"
        );

        Ok(Self {
            windows: ChannelWindows::new(window_len),
            scheduler: InferenceScheduler::new(config.routine_interval, config.step),
            layout: config.feature_layout,
            thresholds: config.thresholds.clone(),
            classifier,
            dispatcher: TelemetryDispatcher::new(sink, stats.clone()),
            audit,
            stats,
        })
    }

    /// Parse and ingest one raw line read at `now`.
    pub fn ingest_line(&mut self, line: &str, now: DateTime<Utc>) -> LineOutcome {
        self.stats.record_line();
        match parse_line(line, now) {
            Ok(sample) => LineOutcome::Accepted(self.ingest_sample(sample)),
            Err(e) => {
                self.stats.record_malformed();
                tracing::debug!(line = line.trim_end(), "discarded sensor line: {e}");
                LineOutcome::Malformed(e)
            }
        }
    }

    /// Append a sample and run whatever the scheduler says is due.
    pub fn ingest_sample(&mut self, sample: Sample) -> StepOutcome {
        self.windows.append(&sample);
        self.stats.record_sample();

        let now = sample.received_at;
        let tick = self.scheduler.poll(now, self.windows.is_full());

        let mut outcome = StepOutcome::default();
        for action in tick.actions() {
            match action {
                ScheduledAction::RoutineReport => {
                    let report = TelemetryReport::routine(&sample, now);
                    outcome.routine_delivered = Some(self.dispatcher.send_routine(&report));
                }
                ScheduledAction::Inference => {
                    outcome.cycle = Some(self.run_cycle(&sample, now));
                }
            }
        }
        outcome
    }

    fn run_cycle(&mut self, sample: &Sample, now: DateTime<Utc>) -> CycleOutcome {
        let features =
            match build_feature_vector(&self.windows, self.layout, self.classifier.input_len()) {
                Ok(features) => features,
                Err(e) => {
                    tracing::warn!(at = %now, "inference cycle skipped: {e}");
                    return CycleOutcome::Skipped(e.to_string());
                }
            };

        let result = match self.classifier.classify(&features) {
            Ok(result) => result,
            Err(e) => {
                self.stats.record_classifier_failure();
                tracing::warn!(at = %now, "inference cycle skipped: {e}");
                return CycleOutcome::Skipped(e.to_string());
            }
        };
        self.stats.record_inference();

        let decision = classify_result(&result, &self.thresholds);
        let report = TelemetryReport::inference(sample, &decision, result.anomaly_score, now);

        tracing::debug!(
            label = %decision.label,
            p_target = ?decision.p_target,
            p_normal = ?decision.p_normal,
            anomaly = ?result.anomaly_score,
            "inference cycle"
        );

        let event_delivered = if decision.is_event {
            self.stats.record_event();
            tracing::info!(
                "[EVENT] {} HR={:.1} SpO2={:.1} ECG={:.1} -> {} prob_{}={} prob_normal={} ({})",
                now.format("%F %T"),
                sample.hr,
                sample.spo2,
                sample.ecg,
                decision.label,
                self.thresholds.target_class,
                format_probability(decision.p_target),
                format_probability(decision.p_normal),
                decision.reason
            );
            Some(self.dispatcher.send_event(&report))
        } else {
            None
        };

        let audited = self.audit_cycle(&report, now);

        CycleOutcome::Completed(CycleReport {
            decision,
            report,
            event_delivered,
            audited,
        })
    }

    fn audit_cycle(&mut self, report: &TelemetryReport, now: DateTime<Utc>) -> bool {
        let Some(audit) = self.audit.as_mut() else {
            return false;
        };

        match audit.append(&AuditRecord::from_report(report, now)) {
            Ok(()) => {
                self.stats.record_audit(true);
                true
            }
            Err(e) => {
                self.stats.record_audit(false);
                tracing::error!(at = %now, "audit write failed: {e}");
                false
            }
        }
    }

    /// Read lines from `source` until it ends or `running` is cleared.
    ///
    /// The stop flag is checked between lines, so the line in progress is
    /// always fully processed.
    pub fn run<S, C>(&mut self, source: &mut S, clock: &C, running: &AtomicBool) -> StopReason
    where
        S: SampleSource + ?Sized,
        C: Clock + ?Sized,
    {
        tracing::info!("streaming started");
        while running.load(Ordering::SeqCst) {
            match source.read_line() {
                Ok(SourceEvent::Line(line)) => {
                    let now = clock.now();
                    self.ingest_line(&line, now);
                }
                Ok(SourceEvent::Idle) => continue,
                Ok(SourceEvent::Closed) => {
                    tracing::info!("sensor stream closed");
                    return StopReason::SourceClosed;
                }
                Err(e) => {
                    tracing::error!("sensor read failed: {e}");
                    return StopReason::SourceFailed;
                }
            }
        }
        tracing::info!("stop requested");
        StopReason::Stopped
    }

    /// Flush the audit log, drain telemetry, release the classifier and
    /// persist statistics.
    pub fn shutdown(mut self) -> StatsSnapshot {
        self.dispatcher.close();

        if let Some(audit) = self.audit.as_mut() {
            if let Err(e) = audit.flush() {
                tracing::error!("audit log flush failed: {e}");
            }
        }

        self.classifier.stop();

        if let Err(e) = self.stats.save() {
            tracing::warn!("could not save stats: {e}");
        }

        self.stats.stats()
    }

    /// The channel windows.
    pub fn windows(&self) -> &ChannelWindows {
        &self.windows
    }

    /// Shared run statistics.
    pub fn stats(&self) -> &SharedMonitorStats {
        &self.stats
    }
}

fn format_probability(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "-".to_string())
}
