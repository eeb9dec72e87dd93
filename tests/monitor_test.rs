//! Integration tests for the ingestion loop

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use heartmonitor_agent::audit::{
    create_shared_stats, create_shared_stats_with_persistence, AuditError, AuditLog, AuditRecord,
    AuditSink, HEADER,
};
use heartmonitor_agent::classifier::{ClassificationResult, Classifier, ClassifierError};
use heartmonitor_agent::core::{Channel, Clock, FeatureLayout, Label};
use heartmonitor_agent::source::{ReaderSource, Sample};
use heartmonitor_agent::telemetry::{MetricsSink, TelemetryError, TelemetryReport};
use heartmonitor_agent::{Config, CycleOutcome, LineOutcome, Monitor, MonitorError, StopReason};
use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ClassifierLog {
    inputs: Vec<Vec<f32>>,
    stopped: bool,
}

/// Replays scripted results; repeats `fallback` once the script runs out.
struct ScriptedClassifier {
    input_len: usize,
    script: VecDeque<Result<ClassificationResult, ClassifierError>>,
    fallback: ClassificationResult,
    log: Arc<Mutex<ClassifierLog>>,
}

impl ScriptedClassifier {
    fn new(input_len: usize, fallback: ClassificationResult) -> (Self, Arc<Mutex<ClassifierLog>>) {
        let log = Arc::new(Mutex::new(ClassifierLog::default()));
        let classifier = Self {
            input_len,
            script: VecDeque::new(),
            fallback,
            log: Arc::clone(&log),
        };
        (classifier, log)
    }

    fn then(mut self, result: Result<ClassificationResult, ClassifierError>) -> Self {
        self.script.push_back(result);
        self
    }
}

impl Classifier for ScriptedClassifier {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn classify(&mut self, features: &[f32]) -> Result<ClassificationResult, ClassifierError> {
        self.log.lock().unwrap().inputs.push(features.to_vec());
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stopped = true;
    }
}

#[derive(Default)]
struct RecordingSink {
    reports: Mutex<Vec<TelemetryReport>>,
    failing: AtomicBool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            ..Default::default()
        }
    }

    fn reports(&self) -> Vec<TelemetryReport> {
        self.reports.lock().unwrap().clone()
    }

    fn routine_count(&self) -> usize {
        self.reports()
            .iter()
            .filter(|r| r.prob_target_class.is_none() && r.anomaly_score.is_none())
            .count()
    }
}

impl MetricsSink for RecordingSink {
    fn submit(&self, report: &TelemetryReport) -> Result<(), TelemetryError> {
        self.reports.lock().unwrap().push(report.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(TelemetryError::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct MemoryAudit {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    failing: bool,
}

impl AuditSink for MemoryAudit {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.failing {
            return Err(AuditError::Write(std::io::Error::other("disk full")));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Advances one second per call.
struct SteppingClock {
    next: Cell<DateTime<Utc>>,
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let now = self.next.get();
        self.next.set(now + ChronoDuration::seconds(1));
        now
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    base() + ChronoDuration::seconds(secs)
}

/// One sample per second, three-sample window, inference every 2 s.
fn test_config() -> Config {
    Config {
        sample_rate_hz: 1,
        window: Duration::from_secs(3),
        step: Duration::from_secs(2),
        routine_interval: Duration::from_secs(15),
        ..Config::default()
    }
}

fn probabilities(target: f64, normal: f64, anomaly: Option<f64>) -> ClassificationResult {
    let mut class_probabilities = BTreeMap::new();
    class_probabilities.insert("sudden_change".to_string(), target);
    class_probabilities.insert("normal".to_string(), normal);
    ClassificationResult {
        class_probabilities,
        anomaly_score: anomaly,
    }
}

fn quiet() -> ClassificationResult {
    probabilities(0.1, 0.9, Some(0.1))
}

fn line(i: i64) -> String {
    format!("{},{},{}", 60 + i, 97, i as f64 / 10.0)
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[test]
fn test_malformed_lines_leave_windows_unchanged() {
    let (classifier, log) = ScriptedClassifier::new(3, quiet());
    let sink = Arc::new(RecordingSink::default());
    let stats = create_shared_stats();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        None,
        stats.clone(),
    )
    .unwrap();

    for bad in ["72,98", "72,98,0.1,4", "72,abc,0.1", "", "NaN,98,0.1"] {
        assert!(matches!(
            monitor.ingest_line(bad, at(0)),
            LineOutcome::Malformed(_)
        ));
    }

    assert!(monitor.windows().is_empty());
    assert!(sink.reports().is_empty());
    assert!(log.lock().unwrap().inputs.is_empty());

    let snapshot = stats.stats();
    assert_eq!(snapshot.lines_read, 5);
    assert_eq!(snapshot.malformed_lines, 5);
    assert_eq!(snapshot.samples_accepted, 0);
}

#[test]
fn test_windows_keep_most_recent_samples() {
    let (classifier, _) = ScriptedClassifier::new(3, quiet());
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        create_shared_stats(),
    )
    .unwrap();

    monitor.ingest_line(&line(0), at(0));
    monitor.ingest_line(&line(1), at(1));
    assert_eq!(monitor.windows().len(), 2);
    assert!(!monitor.windows().is_full());

    for i in 2..7 {
        monitor.ingest_line(&line(i), at(i));
    }
    assert_eq!(monitor.windows().len(), 3);

    let latest = monitor.windows().latest(3).unwrap();
    assert_eq!(latest.channel(Channel::HeartRate), &[64.0, 65.0, 66.0]);
    assert_eq!(latest.channel(Channel::SpO2), &[97.0, 97.0, 97.0]);
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[test]
fn test_inference_waits_for_full_window_then_follows_step() {
    let (classifier, log) = ScriptedClassifier::new(3, quiet());
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        create_shared_stats(),
    )
    .unwrap();

    let mut cycle_times = Vec::new();
    for i in 0..9 {
        if let LineOutcome::Accepted(step) = monitor.ingest_line(&line(i), at(i)) {
            if step.cycle.is_some() {
                cycle_times.push(i);
            }
        }
    }

    assert_eq!(cycle_times, vec![2, 4, 6, 8]);

    let inputs = &log.lock().unwrap().inputs;
    assert_eq!(inputs[0], vec![60.0, 61.0, 62.0]);
    assert_eq!(inputs[3], vec![66.0, 67.0, 68.0]);
}

#[test]
fn test_routine_report_fires_every_interval() {
    let (classifier, _) = ScriptedClassifier::new(3, quiet());
    let sink = Arc::new(RecordingSink::default());
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        None,
        create_shared_stats(),
    )
    .unwrap();

    let mut routine_times = Vec::new();
    for i in 0..61 {
        if let LineOutcome::Accepted(step) = monitor.ingest_line(&line(i), at(i)) {
            if step.routine_delivered.is_some() {
                routine_times.push(i);
            }
        }
    }

    assert_eq!(routine_times, vec![0, 15, 30, 45, 60]);
    assert_eq!(sink.routine_count(), 5);
    for pair in routine_times.windows(2) {
        assert!(pair[1] - pair[0] <= 15);
    }
}

#[test]
fn test_routine_report_precedes_inference_on_same_sample() {
    let config = Config {
        window: Duration::from_secs(1),
        ..test_config()
    };
    let (classifier, _) = ScriptedClassifier::new(1, probabilities(0.9, 0.1, None));
    let sink = Arc::new(RecordingSink::default());
    let mut monitor = Monitor::new(
        &config,
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        None,
        create_shared_stats(),
    )
    .unwrap();

    monitor.ingest_line(&line(0), at(0));

    let reports = sink.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].prob_target_class, None);
    assert_eq!(reports[1].prob_target_class, Some(0.9));
}

#[test]
fn test_backwards_clock_does_not_fire() {
    let (classifier, log) = ScriptedClassifier::new(3, quiet());
    let sink = Arc::new(RecordingSink::default());
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        None,
        create_shared_stats(),
    )
    .unwrap();

    for i in 100..103 {
        monitor.ingest_line(&line(i), at(i));
    }
    assert_eq!(log.lock().unwrap().inputs.len(), 1);

    for i in 0..10 {
        monitor.ingest_line(&line(i), at(i));
    }
    assert_eq!(log.lock().unwrap().inputs.len(), 1);
    assert_eq!(sink.routine_count(), 1);
}

// ---------------------------------------------------------------------------
// Events, telemetry and audit
// ---------------------------------------------------------------------------

fn fill_and_cycle(monitor: &mut Monitor) -> CycleOutcome {
    monitor.ingest_line(&line(0), at(0));
    monitor.ingest_line(&line(1), at(1));
    match monitor.ingest_line(&line(2), at(2)) {
        LineOutcome::Accepted(step) => step.cycle.expect("cycle due on full window"),
        LineOutcome::Malformed(e) => panic!("unexpected malformed line: {e}"),
    }
}

#[test]
fn test_sudden_probability_raises_event() {
    let (classifier, _) = ScriptedClassifier::new(3, probabilities(0.8, 0.2, None));
    let sink = Arc::new(RecordingSink::default());
    let audit = MemoryAudit::default();
    let stats = create_shared_stats();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        Some(Box::new(audit.clone())),
        stats.clone(),
    )
    .unwrap();

    let CycleOutcome::Completed(cycle) = fill_and_cycle(&mut monitor) else {
        panic!("cycle skipped");
    };

    assert_eq!(cycle.decision.label, Label::Target("sudden_change".to_string()));
    assert!(cycle.decision.is_event);
    assert!(cycle.decision.reason.contains("sudden threshold"));
    assert_eq!(cycle.event_delivered, Some(true));
    assert!(cycle.audited);

    let event_report = sink.reports().last().cloned().unwrap();
    assert_eq!(event_report.prob_target_class, Some(0.8));
    assert_eq!(event_report.prob_normal, Some(0.2));
    assert_eq!(event_report.hr, 62.0);

    let records = audit.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cycle_at, at(2));
    assert_eq!(records[0].prob_target_class, Some(0.8));

    assert_eq!(stats.stats().events_detected, 1);
    assert_eq!(stats.stats().event_sent, 1);
}

#[test]
fn test_anomaly_raises_event_with_normal_label() {
    let (classifier, _) = ScriptedClassifier::new(3, probabilities(0.3, 0.7, Some(0.6)));
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        create_shared_stats(),
    )
    .unwrap();

    let CycleOutcome::Completed(cycle) = fill_and_cycle(&mut monitor) else {
        panic!("cycle skipped");
    };

    assert_eq!(cycle.decision.label, Label::Normal);
    assert!(cycle.decision.is_event);
    assert!(cycle.decision.reason.contains("anomaly"));
    assert_eq!(cycle.report.anomaly_score, Some(0.6));
}

#[test]
fn test_quiet_cycle_is_audited_but_not_reported() {
    let (classifier, _) = ScriptedClassifier::new(3, quiet());
    let sink = Arc::new(RecordingSink::default());
    let audit = MemoryAudit::default();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        Some(Box::new(audit.clone())),
        create_shared_stats(),
    )
    .unwrap();

    let CycleOutcome::Completed(cycle) = fill_and_cycle(&mut monitor) else {
        panic!("cycle skipped");
    };

    assert!(!cycle.decision.is_event);
    assert_eq!(cycle.event_delivered, None);
    assert!(cycle.audited);
    assert_eq!(sink.reports().len(), 1, "only the routine report");
    assert_eq!(audit.records.lock().unwrap().len(), 1);
}

#[test]
fn test_empty_probabilities_give_unknown_without_event() {
    let (classifier, _) = ScriptedClassifier::new(
        3,
        ClassificationResult {
            class_probabilities: BTreeMap::new(),
            anomaly_score: Some(0.9),
        },
    );
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        create_shared_stats(),
    )
    .unwrap();

    let CycleOutcome::Completed(cycle) = fill_and_cycle(&mut monitor) else {
        panic!("cycle skipped");
    };

    assert_eq!(cycle.decision.label, Label::Unknown);
    assert!(!cycle.decision.is_event);
    assert_eq!(cycle.report.prob_target_class, None);
}

#[test]
fn test_telemetry_failure_does_not_block_audit() {
    let (classifier, _) = ScriptedClassifier::new(3, probabilities(0.95, 0.05, None));
    let sink = Arc::new(RecordingSink::failing());
    let audit = MemoryAudit::default();
    let stats = create_shared_stats();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        Some(Box::new(audit.clone())),
        stats.clone(),
    )
    .unwrap();

    let CycleOutcome::Completed(cycle) = fill_and_cycle(&mut monitor) else {
        panic!("cycle skipped");
    };

    assert_eq!(cycle.event_delivered, Some(false));
    assert!(cycle.audited);
    assert_eq!(audit.records.lock().unwrap().len(), 1);

    // Ingestion carries on
    for i in 3..6 {
        assert!(matches!(
            monitor.ingest_line(&line(i), at(i)),
            LineOutcome::Accepted(_)
        ));
    }

    let snapshot = stats.stats();
    assert_eq!(snapshot.routine_failed, 1);
    assert!(snapshot.event_failed >= 1);
    assert_eq!(snapshot.samples_accepted, 6);
}

#[test]
fn test_classifier_failure_skips_cycle() {
    let (classifier, _) = ScriptedClassifier::new(3, quiet());
    let classifier = classifier.then(Err(ClassifierError::Timeout(Duration::from_secs(1))));
    let sink = Arc::new(RecordingSink::default());
    let audit = MemoryAudit::default();
    let stats = create_shared_stats();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        Some(Box::new(audit.clone())),
        stats.clone(),
    )
    .unwrap();

    assert!(matches!(
        fill_and_cycle(&mut monitor),
        CycleOutcome::Skipped(_)
    ));
    assert!(audit.records.lock().unwrap().is_empty());
    assert_eq!(sink.reports().len(), 1, "only the routine report");
    assert_eq!(stats.stats().classifier_failures, 1);

    // The next due cycle runs normally
    monitor.ingest_line(&line(3), at(3));
    let LineOutcome::Accepted(step) = monitor.ingest_line(&line(4), at(4)) else {
        panic!("line rejected");
    };
    assert!(matches!(step.cycle, Some(CycleOutcome::Completed(_))));
    assert_eq!(audit.records.lock().unwrap().len(), 1);
}

#[test]
fn test_audit_failure_is_counted_and_ingestion_continues() {
    let (classifier, _) = ScriptedClassifier::new(3, quiet());
    let audit = MemoryAudit {
        failing: true,
        ..Default::default()
    };
    let stats = create_shared_stats();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        Some(Box::new(audit)),
        stats.clone(),
    )
    .unwrap();

    let CycleOutcome::Completed(cycle) = fill_and_cycle(&mut monitor) else {
        panic!("cycle skipped");
    };
    assert!(!cycle.audited);
    assert_eq!(stats.stats().audit_failures, 1);
}

#[test]
fn test_identical_results_give_identical_decisions() {
    let result = probabilities(0.75, 0.25, Some(0.2));
    let (classifier, _) = ScriptedClassifier::new(3, result);
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        create_shared_stats(),
    )
    .unwrap();

    let mut decisions = Vec::new();
    for i in 0..7 {
        if let LineOutcome::Accepted(step) = monitor.ingest_line("70,98,0.1", at(i)) {
            if let Some(CycleOutcome::Completed(cycle)) = step.cycle {
                decisions.push(cycle.decision);
            }
        }
    }

    assert_eq!(decisions.len(), 3);
    assert!(decisions.windows(2).all(|d| d[0] == d[1]));
}

// ---------------------------------------------------------------------------
// Construction, run loop and shutdown
// ---------------------------------------------------------------------------

#[test]
fn test_model_larger_than_window_is_rejected() {
    let (classifier, _) = ScriptedClassifier::new(4, quiet());
    let result = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        create_shared_stats(),
    );
    assert!(matches!(result, Err(MonitorError::Layout(_))));
}

#[test]
fn test_multi_channel_layout_needs_divisible_input() {
    let config = Config {
        feature_layout: FeatureLayout::Interleaved,
        ..test_config()
    };
    let (classifier, _) = ScriptedClassifier::new(8, quiet());
    let result = Monitor::new(
        &config,
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        create_shared_stats(),
    );
    assert!(result.is_err());
}

#[test]
fn test_run_until_source_closes() {
    let (classifier, log) = ScriptedClassifier::new(3, quiet());
    let stats = create_shared_stats();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        stats.clone(),
    )
    .unwrap();

    let input = "70,98,0.1\ngarbage\n71,98,0.2\n72,97,0.3\n73,97,0.4\n74,97,0.5\n";
    let mut source = ReaderSource::new(Cursor::new(input.as_bytes().to_vec()));
    let clock = SteppingClock {
        next: Cell::new(base()),
    };
    let running = AtomicBool::new(true);

    let reason = monitor.run(&mut source, &clock, &running);

    assert_eq!(reason, StopReason::SourceClosed);
    let snapshot = stats.stats();
    assert_eq!(snapshot.lines_read, 6);
    assert_eq!(snapshot.malformed_lines, 1);
    assert_eq!(snapshot.samples_accepted, 5);
    // Full at the 3rd sample (t=3), then again two seconds later (t=5)
    assert_eq!(log.lock().unwrap().inputs.len(), 2);
}

#[test]
fn test_run_returns_when_stopped() {
    let (classifier, _) = ScriptedClassifier::new(3, quiet());
    let stats = create_shared_stats();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        stats.clone(),
    )
    .unwrap();

    let mut source = ReaderSource::new(Cursor::new(b"70,98,0.1\n".to_vec()));
    let running = AtomicBool::new(false);

    let reason = monitor.run(
        &mut source,
        &SteppingClock {
            next: Cell::new(base()),
        },
        &running,
    );

    assert_eq!(reason, StopReason::Stopped);
    assert_eq!(stats.stats().lines_read, 0);
}

#[test]
fn test_shutdown_stops_classifier_and_persists_stats() {
    let dir = tempfile::tempdir().unwrap();
    let stats_path = dir.path().join("stats.json");
    let (classifier, log) = ScriptedClassifier::new(3, quiet());
    let stats = create_shared_stats_with_persistence(stats_path.clone());
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        None,
        stats,
    )
    .unwrap();

    for i in 0..4 {
        monitor.ingest_line(&line(i), at(i));
    }
    let snapshot = monitor.shutdown();

    assert!(log.lock().unwrap().stopped);
    assert_eq!(snapshot.samples_accepted, 4);

    let persisted: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&stats_path).unwrap()).unwrap();
    assert_eq!(persisted["samples_accepted"], 4);
    assert_eq!(persisted["inference_cycles"], 1);
}

#[test]
fn test_cycles_are_written_to_csv_audit_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("heartmonitor_log.csv");
    let (classifier, _) = ScriptedClassifier::new(3, probabilities(0.8, 0.2, Some(0.25)));
    let audit = AuditLog::open(&path).unwrap();
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::new(RecordingSink::default())),
        Some(Box::new(audit)),
        create_shared_stats(),
    )
    .unwrap();

    for i in 0..5 {
        monitor.ingest_line(&line(i), at(i));
    }
    monitor.shutdown();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[1],
        format!("{},62.00,97.00,0.20,0.800,0.250", at(2).timestamp())
    );

    // Reopening appends without a second header
    drop(AuditLog::open(&path).unwrap());
    let reopened = std::fs::read_to_string(&path).unwrap();
    assert_eq!(reopened.matches("timestamp,").count(), 1);
}

#[test]
fn test_sample_timestamps_drive_reports() {
    let (classifier, _) = ScriptedClassifier::new(3, quiet());
    let sink = Arc::new(RecordingSink::default());
    let mut monitor = Monitor::new(
        &test_config(),
        Box::new(classifier),
        Box::new(Arc::clone(&sink)),
        None,
        create_shared_stats(),
    )
    .unwrap();

    monitor.ingest_sample(Sample::new(80.0, 95.0, 0.5, at(42)));

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].timestamp, at(42));
    assert_eq!(reports[0].hr, 80.0);
}
