//! Run statistics for the monitor.
//!
//! Counters are atomic so the telemetry worker and the ingestion loop can
//! share one instance. Totals are persisted as JSON and accumulate across
//! runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one monitor process.
#[derive(Debug)]
pub struct MonitorStats {
    /// Raw lines read from the sensor
    lines_read: AtomicU64,
    /// Lines that decoded into samples
    samples_accepted: AtomicU64,
    /// Lines discarded as malformed
    malformed_lines: AtomicU64,
    /// Routine reports delivered
    routine_sent: AtomicU64,
    /// Routine reports that failed to deliver
    routine_failed: AtomicU64,
    /// Inference cycles completed
    inference_cycles: AtomicU64,
    /// Cycles skipped because the classifier failed
    classifier_failures: AtomicU64,
    /// Cycles classified as events
    events_detected: AtomicU64,
    /// Event reports delivered
    event_sent: AtomicU64,
    /// Event reports that failed to deliver
    event_failed: AtomicU64,
    /// Audit records written
    audit_records: AtomicU64,
    /// Audit records that could not be written
    audit_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl MonitorStats {
    /// Create empty statistics.
    pub fn new() -> Self {
        Self {
            lines_read: AtomicU64::new(0),
            samples_accepted: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            routine_sent: AtomicU64::new(0),
            routine_failed: AtomicU64::new(0),
            inference_cycles: AtomicU64::new(0),
            classifier_failures: AtomicU64::new(0),
            events_detected: AtomicU64::new(0),
            event_sent: AtomicU64::new(0),
            event_failed: AtomicU64::new(0),
            audit_records: AtomicU64::new(0),
            audit_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create statistics that continue from the totals stored at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("could not load previous stats: {e}");
        }

        stats
    }

    pub fn record_line(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample(&self) {
        self.samples_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a routine report.
    pub fn record_routine(&self, delivered: bool) {
        let counter = if delivered {
            &self.routine_sent
        } else {
            &self.routine_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference(&self) {
        self.inference_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classifier_failure(&self) {
        self.classifier_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of an event report.
    pub fn record_event_report(&self, delivered: bool) {
        let counter = if delivered {
            &self.event_sent
        } else {
            &self.event_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of an audit write.
    pub fn record_audit(&self, written: bool) {
        let counter = if written {
            &self.audit_records
        } else {
            &self.audit_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            routine_sent: self.routine_sent.load(Ordering::Relaxed),
            routine_failed: self.routine_failed.load(Ordering::Relaxed),
            inference_cycles: self.inference_cycles.load(Ordering::Relaxed),
            classifier_failures: self.classifier_failures.load(Ordering::Relaxed),
            events_detected: self.events_detected.load(Ordering::Relaxed),
            event_sent: self.event_sent.load(Ordering::Relaxed),
            event_failed: self.event_failed.load(Ordering::Relaxed),
            audit_records: self.audit_records.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Monitor Statistics:\n\
             - Lines read: {} ({} malformed)\n\
             - Samples accepted: {}\n\
             - Routine reports: {} sent, {} failed\n\
             - Inference cycles: {} ({} classifier failures)\n\
             - Events detected: {}\n\
             - Event reports: {} sent, {} failed\n\
             - Audit records: {} written, {} failed\n\
             - Session duration: {} seconds",
            stats.lines_read,
            stats.malformed_lines,
            stats.samples_accepted,
            stats.routine_sent,
            stats.routine_failed,
            stats.inference_cycles,
            stats.classifier_failures,
            stats.events_detected,
            stats.event_sent,
            stats.event_failed,
            stats.audit_records,
            stats.audit_failures,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                lines_read: stats.lines_read,
                samples_accepted: stats.samples_accepted,
                malformed_lines: stats.malformed_lines,
                routine_sent: stats.routine_sent,
                routine_failed: stats.routine_failed,
                inference_cycles: stats.inference_cycles,
                classifier_failures: stats.classifier_failures,
                events_detected: stats.events_detected,
                event_sent: stats.event_sent,
                event_failed: stats.event_failed,
                audit_records: stats.audit_records,
                audit_failures: stats.audit_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load totals from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.lines_read.store(persisted.lines_read, Ordering::Relaxed);
                self.samples_accepted
                    .store(persisted.samples_accepted, Ordering::Relaxed);
                self.malformed_lines
                    .store(persisted.malformed_lines, Ordering::Relaxed);
                self.routine_sent.store(persisted.routine_sent, Ordering::Relaxed);
                self.routine_failed
                    .store(persisted.routine_failed, Ordering::Relaxed);
                self.inference_cycles
                    .store(persisted.inference_cycles, Ordering::Relaxed);
                self.classifier_failures
                    .store(persisted.classifier_failures, Ordering::Relaxed);
                self.events_detected
                    .store(persisted.events_detected, Ordering::Relaxed);
                self.event_sent.store(persisted.event_sent, Ordering::Relaxed);
                self.event_failed.store(persisted.event_failed, Ordering::Relaxed);
                self.audit_records
                    .store(persisted.audit_records, Ordering::Relaxed);
                self.audit_failures
                    .store(persisted.audit_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub samples_accepted: u64,
    pub malformed_lines: u64,
    pub routine_sent: u64,
    pub routine_failed: u64,
    pub inference_cycles: u64,
    pub classifier_failures: u64,
    pub events_detected: u64,
    pub event_sent: u64,
    pub event_failed: u64,
    pub audit_records: u64,
    pub audit_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub lines_read: u64,
    pub samples_accepted: u64,
    pub malformed_lines: u64,
    pub routine_sent: u64,
    pub routine_failed: u64,
    pub inference_cycles: u64,
    pub classifier_failures: u64,
    pub events_detected: u64,
    pub event_sent: u64,
    pub event_failed: u64,
    pub audit_records: u64,
    pub audit_failures: u64,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared statistics.
pub type SharedMonitorStats = Arc<MonitorStats>;

/// Create new shared statistics.
pub fn create_shared_stats() -> SharedMonitorStats {
    Arc::new(MonitorStats::new())
}

/// Create new shared statistics with persistence.
pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedMonitorStats {
    Arc::new(MonitorStats::with_persistence(path))
}
