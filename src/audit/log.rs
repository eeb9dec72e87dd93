//! Append-only CSV audit log, one row per inference cycle.
//!
//! The file stays open for the lifetime of the monitor and is flushed after
//! every row, so a crash loses at most the row being written.

use crate::telemetry::TelemetryReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column header written once to a new or empty log.
pub const HEADER: &str = "timestamp,hr,spo2,ecg,prob_target_class,anomaly_score";

/// One completed inference cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the cycle ran
    pub cycle_at: DateTime<Utc>,
    pub hr: f64,
    pub spo2: f64,
    pub ecg: f64,
    pub prob_target_class: Option<f64>,
    pub anomaly_score: Option<f64>,
    pub prob_normal: Option<f64>,
}

impl AuditRecord {
    /// Build the record for a cycle from the report it produced.
    pub fn from_report(report: &TelemetryReport, cycle_at: DateTime<Utc>) -> Self {
        Self {
            cycle_at,
            hr: report.hr,
            spo2: report.spo2,
            ecg: report.ecg,
            prob_target_class: report.prob_target_class,
            anomaly_score: report.anomaly_score,
            prob_normal: report.prob_normal,
        }
    }

    /// Render as a CSV row (without trailing newline).
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{:.2},{:.2},{:.2},{},{}",
            self.cycle_at.timestamp(),
            self.hr,
            self.spo2,
            self.ecg,
            format_optional(self.prob_target_class),
            format_optional(self.anomaly_score)
        )
    }
}

fn format_optional(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.3}")).unwrap_or_default()
}

/// Audit write failures.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to open audit log {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write audit record: {0}")]
    Write(#[from] std::io::Error),
}

/// Destination for audit records.
pub trait AuditSink: Send {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Push buffered data to durable storage.
    fn flush(&mut self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// CSV audit log file.
pub struct AuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, writing the header if the file is empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| AuditError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;
        let is_empty = file.metadata().map_err(open_err)?.len() == 0;

        let mut log = Self {
            writer: BufWriter::new(file),
            path,
        };

        if is_empty {
            writeln!(log.writer, "{HEADER}")?;
            log.writer.flush()?;
        }

        tracing::info!(path = ?log.path, "audit log opened");
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for AuditLog {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        writeln!(self.writer, "{}", record.to_csv_row())?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AuditError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}
