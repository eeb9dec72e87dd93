//! Audit trail for the heart monitor agent.
//!
//! Every inference cycle leaves a CSV row behind, whatever happened to its
//! telemetry. Run statistics summarize what the monitor did.

pub mod log;
pub mod stats;

// Re-export commonly used types
pub use log::{AuditError, AuditLog, AuditRecord, AuditSink, HEADER};
pub use stats::{
    create_shared_stats, create_shared_stats_with_persistence, MonitorStats, SharedMonitorStats,
    StatsSnapshot,
};
