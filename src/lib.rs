//! Heart Monitor Agent - streaming windowed inference over a vital-signs sensor.
//!
//! The agent reads `hr,spo2,ecg` lines from a serial sensor, keeps a sliding
//! window per channel, and periodically classifies the window with an
//! external model. Results are reported to a telemetry collector and written
//! to a local CSV audit log.
//!
//! # Guarantees
//!
//! - **Bounded memory**: each channel window holds at most its capacity
//! - **Never stalls**: malformed lines, classifier errors and telemetry
//!   failures skip work but never stop ingestion
//! - **Auditable**: every completed inference cycle leaves a CSV row
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Heart Monitor Agent                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Source    │──▶│   Windows   │──▶│  Features   │       │
//! │  │  (serial)   │   │ (per chan.) │   │  (layout)   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                 │                  │              │
//! │         ▼                 ▼                  ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Scheduler  │──▶│  Telemetry  │◀──│ Classifier  │       │
//! │  │ (two clocks)│   │ (collector) │   │  + events   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                              │              │
//! │                                              ▼              │
//! │                                      ┌─────────────┐       │
//! │                                      │  Audit log  │       │
//! │                                      │    (CSV)    │       │
//! │                                      └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use heartmonitor_agent::{audit, classifier::EimRunner, source, telemetry, Config, Monitor};
//! use heartmonitor_agent::core::SystemClock;
//! use std::sync::atomic::AtomicBool;
//!
//! let config = Config::default();
//! let classifier = EimRunner::spawn("model.eim", None).expect("model failed to start");
//! let sink = telemetry::create_sink(&config.collector).expect("collector setup failed");
//! let stats = audit::create_shared_stats();
//!
//! let mut monitor = Monitor::new(&config, Box::new(classifier), sink, None, stats)
//!     .expect("model does not fit the window");
//! let mut source = source::open_device(&config.device).expect("sensor not available");
//!
//! let running = AtomicBool::new(true);
//! monitor.run(source.as_mut(), &SystemClock, &running);
//! println!("{}", monitor.shutdown().lines_read);
//! ```

pub mod audit;
pub mod classifier;
pub mod config;
pub mod core;
pub mod monitor;
pub mod source;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use audit::{AuditLog, AuditRecord, AuditSink, MonitorStats, SharedMonitorStats};
pub use classifier::{ClassificationResult, Classifier, ClassifierError};
pub use config::{Config, ConfigError};
pub use core::{ChannelWindows, EventDecision, FeatureLayout, InferenceScheduler, Thresholds};
pub use monitor::{CycleOutcome, LineOutcome, Monitor, MonitorError, StepOutcome, StopReason};
pub use source::{Sample, SampleSource, SourceEvent};
pub use telemetry::{CollectorConfig, MetricsSink, TelemetryError, TelemetryReport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
