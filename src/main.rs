//! Heart Monitor Agent CLI
//!
//! Streams a vital-signs sensor through a windowed classifier.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use heartmonitor_agent::{
    audit::{create_shared_stats_with_persistence, stats::PersistedStats, AuditLog, AuditSink},
    classifier::Classifier,
    config::Config,
    core::{Channel, FeatureLayout, SystemClock},
    source::{open_device, ReaderSource, SampleSource},
    telemetry::{create_sink, DisabledSink, MetricsSink},
    Monitor, StopReason, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "heartmonitor")]
#[command(version = VERSION)]
#[command(
    about = "Streaming heart monitor with windowed inference and telemetry",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring
    Start(StartArgs),

    /// Show statistics from previous runs
    Status,

    /// Show configuration
    Config,
}

#[derive(Args, Default)]
struct StartArgs {
    /// Read sensor lines from a file instead of the device ("-" for stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Serial device path
    #[arg(long)]
    device: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Model file (.eim)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Sensor sampling frequency in Hz
    #[arg(long)]
    freq: Option<u32>,

    /// Window length in seconds
    #[arg(long)]
    window: Option<f64>,

    /// Seconds between inference cycles
    #[arg(long)]
    step: Option<f64>,

    /// Seconds between routine telemetry reports
    #[arg(long)]
    routine_interval: Option<f64>,

    /// Class whose probability signals a sudden change
    #[arg(long)]
    class: Option<String>,

    /// Target class probability that raises an event
    #[arg(long)]
    sudden_threshold: Option<f64>,

    /// Anomaly score that raises an event
    #[arg(long)]
    anomaly_threshold: Option<f64>,

    /// How channels are combined into the model input
    #[arg(long, value_enum)]
    layout: Option<LayoutArg>,

    /// Collector write key
    #[arg(long)]
    write_key: Option<String>,

    /// Send telemetry from a background queue of this size
    #[arg(long)]
    queue: Option<usize>,

    /// CSV audit log path
    #[arg(long)]
    log: Option<PathBuf>,

    /// Seconds before a classifier call is abandoned
    #[arg(long)]
    classifier_timeout: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    HeartRate,
    Spo2,
    Ecg,
    Concatenated,
    Interleaved,
}

impl From<LayoutArg> for FeatureLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::HeartRate => FeatureLayout::HeartRate,
            LayoutArg::Spo2 => FeatureLayout::Channel(Channel::SpO2),
            LayoutArg::Ecg => FeatureLayout::Channel(Channel::Ecg),
            LayoutArg::Concatenated => FeatureLayout::Concatenated,
            LayoutArg::Interleaved => FeatureLayout::Interleaved,
        }
    }
}

impl StartArgs {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(device) = self.device {
            config.device.path = device;
        }
        if let Some(baud) = self.baud {
            config.device.baud = baud;
        }
        if let Some(model) = self.model {
            config.model_path = Some(model);
        }
        if let Some(freq) = self.freq {
            config.sample_rate_hz = freq;
        }
        if let Some(secs) = self.window {
            config.window = seconds("--window", secs)?;
        }
        if let Some(secs) = self.step {
            config.step = seconds("--step", secs)?;
        }
        if let Some(secs) = self.routine_interval {
            config.routine_interval = seconds("--routine-interval", secs)?;
        }
        if let Some(class) = self.class {
            config.thresholds.target_class = class;
        }
        if let Some(value) = self.sudden_threshold {
            config.thresholds.sudden = value;
        }
        if let Some(value) = self.anomaly_threshold {
            config.thresholds.anomaly = value;
        }
        if let Some(layout) = self.layout {
            config.feature_layout = layout.into();
        }
        if let Some(key) = self.write_key {
            config.collector.write_key = Some(key);
        }
        if let Some(capacity) = self.queue {
            config.collector.queue_capacity = Some(capacity);
        }
        if let Some(path) = self.log {
            config.audit_log_path = path;
        }
        if let Some(secs) = self.classifier_timeout {
            config.classifier_timeout_secs = Some(secs);
        }
        Ok(())
    }
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid value {secs} for {flag}"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start(args) => cmd_start(args),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_start(args: StartArgs) -> Result<()> {
    println!("Heart Monitor Agent v{VERSION}");
    println!();

    let mut config = Config::load().context("could not load configuration")?;
    config.apply_env()?;
    let input = args.input.clone();
    args.apply(&mut config)?;
    config.validate()?;

    if let Err(e) = config.ensure_directories() {
        tracing::warn!("could not create directories: {e}");
    }

    let Some(model_path) = config.model_path.clone() else {
        bail!("no model configured (set HR_MODEL or pass --model)");
    };

    let classifier = start_classifier(&model_path, config.classifier_timeout())?;

    let sink: Box<dyn MetricsSink> = match create_sink(&config.collector) {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!("telemetry disabled: {e}");
            Box::new(DisabledSink)
        }
    };

    let audit: Option<Box<dyn AuditSink>> = match AuditLog::open(&config.audit_log_path) {
        Ok(log) => Some(Box::new(log)),
        Err(e) => {
            tracing::error!("audit log disabled: {e}");
            None
        }
    };

    let stats = create_shared_stats_with_persistence(config.stats_path());

    println!("Starting monitor...");
    println!("  Model: {}", model_path.display());
    println!(
        "  Window: {:.1}s at {} Hz ({} samples)",
        config.window.as_secs_f64(),
        config.sample_rate_hz,
        config.window_len()
    );
    println!("  Step: {:.1}s", config.step.as_secs_f64());
    println!("  Routine interval: {:.1}s", config.routine_interval.as_secs_f64());
    println!(
        "  Thresholds: {} >= {:.2}, anomaly >= {:.2}",
        config.thresholds.target_class, config.thresholds.sudden, config.thresholds.anomaly
    );
    println!("  Audit log: {}", config.audit_log_path.display());
    println!();

    let mut monitor = Monitor::new(&config, classifier, sink, audit, stats.clone())?;

    let mut source = open_source(input.as_deref(), &config)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    println!("Press Ctrl+C to stop");
    println!();

    let reason = monitor.run(source.as_mut(), &SystemClock, &running);

    println!();
    println!("Stopping monitor...");
    monitor.shutdown();

    println!();
    println!("{}", stats.summary());

    if reason == StopReason::SourceFailed {
        bail!("sensor stream failed");
    }
    Ok(())
}

#[cfg(unix)]
fn start_classifier(model_path: &Path, timeout: Option<Duration>) -> Result<Box<dyn Classifier>> {
    use heartmonitor_agent::classifier::{ClassifierError, EimRunner};

    let runner = match EimRunner::spawn(model_path, timeout) {
        Ok(runner) => runner,
        Err(ClassifierError::Init(message)) => bail!("model failed to start: {message}"),
        Err(e) => return Err(e.into()),
    };

    let params = &runner.info().model_parameters;
    if let Some(project) = &runner.info().project {
        println!("Loaded model: {}/{}", project.owner, project.name);
    }
    println!(
        "  Input features: {} | labels: {}",
        params.input_features_count,
        params.labels.join(", ")
    );

    Ok(Box::new(runner))
}

#[cfg(not(unix))]
fn start_classifier(model_path: &Path, _timeout: Option<Duration>) -> Result<Box<dyn Classifier>> {
    bail!(
        "model runner {} needs a Unix socket; not supported on this platform",
        model_path.display()
    )
}

fn open_source(input: Option<&Path>, config: &Config) -> Result<Box<dyn SampleSource>> {
    match input {
        Some(path) if path == Path::new("-") => Ok(Box::new(ReaderSource::stdin())),
        Some(path) => {
            let source = ReaderSource::open_file(path)?;
            println!("Reading samples from {}", path.display());
            Ok(Box::new(source))
        }
        None => {
            let source = open_device(&config.device)?;
            println!(
                "Connected to {} @ {} baud",
                config.device.path, config.device.baud
            );
            Ok(source)
        }
    }
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Heart Monitor Agent Status");
    println!("==========================");
    println!();

    println!("Configuration:");
    println!("  Device: {} @ {} baud", config.device.path, config.device.baud);
    match &config.model_path {
        Some(path) => println!("  Model: {}", path.display()),
        None => println!("  Model: not configured"),
    }
    println!(
        "  Telemetry: {}",
        if config
            .collector
            .write_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
        {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Audit log: {}", config.audit_log_path.display());
    println!();

    let stats_path = config.stats_path();
    if !stats_path.exists() {
        println!("No previous session data found.");
        return Ok(());
    }

    let content = std::fs::read_to_string(&stats_path)
        .with_context(|| format!("could not read {}", stats_path.display()))?;
    let stats: PersistedStats = serde_json::from_str(&content)
        .with_context(|| format!("could not parse {}", stats_path.display()))?;

    println!("Cumulative Statistics (updated {}):", stats.last_updated);
    println!(
        "  Lines read: {} ({} malformed)",
        stats.lines_read, stats.malformed_lines
    );
    println!(
        "  Inference cycles: {} ({} classifier failures)",
        stats.inference_cycles, stats.classifier_failures
    );
    println!("  Events detected: {}", stats.events_detected);
    println!(
        "  Routine reports: {} sent, {} failed",
        stats.routine_sent, stats.routine_failed
    );
    println!(
        "  Event reports: {} sent, {} failed",
        stats.event_sent, stats.event_failed
    );
    println!(
        "  Audit records: {} written, {} failed",
        stats.audit_records, stats.audit_failures
    );
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
