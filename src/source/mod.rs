//! Sensor stream sources for the heart monitor agent.
//!
//! A source hands out raw text lines one at a time. Parsing into samples
//! happens in [`types::parse_line`], so sources stay unaware of the format.

pub mod reader;
pub mod types;

#[cfg(feature = "serial")]
pub mod serial;

use thiserror::Error;

pub use reader::{DeviceConfig, ReaderSource};
pub use types::{parse_line, Sample, SampleError, FIELD_COUNT};

#[cfg(feature = "serial")]
pub use serial::SerialSource;

/// What a single read from the sensor produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A complete line (without guarantees about its content)
    Line(String),
    /// No data arrived within the read timeout
    Idle,
    /// The stream ended
    Closed,
}

/// Errors raised by a sample source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open sensor source {path}: {message}")]
    Open { path: String, message: String },
    #[error("sensor read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A blocking, line-oriented sensor stream.
pub trait SampleSource {
    /// Block until the next line, a read timeout or the end of the stream.
    fn read_line(&mut self) -> Result<SourceEvent, SourceError>;
}

/// Open the configured sensor device.
///
/// With the `serial` feature the port is configured with the requested baud
/// rate. Without it the device is read as a plain character device, which
/// relies on the port having been configured externally.
pub fn open_device(config: &DeviceConfig) -> Result<Box<dyn SampleSource>, SourceError> {
    #[cfg(feature = "serial")]
    {
        Ok(Box::new(SerialSource::open(config)?))
    }

    #[cfg(not(feature = "serial"))]
    {
        tracing::warn!(
            device = %config.path,
            baud = config.baud,
            "serial feature disabled, reading device as a file (baud rate not applied)"
        );
        Ok(Box::new(ReaderSource::open_file(&config.path)?))
    }
}
