//! Serial port source using the `serialport` crate.

use super::reader::{DeviceConfig, ReaderSource};
use super::{SampleSource, SourceError, SourceEvent};
use std::io::BufReader;

/// Sensor link over a serial port.
pub struct SerialSource {
    inner: ReaderSource,
}

impl SerialSource {
    /// Open and configure the serial port.
    pub fn open(config: &DeviceConfig) -> Result<Self, SourceError> {
        let port = serialport::new(&config.path, config.baud)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| SourceError::Open {
                path: config.path.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(device = %config.path, baud = config.baud, "opened serial port");

        Ok(Self {
            inner: ReaderSource::new(BufReader::new(port)),
        })
    }
}

impl SampleSource for SerialSource {
    fn read_line(&mut self) -> Result<SourceEvent, SourceError> {
        self.inner.read_line()
    }
}
