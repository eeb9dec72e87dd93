//! Line source backed by any buffered reader (files, stdin, tty devices).

use super::{SampleSource, SourceError, SourceEvent};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use std::time::Duration;

/// Sensor device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device path, e.g. `/dev/ttyACM0`
    pub path: String,
    /// Baud rate of the serial link
    pub baud: u32,
    /// How long a read may block before reporting [`SourceEvent::Idle`]
    #[serde(with = "crate::config::duration_serde")]
    pub read_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyACM0".to_string(),
            baud: 115_200,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Reads newline-terminated lines from a buffered reader.
///
/// Invalid UTF-8 is replaced rather than rejected; the parser discards
/// whatever does not decode into numbers.
pub struct ReaderSource {
    reader: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
}

impl ReaderSource {
    /// Wrap an arbitrary buffered reader.
    pub fn new(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            buf: Vec::with_capacity(64),
        }
    }

    /// Read lines from a file or character device.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SourceError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::new(BufReader::new(file)))
    }

    /// Read lines from standard input.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(std::io::stdin()))
    }
}

impl SampleSource for ReaderSource {
    // A read that times out mid-line keeps the partial bytes in `buf` so the
    // next call completes the same line.
    fn read_line(&mut self) -> Result<SourceEvent, SourceError> {
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) if self.buf.is_empty() => Ok(SourceEvent::Closed),
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                Ok(SourceEvent::Line(line))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(SourceEvent::Idle)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(SourceEvent::Idle),
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}
