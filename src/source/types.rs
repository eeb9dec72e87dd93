//! Sample types and the line parser for the sensor stream.
//!
//! The sensor emits one `hr,spo2,ecg` line per sample. A line either decodes
//! into a complete [`Sample`] or is rejected as a whole.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of comma-separated fields in a sensor line.
pub const FIELD_COUNT: usize = 3;

/// One decoded reading from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Heart rate (beats per minute)
    pub hr: f64,
    /// Blood-oxygen saturation (percent)
    pub spo2: f64,
    /// ECG-like signal value
    pub ecg: f64,
    /// When the line was read
    pub received_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(hr: f64, spo2: f64, ecg: f64, received_at: DateTime<Utc>) -> Self {
        Self {
            hr,
            spo2,
            ecg,
            received_at,
        }
    }
}

/// Why a sensor line was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("malformed input: expected {FIELD_COUNT} fields, got {0}")]
    FieldCount(usize),
    #[error("malformed input: field {index} ({value:?}) is not a finite number")]
    NotNumeric { index: usize, value: String },
}

/// Parse one raw sensor line into a [`Sample`].
///
/// The line must hold exactly three comma-separated numbers in the order
/// heart rate, SpO2, ECG. Whitespace around the line and each field is
/// ignored. `NaN` and infinities are rejected.
pub fn parse_line(line: &str, received_at: DateTime<Utc>) -> Result<Sample, SampleError> {
    let parts: Vec<&str> = line.trim().split(',').collect();
    if parts.len() != FIELD_COUNT {
        return Err(SampleError::FieldCount(parts.len()));
    }

    let mut values = [0.0_f64; FIELD_COUNT];
    for (index, part) in parts.iter().enumerate() {
        let value = part
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| SampleError::NotNumeric {
                index,
                value: part.to_string(),
            })?;
        values[index] = value;
    }

    Ok(Sample::new(values[0], values[1], values[2], received_at))
}
