//! Sliding sample windows, one per sensor channel.
//!
//! Every sample updates all channels together, so the channel windows
//! always have the same length. Once at capacity the oldest value is evicted.

use crate::source::Sample;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// A monitored sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    HeartRate,
    #[serde(rename = "spo2")]
    SpO2,
    Ecg,
}

impl Channel {
    /// All channels in sample field order.
    pub const ALL: [Channel; 3] = [Channel::HeartRate, Channel::SpO2, Channel::Ecg];

    fn index(self) -> usize {
        match self {
            Channel::HeartRate => 0,
            Channel::SpO2 => 1,
            Channel::Ecg => 2,
        }
    }

    fn value(self, sample: &Sample) -> f64 {
        match self {
            Channel::HeartRate => sample.hr,
            Channel::SpO2 => sample.spo2,
            Channel::Ecg => sample.ecg,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::HeartRate => "hr",
            Channel::SpO2 => "spo2",
            Channel::Ecg => "ecg",
        };
        f.write_str(name)
    }
}

/// Errors raised when reading from the windows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("insufficient data: requested {requested} samples, window holds {available}")]
    InsufficientData { requested: usize, available: usize },
}

/// The most recent `n` values of every channel, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestValues {
    channels: [Vec<f64>; 3],
}

impl LatestValues {
    /// Values for one channel.
    pub fn channel(&self, channel: Channel) -> &[f64] {
        &self.channels[channel.index()]
    }

    /// Number of values per channel.
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-capacity ring buffers for all channels.
#[derive(Debug, Clone)]
pub struct ChannelWindows {
    capacity: usize,
    channels: [VecDeque<f64>; 3],
}

impl ChannelWindows {
    /// Create empty windows holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
        }
    }

    /// Append one sample to every channel, evicting the oldest values when full.
    pub fn append(&mut self, sample: &Sample) {
        if self.capacity == 0 {
            return;
        }
        for channel in Channel::ALL {
            let window = &mut self.channels[channel.index()];
            if window.len() == self.capacity {
                window.pop_front();
            }
            window.push_back(channel.value(sample));
        }
    }

    /// True once every channel holds `capacity` values.
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.channels.iter().all(|w| w.len() == self.capacity)
    }

    /// Current number of samples held per channel.
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of samples per channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill level in percent, for status output.
    pub fn fill_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.len() as f64 / self.capacity as f64 * 100.0).min(100.0)
    }

    /// The most recent `n` values of every channel.
    pub fn latest(&self, n: usize) -> Result<LatestValues, WindowError> {
        let available = self.len();
        if n > available {
            return Err(WindowError::InsufficientData {
                requested: n,
                available,
            });
        }

        let channels = std::array::from_fn(|i| {
            let window = &self.channels[i];
            window.iter().skip(window.len() - n).copied().collect()
        });
        Ok(LatestValues { channels })
    }

    /// Drop all buffered values.
    pub fn clear(&mut self) {
        for window in &mut self.channels {
            window.clear();
        }
    }
}
