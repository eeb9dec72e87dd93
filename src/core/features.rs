//! Feature vector construction from the channel windows.
//!
//! The classifier takes a flat `f32` vector of fixed length. How channels are
//! laid out in that vector must match how the model was trained, so the
//! layout is configurable.

use crate::core::window::{Channel, ChannelWindows, WindowError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How channel windows are combined into one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "channel")]
pub enum FeatureLayout {
    /// Heart rate only (the layout of the deployed model)
    #[default]
    HeartRate,
    /// A single chosen channel
    Channel(Channel),
    /// `hr[0..n], spo2[0..n], ecg[0..n]`
    Concatenated,
    /// `hr[0], spo2[0], ecg[0], hr[1], ...`
    Interleaved,
}

impl FeatureLayout {
    /// Number of channels contributing to the vector.
    pub fn channel_count(&self) -> usize {
        match self {
            FeatureLayout::HeartRate | FeatureLayout::Channel(_) => 1,
            FeatureLayout::Concatenated | FeatureLayout::Interleaved => Channel::ALL.len(),
        }
    }

    /// Samples needed from each channel to fill a vector of `input_len`.
    pub fn samples_per_channel(&self, input_len: usize) -> Result<usize, FeatureError> {
        let channels = self.channel_count();
        if input_len == 0 || input_len % channels != 0 {
            return Err(FeatureError::IncompatibleLength {
                input_len,
                channels,
            });
        }
        Ok(input_len / channels)
    }

    /// Check that a window of `window_len` samples can feed a vector of `input_len`.
    pub fn check(&self, input_len: usize, window_len: usize) -> Result<(), FeatureError> {
        let per_channel = self.samples_per_channel(input_len)?;
        if per_channel > window_len {
            return Err(FeatureError::WindowTooShort {
                per_channel,
                window_len,
            });
        }
        Ok(())
    }
}

/// Errors building a feature vector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("input length {input_len} cannot be split across {channels} channel(s)")]
    IncompatibleLength { input_len: usize, channels: usize },
    #[error("model needs {per_channel} samples per channel but the window holds {window_len}")]
    WindowTooShort {
        per_channel: usize,
        window_len: usize,
    },
    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Build a feature vector of `input_len` values from the most recent samples.
pub fn build_feature_vector(
    windows: &ChannelWindows,
    layout: FeatureLayout,
    input_len: usize,
) -> Result<Vec<f32>, FeatureError> {
    let per_channel = layout.samples_per_channel(input_len)?;
    let latest = windows.latest(per_channel)?;

    let mut features = Vec::with_capacity(input_len);
    match layout {
        FeatureLayout::HeartRate => {
            features.extend(latest.channel(Channel::HeartRate).iter().map(|&v| v as f32));
        }
        FeatureLayout::Channel(channel) => {
            features.extend(latest.channel(channel).iter().map(|&v| v as f32));
        }
        FeatureLayout::Concatenated => {
            for channel in Channel::ALL {
                features.extend(latest.channel(channel).iter().map(|&v| v as f32));
            }
        }
        FeatureLayout::Interleaved => {
            for i in 0..per_channel {
                for channel in Channel::ALL {
                    features.push(latest.channel(channel)[i] as f32);
                }
            }
        }
    }

    Ok(features)
}
