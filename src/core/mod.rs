//! Core functionality for the heart monitor agent.
//!
//! This module contains:
//! - Sliding channel windows fed by every sample
//! - Feature vector construction for the classifier
//! - Scheduling of routine reports and inference cycles
//! - Event detection from classifier output

pub mod events;
pub mod features;
pub mod scheduler;
pub mod window;

// Re-export commonly used types
pub use events::{classify_result, EventDecision, EventTrigger, Label, Thresholds, NORMAL_CLASS};
pub use features::{build_feature_vector, FeatureError, FeatureLayout};
pub use scheduler::{Clock, InferenceScheduler, ScheduledAction, SystemClock, Tick};
pub use window::{Channel, ChannelWindows, LatestValues, WindowError};
