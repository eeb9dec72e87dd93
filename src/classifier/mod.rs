//! Classifier interface for the heart monitor agent.
//!
//! The model itself lives outside the agent. A [`Classifier`] takes a fixed
//! length feature vector and returns class probabilities and an optional
//! anomaly score.

#[cfg(unix)]
pub mod eim;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[cfg(unix)]
pub use eim::{EimRunner, ModelInfo};

/// Raw output of one classifier call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Class name to probability in `[0, 1]`
    #[serde(default, rename = "classification")]
    pub class_probabilities: BTreeMap<String, f64>,
    /// Anomaly score in `[0, 1]`, when the model has an anomaly block
    #[serde(default, rename = "anomaly", skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
}

impl ClassificationResult {
    /// Probability of a class, 0 when the class is absent.
    pub fn probability(&self, class: &str) -> f64 {
        self.class_probabilities.get(class).copied().unwrap_or(0.0)
    }
}

/// Classifier failures.
///
/// `Init` is fatal for the agent. The other variants only skip the current
/// inference cycle.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier initialization failed: {0}")]
    Init(String),
    #[error("classifier call failed: {0}")]
    Call(String),
    #[error("classifier did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// A synchronous feature-vector classifier.
pub trait Classifier: Send {
    /// Length of the feature vector the model expects.
    fn input_len(&self) -> usize;

    /// Classify one feature vector.
    fn classify(&mut self, features: &[f32]) -> Result<ClassificationResult, ClassifierError>;

    /// Release the model. Called once on shutdown.
    fn stop(&mut self) {}
}
