//! Event detection from classifier output.
//!
//! [`classify_result`] is a pure function of the classification result and
//! the configured thresholds.

use crate::classifier::ClassificationResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the class representing normal rhythm.
pub const NORMAL_CLASS: &str = "normal";

/// Event thresholds and the class they watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Class whose probability signals a sudden change
    pub target_class: String,
    /// Target class probability at or above which an event fires
    pub sudden: f64,
    /// Anomaly score at or above which an event fires
    pub anomaly: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            target_class: "sudden_change".to_string(),
            sudden: 0.70,
            anomaly: 0.50,
        }
    }
}

/// Discrete label for an inference cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// The configured target class won (ties go to the target)
    Target(String),
    Normal,
    /// The classifier returned no class probabilities
    Unknown,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Target(name) => f.write_str(name),
            Label::Normal => f.write_str(NORMAL_CLASS),
            Label::Unknown => f.write_str("unknown"),
        }
    }
}

/// Which test marked a cycle as an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTrigger {
    SuddenProbability { probability: f64, threshold: f64 },
    Anomaly { score: f64, threshold: f64 },
}

/// Interpretation of one classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDecision {
    pub label: Label,
    pub is_event: bool,
    /// Human-readable description of the trigger, empty when no event
    pub reason: String,
    pub trigger: Option<EventTrigger>,
    /// Target class probability, absent when no probabilities were returned
    pub p_target: Option<f64>,
    /// Normal class probability, absent when no probabilities were returned
    pub p_normal: Option<f64>,
}

/// Interpret a classification result against the thresholds.
///
/// The sudden-probability test runs before the anomaly test; the first one
/// to match decides the reason.
pub fn classify_result(result: &ClassificationResult, thresholds: &Thresholds) -> EventDecision {
    if result.class_probabilities.is_empty() {
        return EventDecision {
            label: Label::Unknown,
            is_event: false,
            reason: String::new(),
            trigger: None,
            p_target: None,
            p_normal: None,
        };
    }

    let p_target = result.probability(&thresholds.target_class);
    let p_normal = result.probability(NORMAL_CLASS);

    let label = if p_target >= p_normal {
        Label::Target(thresholds.target_class.clone())
    } else {
        Label::Normal
    };

    let trigger = if p_target >= thresholds.sudden {
        Some(EventTrigger::SuddenProbability {
            probability: p_target,
            threshold: thresholds.sudden,
        })
    } else {
        result
            .anomaly_score
            .filter(|&score| score >= thresholds.anomaly)
            .map(|score| EventTrigger::Anomaly {
                score,
                threshold: thresholds.anomaly,
            })
    };

    let reason = match trigger {
        Some(EventTrigger::SuddenProbability {
            probability,
            threshold,
        }) => format!(
            "{} prob {probability:.2} >= sudden threshold {threshold:.2}",
            thresholds.target_class
        ),
        Some(EventTrigger::Anomaly { score, threshold }) => {
            format!("anomaly {score:.2} >= anomaly threshold {threshold:.2}")
        }
        None => String::new(),
    };

    EventDecision {
        label,
        is_event: trigger.is_some(),
        reason,
        trigger,
        p_target: Some(p_target),
        p_normal: Some(p_normal),
    }
}
