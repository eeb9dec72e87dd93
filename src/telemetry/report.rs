//! Telemetry report payloads.

use crate::core::EventDecision;
use crate::source::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metrics sent to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub hr: f64,
    pub spo2: f64,
    pub ecg: f64,
    pub prob_target_class: Option<f64>,
    pub anomaly_score: Option<f64>,
    pub prob_normal: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryReport {
    /// Raw sample values only, no classification fields.
    pub fn routine(sample: &Sample, timestamp: DateTime<Utc>) -> Self {
        Self {
            hr: sample.hr,
            spo2: sample.spo2,
            ecg: sample.ecg,
            prob_target_class: None,
            anomaly_score: None,
            prob_normal: None,
            timestamp,
        }
    }

    /// Sample values plus the outcome of an inference cycle.
    pub fn inference(
        sample: &Sample,
        decision: &EventDecision,
        anomaly_score: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            hr: sample.hr,
            spo2: sample.spo2,
            ecg: sample.ecg,
            prob_target_class: decision.p_target,
            anomaly_score,
            prob_normal: decision.p_normal,
            timestamp,
        }
    }

    /// Collector fields `field1..field6`.
    ///
    /// Sample values carry two decimals, probabilities three; absent values
    /// are sent as empty strings.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("field1", format!("{:.2}", self.hr)),
            ("field2", format!("{:.2}", self.spo2)),
            ("field3", format!("{:.2}", self.ecg)),
            ("field4", format_probability(self.prob_target_class)),
            ("field5", format_probability(self.anomaly_score)),
            ("field6", format_probability(self.prob_normal)),
        ]
    }
}

fn format_probability(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.3}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Label;

    #[test]
    fn test_routine_fields() {
        let now = Utc::now();
        let report = TelemetryReport::routine(&Sample::new(72.0, 98.5, 0.123, now), now);
        assert_eq!(
            report.fields(),
            vec![
                ("field1", "72.00".to_string()),
                ("field2", "98.50".to_string()),
                ("field3", "0.12".to_string()),
                ("field4", String::new()),
                ("field5", String::new()),
                ("field6", String::new()),
            ]
        );
    }

    #[test]
    fn test_inference_fields() {
        let now = Utc::now();
        let decision = EventDecision {
            label: Label::Normal,
            is_event: true,
            reason: "anomaly".to_string(),
            trigger: None,
            p_target: Some(0.3),
            p_normal: Some(0.7),
        };
        let sample = Sample::new(80.0, 95.0, 1.0, now);
        let report = TelemetryReport::inference(&sample, &decision, Some(0.6), now);
        let fields = report.fields();
        assert_eq!(fields[3].1, "0.300");
        assert_eq!(fields[4].1, "0.600");
        assert_eq!(fields[5].1, "0.700");
    }
}
