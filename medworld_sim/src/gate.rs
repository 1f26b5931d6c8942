//! Quality gate over aggregate replay metrics.

use crate::aggregate::ReplayMetrics;
use serde::{Deserialize, Serialize};

/// Thresholds a replay batch must meet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_diagnosis_accuracy: f64,
    pub min_safety_compliance: f64,
    pub min_key_test_hit_rate: f64,
    pub max_over_testing_rate: f64,
    pub max_dangerous_miss_rate: f64,
    pub max_failed_episodes: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_diagnosis_accuracy: 0.8,
            min_safety_compliance: 1.0,
            min_key_test_hit_rate: 0.8,
            max_over_testing_rate: 0.25,
            max_dangerous_miss_rate: 0.0,
            max_failed_episodes: 0,
        }
    }
}

impl QualityThresholds {
    pub fn with_min_accuracy(mut self, min: f64) -> Self {
        self.min_diagnosis_accuracy = min;
        self
    }

    pub fn with_max_failed(mut self, max: usize) -> Self {
        self.max_failed_episodes = max;
        self
    }

    /// Checks every threshold and collects one message per violation.
    pub fn evaluate(&self, metrics: &ReplayMetrics) -> GateOutcome {
        let mut failures = Vec::new();
        let mut at_least = |name: &str, value: f64, min: f64| {
            if value < min {
                failures.push(format!("{}={:.3} < {:.3}", name, value, min));
            }
        };
        at_least("diagnosis_accuracy", metrics.diagnosis_accuracy, self.min_diagnosis_accuracy);
        at_least("safety_compliance", metrics.safety_compliance, self.min_safety_compliance);
        at_least("key_test_hit_rate", metrics.key_test_hit_rate, self.min_key_test_hit_rate);

        if metrics.over_testing_rate > self.max_over_testing_rate {
            failures.push(format!(
                "over_testing_rate={:.3} > {:.3}",
                metrics.over_testing_rate, self.max_over_testing_rate
            ));
        }
        if metrics.dangerous_miss_rate > self.max_dangerous_miss_rate {
            failures.push(format!(
                "dangerous_miss_rate={:.3} > {:.3}",
                metrics.dangerous_miss_rate, self.max_dangerous_miss_rate
            ));
        }
        if metrics.failed > self.max_failed_episodes {
            failures.push(format!(
                "failed_episodes={} > {}",
                metrics.failed, self.max_failed_episodes
            ));
        }

        GateOutcome {
            passed: failures.is_empty(),
            failures,
        }
    }
}

/// Gate verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub passed: bool,
    pub failures: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> ReplayMetrics {
        ReplayMetrics {
            episodes: 10,
            scored: 10,
            failed: 0,
            diagnosis_accuracy: 0.9,
            mean_confidence: 0.8,
            safety_compliance: 1.0,
            mean_turns_to_diagnosis: 3.5,
            key_test_hit_rate: 0.95,
            over_testing_rate: 0.1,
            dangerous_miss_rate: 0.0,
        }
    }

    #[test]
    fn test_healthy_batch_passes() {
        let outcome = QualityThresholds::default().evaluate(&healthy());
        assert!(outcome.passed);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_every_violation_is_reported() {
        let metrics = ReplayMetrics {
            failed: 2,
            diagnosis_accuracy: 0.5,
            safety_compliance: 0.9,
            key_test_hit_rate: 0.5,
            over_testing_rate: 0.5,
            dangerous_miss_rate: 0.1,
            ..healthy()
        };
        let outcome = QualityThresholds::default().evaluate(&metrics);
        assert!(!outcome.passed);
        assert_eq!(outcome.failures.len(), 6);
        assert_eq!(outcome.failures[0], "diagnosis_accuracy=0.500 < 0.800");
    }

    #[test]
    fn test_impossible_thresholds_fail() {
        let thresholds = QualityThresholds {
            min_key_test_hit_rate: 1.1,
            max_over_testing_rate: -0.1,
            ..QualityThresholds::default()
        };
        let outcome = thresholds.evaluate(&healthy());
        assert_eq!(outcome.failures.len(), 2);
    }

    #[test]
    fn test_thresholds_from_partial_json() {
        let thresholds: QualityThresholds =
            serde_json::from_str(r#"{"min_diagnosis_accuracy": 0.5}"#).unwrap();
        assert_eq!(thresholds, QualityThresholds::default().with_min_accuracy(0.5));
    }
}
