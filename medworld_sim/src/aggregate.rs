//! Batch-wide metric accumulation.
//!
//! Episodes may finish on any task in any order. Every rate is folded in as
//! a fixed-point integer so that the final sums are independent of arrival
//! order, and a concurrent batch reports exactly what a sequential one does.

use crate::runner::EpisodeRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-point scale for rate sums.
const SCALE: f64 = 1e9;

fn to_fixed(value: f64) -> u64 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * SCALE).round() as u64
}

/// Aggregate replay metrics. Rates are computed over scored episodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayMetrics {
    pub episodes: usize,
    pub scored: usize,
    pub failed: usize,
    pub diagnosis_accuracy: f64,
    pub mean_confidence: f64,
    pub safety_compliance: f64,
    pub mean_turns_to_diagnosis: f64,
    pub key_test_hit_rate: f64,
    pub over_testing_rate: f64,
    pub dangerous_miss_rate: f64,
}

/// Aggregate plus per-episode records, ordered by episode index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub metrics: ReplayMetrics,
    pub episodes: Vec<EpisodeRecord>,
}

impl ReplayReport {
    pub fn failed_episodes(&self) -> impl Iterator<Item = &EpisodeRecord> {
        self.episodes.iter().filter(|r| !r.is_scored())
    }
}

/// Single accumulation point shared by every episode task.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    scored: AtomicU64,
    failed: AtomicU64,
    correct: AtomicU64,
    compliant: AtomicU64,
    dangerous_misses: AtomicU64,
    turns_to_diagnosis: AtomicU64,
    confidence_sum: AtomicU64,
    key_hit_sum: AtomicU64,
    over_testing_sum: AtomicU64,
    records: Mutex<Vec<EpisodeRecord>>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one episode in.
    pub fn record(&self, record: EpisodeRecord) {
        if record.is_scored() {
            self.scored.fetch_add(1, Ordering::Relaxed);
            if record.diagnosis_correct {
                self.correct.fetch_add(1, Ordering::Relaxed);
            }
            if record.safety_compliant {
                self.compliant.fetch_add(1, Ordering::Relaxed);
            }
            if record.dangerous_miss {
                self.dangerous_misses.fetch_add(1, Ordering::Relaxed);
            }
            self.turns_to_diagnosis
                .fetch_add(record.turns_to_diagnosis as u64, Ordering::Relaxed);
            self.confidence_sum.fetch_add(to_fixed(record.confidence), Ordering::Relaxed);
            self.key_hit_sum.fetch_add(to_fixed(record.key_test_hit_rate), Ordering::Relaxed);
            self.over_testing_sum
                .fetch_add(to_fixed(record.over_testing_rate), Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.records.lock().push(record);
    }

    /// Current aggregate.
    pub fn metrics(&self) -> ReplayMetrics {
        let scored = self.scored.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let rate = |n: u64| if scored == 0 { 0.0 } else { n as f64 / scored as f64 };
        let mean = |sum: u64| if scored == 0 { 0.0 } else { sum as f64 / SCALE / scored as f64 };

        ReplayMetrics {
            episodes: (scored + failed) as usize,
            scored: scored as usize,
            failed: failed as usize,
            diagnosis_accuracy: rate(self.correct.load(Ordering::Relaxed)),
            mean_confidence: mean(self.confidence_sum.load(Ordering::Relaxed)),
            safety_compliance: rate(self.compliant.load(Ordering::Relaxed)),
            mean_turns_to_diagnosis: rate(self.turns_to_diagnosis.load(Ordering::Relaxed)),
            key_test_hit_rate: mean(self.key_hit_sum.load(Ordering::Relaxed)),
            over_testing_rate: mean(self.over_testing_sum.load(Ordering::Relaxed)),
            dangerous_miss_rate: rate(self.dangerous_misses.load(Ordering::Relaxed)),
        }
    }

    /// Snapshot report without consuming the accumulator.
    pub fn report(&self) -> ReplayReport {
        let mut episodes = self.records.lock().clone();
        episodes.sort_by_key(|r| r.index);
        ReplayReport {
            metrics: self.metrics(),
            episodes,
        }
    }

    pub fn into_report(self) -> ReplayReport {
        let metrics = self.metrics();
        let mut episodes = self.records.into_inner();
        episodes.sort_by_key(|r| r.index);
        ReplayReport { metrics, episodes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{EpisodeStatus, ReplayEpisode};
    use crate::EvalError;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn scored(index: usize, correct: bool, confidence: f64) -> EpisodeRecord {
        let episode = ReplayEpisode::new(format!("e{}", index), "resp_001", index as u64);
        let mut record = EpisodeRecord::failed(index, &episode, &EvalError::report("unused"));
        record.status = EpisodeStatus::Scored;
        record.failure_reason = None;
        record.diagnosis_correct = correct;
        record.confidence = confidence;
        record.safety_compliant = true;
        record.turns_to_diagnosis = 3;
        record.key_test_hit_rate = 1.0;
        record.over_testing_rate = 0.5;
        record
    }

    #[test]
    fn test_empty_accumulator() {
        let metrics = MetricsAccumulator::new().metrics();
        assert_eq!(metrics, ReplayMetrics::default());
    }

    #[test]
    fn test_failed_episodes_do_not_dilute_rates() {
        let acc = MetricsAccumulator::new();
        acc.record(scored(0, true, 0.8));
        acc.record(scored(1, false, 0.4));
        let episode = ReplayEpisode::new("broken", "resp_001", 2);
        acc.record(EpisodeRecord::failed(2, &episode, &EvalError::episode("broken", "bad probe")));

        let m = acc.metrics();
        assert_eq!(m.episodes, 3);
        assert_eq!(m.scored, 2);
        assert_eq!(m.failed, 1);
        assert_eq!(m.diagnosis_accuracy, 0.5);
        assert!((m.mean_confidence - 0.6).abs() < 1e-9);
        assert_eq!(m.safety_compliance, 1.0);
        assert_eq!(m.mean_turns_to_diagnosis, 3.0);
        assert_eq!(m.over_testing_rate, 0.5);
    }

    #[test]
    fn test_report_is_sorted_by_index() {
        let acc = MetricsAccumulator::new();
        for i in [3, 0, 2, 1] {
            acc.record(scored(i, true, 1.0));
        }
        let indices: Vec<usize> = acc.into_report().episodes.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let acc = Arc::new(MetricsAccumulator::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let acc = Arc::clone(&acc);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        acc.record(scored(t * 50 + i, i % 2 == 0, 0.25));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let m = acc.metrics();
        assert_eq!(m.scored, 400);
        assert_eq!(m.diagnosis_accuracy, 0.5);
        assert!((m.mean_confidence - 0.25).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn test_metrics_ignore_arrival_order(confidences in proptest::collection::vec(0.0f64..=1.0, 1..20)) {
            let forward = MetricsAccumulator::new();
            let backward = MetricsAccumulator::new();
            for (i, c) in confidences.iter().enumerate() {
                forward.record(scored(i, true, *c));
            }
            for (i, c) in confidences.iter().enumerate().rev() {
                backward.record(scored(i, true, *c));
            }
            prop_assert_eq!(forward.into_report(), backward.into_report());
        }
    }
}
