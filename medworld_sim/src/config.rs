//! Replay run configuration.

use crate::error::EvalError;
use crate::gate::QualityThresholds;
use medworld_core::{NoiseProfile, OrchestratorConfig};
use serde::{Deserialize, Serialize};

/// Everything a replay run needs besides the episodes themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Master seed
    pub seed: u64,

    /// Episodes kept in flight at once
    pub concurrency: usize,

    pub noise: NoiseProfile,
    pub orchestrator: OrchestratorConfig,
    pub thresholds: QualityThresholds,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            concurrency: 4,
            noise: NoiseProfile::none(),
            orchestrator: OrchestratorConfig::default(),
            thresholds: QualityThresholds::default(),
        }
    }
}

impl ReplayConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_noise(mut self, noise: NoiseProfile) -> Self {
        self.noise = noise;
        self
    }

    /// Parses and validates a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, EvalError> {
        let config: ReplayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EvalError> {
        self.noise.validate()?;
        self.orchestrator.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ReplayConfig::from_json(r#"{"seed": 7, "noise": {"default": 0.2}}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.noise, NoiseProfile::uniform(0.2));
        assert_eq!(config.thresholds, QualityThresholds::default());
    }

    #[test]
    fn test_out_of_range_noise_is_rejected() {
        let err = ReplayConfig::from_json(r#"{"noise": {"default": 1.5}}"#).unwrap_err();
        assert!(matches!(err, EvalError::Clinical(_)));
    }
}
