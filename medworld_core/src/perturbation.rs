//! Numeric perturbation strategies.
//!
//! A corrupted numeric reading is `canonical + delta`. Every strategy is
//! bounded by the probe's severity and draws only from the session RNG it is
//! handed, so a replay with the same seed reproduces the same deltas.

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Produces the signed delta applied to a corrupted numeric reading.
pub trait Perturb: Send + Sync {
    fn delta(&self, value: f64, severity: f64, rng: &mut dyn RngCore) -> f64;
}

/// Built-in strategies, selectable per probe in a case document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perturbation {
    /// Magnitude uniform in [0.25, 1] x severity, random sign
    #[default]
    BoundedUniform,

    /// Magnitude uniform in [0.05, 0.25] x severity x |value|, random sign
    Proportional,

    /// N(0, severity / 2) clamped to +/- severity
    TruncatedNormal,
}

impl Perturbation {
    /// Returns the strategy name used in case documents.
    pub fn name(&self) -> &'static str {
        match self {
            Perturbation::BoundedUniform => "bounded_uniform",
            Perturbation::Proportional => "proportional",
            Perturbation::TruncatedNormal => "truncated_normal",
        }
    }

    /// Largest |delta| this strategy can produce.
    pub fn bound(&self, value: f64, severity: f64) -> f64 {
        match self {
            Perturbation::BoundedUniform | Perturbation::TruncatedNormal => severity,
            Perturbation::Proportional => 0.25 * severity * scale_of(value),
        }
    }
}

impl Perturb for Perturbation {
    fn delta(&self, value: f64, severity: f64, rng: &mut dyn RngCore) -> f64 {
        match self {
            Perturbation::BoundedUniform => {
                let magnitude = rng.gen_range(0.25..=1.0) * severity;
                signed(magnitude, rng)
            }
            Perturbation::Proportional => {
                let magnitude = rng.gen_range(0.05..=0.25) * severity * scale_of(value);
                signed(magnitude, rng)
            }
            Perturbation::TruncatedNormal => {
                let sigma = severity / 2.0;
                let sample = match Normal::new(0.0, sigma) {
                    Ok(normal) => normal.sample(rng),
                    Err(_) => 0.0,
                };
                let clamped = sample.clamp(-severity, severity);
                if clamped == 0.0 {
                    sigma
                } else {
                    clamped
                }
            }
        }
    }
}

impl std::fmt::Display for Perturbation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn signed(magnitude: f64, rng: &mut dyn RngCore) -> f64 {
    if rng.gen_bool(0.5) {
        magnitude
    } else {
        -magnitude
    }
}

/// A reading of zero still gets a unit-scale delta.
fn scale_of(value: f64) -> f64 {
    if value.abs() < f64::EPSILON {
        1.0
    } else {
        value.abs()
    }
}
