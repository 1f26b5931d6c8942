//! The clinical world model.
//!
//! Owns one session's hidden patient: the bound case, a single seeded RNG
//! and the probe log. Every `step` draws exactly one uniform sample to decide
//! corruption, plus whatever the corruption rule itself draws, always in the
//! same order, so a reset with the same seed replays bit-identically.

use crate::catalog::{normalize_probe_id, CaseCatalog, CaseDefinition, ProbeRef, ProbeSpec};
use crate::error::ClinicalError;
use crate::noise::NoiseProfile;
use crate::perturbation::Perturb;
use crate::safety::SafetyEvaluator;
use medworld_env::{ClinicalValue, ProbeKind, ProbeRecord};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub record: ProbeRecord,

    /// Whether the session's red-flag flag went from false to true
    pub red_flag_newly_triggered: bool,

    /// Rule ids that started holding on this probe
    pub newly_triggered_rules: Vec<String>,
}

/// Serializable view of a world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub case_id: String,
    pub seed: u64,
    pub presenting_symptoms: Vec<String>,
    pub probe_log: Vec<ProbeRecord>,
    pub red_flag_observed: bool,
    pub triggered_rules: Vec<String>,
}

/// Mutable state of a bound world.
struct WorldState {
    case: Arc<CaseDefinition>,
    seed: u64,
    rng: ChaCha8Rng,
    noise: NoiseProfile,
    probe_log: Vec<ProbeRecord>,
    issued: BTreeSet<ProbeRef>,
    triggered_rules: Vec<String>,
    red_flag_observed: bool,
}

/// World model: `UNINITIALIZED` until the first `reset`, `READY` after.
pub struct WorldModel {
    catalog: Arc<CaseCatalog>,

    /// Per-probe strategy overrides, keyed by normalized probe id
    strategies: HashMap<String, Arc<dyn Perturb>>,

    state: Option<WorldState>,
}

impl WorldModel {
    /// Creates an uninitialized world over a catalog.
    pub fn new(catalog: Arc<CaseCatalog>) -> Self {
        Self {
            catalog,
            strategies: HashMap::new(),
            state: None,
        }
    }

    /// Replaces the numeric perturbation strategy for one probe id.
    pub fn with_perturbation(mut self, probe_id: &str, strategy: Arc<dyn Perturb>) -> Self {
        self.strategies.insert(normalize_probe_id(probe_id), strategy);
        self
    }

    /// Binds a case and reseeds. Clears the probe log and red-flag state.
    pub fn reset(&mut self, case_id: &str, seed: u64, noise: NoiseProfile) -> Result<(), ClinicalError> {
        let case = self.catalog.get(case_id)?;
        debug!(case_id = %case.case_id, seed, "World reset");

        self.state = Some(WorldState {
            case,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise,
            probe_log: Vec::new(),
            issued: BTreeSet::new(),
            triggered_rules: Vec::new(),
            red_flag_observed: false,
        });
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    /// Issues one probe against the bound case.
    pub fn step(&mut self, kind: ProbeKind, probe_id: &str) -> Result<StepOutcome, ClinicalError> {
        let id = normalize_probe_id(probe_id);
        let custom = self.strategies.get(&id).cloned();
        let state = self.state.as_mut().ok_or(ClinicalError::WorldNotReady)?;

        let case = Arc::clone(&state.case);
        let spec = case.probe(kind, &id).ok_or_else(|| ClinicalError::UnknownProbe {
            case_id: case.case_id.clone(),
            kind,
            probe_id: id.clone(),
        })?;

        let p = state.noise.resolve(&case.case_id, kind, &id);
        let sample: f64 = state.rng.gen();
        let (observed, corrupted) = if sample < p {
            corrupt(spec, custom.as_deref(), &mut state.rng)
        } else {
            (spec.value.clone(), false)
        };

        state.issued.insert(ProbeRef {
            kind,
            id: id.clone(),
        });

        // Ground truth only: the observed value plays no part here
        let holding = SafetyEvaluator::holding_rules(&case, &state.issued);
        let newly_triggered_rules: Vec<String> = holding
            .iter()
            .filter(|rule| !state.triggered_rules.contains(&rule.id))
            .map(|rule| rule.id.clone())
            .collect();
        let red_flag_newly_triggered = !state.red_flag_observed && !holding.is_empty();
        state.red_flag_observed |= !holding.is_empty();
        state.triggered_rules.extend(newly_triggered_rules.iter().cloned());

        let record = ProbeRecord {
            sequence: state.probe_log.len() as u64,
            kind,
            probe_id: id,
            observed,
            corrupted,
            red_flag_triggered: !newly_triggered_rules.is_empty(),
        };
        state.probe_log.push(record.clone());

        debug!(
            case_id = %case.case_id,
            probe = %record.probe_id,
            kind = %kind,
            noise = p,
            corrupted,
            "Probe issued"
        );

        Ok(StepOutcome {
            record,
            red_flag_newly_triggered,
            newly_triggered_rules,
        })
    }

    /// The bound case.
    pub fn case(&self) -> Result<&Arc<CaseDefinition>, ClinicalError> {
        self.state
            .as_ref()
            .map(|s| &s.case)
            .ok_or(ClinicalError::WorldNotReady)
    }

    pub fn seed(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.seed)
    }

    pub fn noise(&self) -> Option<&NoiseProfile> {
        self.state.as_ref().map(|s| &s.noise)
    }

    /// All probes issued since the last reset, oldest first.
    pub fn probe_log(&self) -> &[ProbeRecord] {
        self.state.as_ref().map(|s| s.probe_log.as_slice()).unwrap_or(&[])
    }

    /// Red-flag rule ids observed so far, in trigger order.
    pub fn triggered_rules(&self) -> &[String] {
        self.state.as_ref().map(|s| s.triggered_rules.as_slice()).unwrap_or(&[])
    }

    pub fn red_flag_observed(&self) -> bool {
        self.state.as_ref().map(|s| s.red_flag_observed).unwrap_or(false)
    }

    /// Re-runs the safety evaluator over the issued probes.
    pub fn red_flag_present(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| SafetyEvaluator::evaluate(&s.case, &s.issued))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> Result<WorldSnapshot, ClinicalError> {
        let state = self.state.as_ref().ok_or(ClinicalError::WorldNotReady)?;
        Ok(WorldSnapshot {
            case_id: state.case.case_id.clone(),
            seed: state.seed,
            presenting_symptoms: state.case.presenting_symptoms.clone(),
            probe_log: state.probe_log.clone(),
            red_flag_observed: state.red_flag_observed,
            triggered_rules: state.triggered_rules.clone(),
        })
    }
}

impl std::fmt::Debug for WorldModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldModel")
            .field("case_id", &self.state.as_ref().map(|s| s.case.case_id.as_str()))
            .field("probes", &self.probe_log().len())
            .field("red_flag_observed", &self.red_flag_observed())
            .finish()
    }
}

/// Applies the probe's corruption rule.
///
/// A categorical probe without alternatives has nothing to substitute and
/// is returned unchanged (not marked corrupted).
fn corrupt(spec: &ProbeSpec, custom: Option<&dyn Perturb>, rng: &mut ChaCha8Rng) -> (ClinicalValue, bool) {
    match &spec.value {
        ClinicalValue::Categorical { .. } => {
            if spec.alternatives.is_empty() {
                return (spec.value.clone(), false);
            }
            let pick = rng.gen_range(0..spec.alternatives.len());
            (ClinicalValue::categorical(spec.alternatives[pick].clone()), true)
        }
        ClinicalValue::Numeric { value, unit } => {
            let delta = match custom {
                Some(strategy) => strategy.delta(*value, spec.severity, rng),
                None => spec.perturbation.delta(*value, spec.severity, rng),
            };
            (ClinicalValue::numeric(value + delta, unit.clone()), true)
        }
    }
}
