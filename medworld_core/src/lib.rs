//! MedWorld Core - Simulated Clinical Encounters
//!
//! This library runs diagnostic conversations against a hidden patient:
//! 1. **World model**: a case definition answers questions and tests, with
//!    seeded, layered observation noise
//! 2. **Orchestrator**: a per-session turn protocol that routes messages
//!    through triage, diagnosis and safety subagents
//! 3. **Safety override**: red-flag rules evaluated on ground truth that,
//!    once tripped, pin the session to the emergency pathway

pub mod catalog;
pub mod error;
pub mod knowledge;
pub mod noise;
pub mod orchestrator;
pub mod pathway;
pub mod perturbation;
pub mod safety;
pub mod sanitize;
pub mod session;
pub mod subagents;
pub mod tools;
pub mod world;

// Re-export key types for convenience
pub use catalog::{CaseCatalog, CaseDefinition, FactCondition, Predicate, ProbeRef, ProbeSpec, RedFlagRule};
pub use error::ClinicalError;
pub use knowledge::StaticGuidelineIndex;
pub use noise::NoiseProfile;
pub use orchestrator::{Orchestrator, OrchestratorConfig, StartSession, OVERRIDE_REASON};
pub use pathway::{PathwayProgress, PathwayStatus};
pub use perturbation::{Perturb, Perturbation};
pub use safety::{SafetyEvaluator, SafetyMode, SafetyOverride};
pub use session::{EvidenceLink, SessionSnapshot, SessionSummary, Turn, TurnDiagnosis};
pub use sanitize::SanitizerConfig;
pub use subagents::{
    default_subagents, FollowUp, ProfileDiagnostician, RuleTriage, ThresholdSafety, WorkupProtocol, UNDETERMINED,
};
pub use tools::ToolRegistry;
pub use world::{StepOutcome, WorldModel, WorldSnapshot};
