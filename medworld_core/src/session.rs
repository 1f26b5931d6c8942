//! Session records: turns, summaries and snapshots.

use crate::error::ClinicalError;
use crate::noise::NoiseProfile;
use crate::pathway::{PathwayProgress, PathwayStatus};
use crate::safety::{SafetyMode, SafetyOverride};
use crate::sanitize::{sanitize_demographics, SanitizerConfig};
use crate::world::{WorldModel, WorldSnapshot};
use medworld_env::{ProbeRecord, SessionId, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A guideline reference attached to a diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLink {
    pub guideline_id: String,
    pub title: String,
    pub source: String,
    pub score: f64,

    /// Observations that support the diagnosis, e.g. `test:ecg=...`
    pub supporting: Vec<String>,
}

/// Diagnostic subagent output as recorded on a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDiagnosis {
    pub label: String,
    /// Always in [0, 1]
    pub confidence: f64,
    pub evidence: Vec<String>,
}

/// One immutable entry of a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub index: usize,
    pub user_message: String,

    /// Tool call handled this turn; a refused call is kept but never executed
    pub tool: Option<ToolCall>,
    pub observation: Option<ProbeRecord>,
    pub tool_error: Option<String>,

    pub reply: String,
    pub diagnosis: Option<TurnDiagnosis>,
    pub evidence_chain: Vec<EvidenceLink>,
    pub plan: Option<String>,

    pub escalate_to_human: bool,
    pub refusal: bool,
    pub refusal_reason: Option<String>,

    /// Set on the turn where the emergency override tripped
    pub safety_triggered: bool,
    pub safety_mode: SafetyMode,

    /// Red-flag rules observed in the session as of this turn
    pub red_flags: Vec<String>,
}

impl Turn {
    pub(crate) fn new(user_message: &str, safety_mode: SafetyMode) -> Self {
        Self {
            index: 0,
            user_message: user_message.to_string(),
            tool: None,
            observation: None,
            tool_error: None,
            reply: String::new(),
            diagnosis: None,
            evidence_chain: Vec::new(),
            plan: None,
            escalate_to_human: false,
            refusal: false,
            refusal_reason: None,
            safety_triggered: false,
            safety_mode,
            red_flags: Vec::new(),
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        self.diagnosis.as_ref().map(|d| d.confidence)
    }

    pub(crate) fn refuse(&mut self, reason: impl Into<String>) {
        self.refusal = true;
        self.refusal_reason = Some(reason.into());
    }
}

/// Listing entry for a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub case_id: String,
    pub seed: u64,
    pub turn_count: usize,
    pub safety_mode: SafetyMode,
    /// Creation order within the orchestrator
    pub ordinal: u64,
}

/// Raw state of a session with demographics de-identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub world: WorldSnapshot,
    pub demographics: BTreeMap<String, serde_json::Value>,
    pub noise: NoiseProfile,
    pub safety_mode: SafetyMode,
    pub safety_tripped_at: Option<usize>,
    pub pathway: PathwayStatus,
    pub turn_count: usize,
}

/// Per-session arena: the world model, the append-only turn history, the
/// pathway pointer and the safety state machine.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    ordinal: u64,
    world: WorldModel,
    turns: Vec<Turn>,
    pathway: PathwayProgress,
    safety: SafetyOverride,
}

impl Session {
    /// Wraps a world that has already been reset.
    pub(crate) fn new(id: SessionId, ordinal: u64, world: WorldModel) -> Result<Self, ClinicalError> {
        let pathway = PathwayProgress::for_case(world.case()?);
        Ok(Self {
            id,
            ordinal,
            world,
            turns: Vec::new(),
            pathway,
            safety: SafetyOverride::default(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn case_id(&self) -> &str {
        self.world.case().map(|c| c.case_id.as_str()).unwrap_or_default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    pub(crate) fn world_mut(&mut self) -> &mut WorldModel {
        &mut self.world
    }

    pub fn safety(&self) -> &SafetyOverride {
        &self.safety
    }

    pub(crate) fn safety_mut(&mut self) -> &mut SafetyOverride {
        &mut self.safety
    }

    pub fn pathway(&self) -> &PathwayProgress {
        &self.pathway
    }

    pub(crate) fn pathway_mut(&mut self) -> &mut PathwayProgress {
        &mut self.pathway
    }

    /// Index the next appended turn will get.
    pub fn next_index(&self) -> usize {
        self.turns.len()
    }

    /// The only way a turn enters the history.
    pub(crate) fn append_turn(&mut self, mut turn: Turn) -> &Turn {
        turn.index = self.turns.len();
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            case_id: self.case_id().to_string(),
            seed: self.world.seed().unwrap_or_default(),
            turn_count: self.turns.len(),
            safety_mode: self.safety.mode(),
            ordinal: self.ordinal,
        }
    }

    pub fn snapshot(&self, sanitizer: &SanitizerConfig) -> Result<SessionSnapshot, ClinicalError> {
        let case = self.world.case()?;
        Ok(SessionSnapshot {
            session_id: self.id,
            world: self.world.snapshot()?,
            demographics: sanitize_demographics(&case.demographics, sanitizer),
            noise: self.world.noise().cloned().unwrap_or_default(),
            safety_mode: self.safety.mode(),
            safety_tripped_at: self.safety.tripped_at(),
            pathway: self.pathway.status(),
            turn_count: self.turns.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CaseCatalog;
    use std::sync::Arc;

    fn session(case_id: &str) -> Session {
        let mut world = WorldModel::new(Arc::new(CaseCatalog::builtin().unwrap()));
        world.reset(case_id, 21, NoiseProfile::none()).unwrap();
        Session::new(SessionId::from_seed(21), 0, world).unwrap()
    }

    #[test]
    fn test_append_assigns_indices() {
        let mut s = session("resp_001");
        let mut first = Turn::new("a", SafetyMode::Normal);
        first.index = 99;
        assert_eq!(s.append_turn(first).index, 0);
        assert_eq!(s.append_turn(Turn::new("b", SafetyMode::Normal)).index, 1);
        assert_eq!(s.turns().len(), 2);
        assert_eq!(s.summary().turn_count, 2);
    }

    #[test]
    fn test_snapshot_sanitizes_demographics() {
        let s = session("chest_pain_001");
        let snap = s.snapshot(&SanitizerConfig::default()).unwrap();
        assert_eq!(snap.demographics["age"], serde_json::json!("50-59"));
        assert!(!snap.demographics.contains_key("name"));
        assert!(!snap.demographics.contains_key("phone"));
        assert_eq!(snap.world.case_id, "chest_pain_001");
        assert_eq!(snap.pathway.total, 3);
        assert_eq!(snap.safety_mode, SafetyMode::Normal);
    }

    #[test]
    fn test_uninitialized_world_rejected() {
        let world = WorldModel::new(Arc::new(CaseCatalog::builtin().unwrap()));
        let err = Session::new(SessionId::new(), 0, world).unwrap_err();
        assert_eq!(err, ClinicalError::WorldNotReady);
    }
}
