//! Session store and the per-turn protocol.
//!
//! ```text
//! RECEIVE_INPUT ──► SAFETY_CHECK ──┬──► EMERGENCY_OVERRIDE ───────────────┐
//!                                  │                                       ▼
//!                                  └──► SUBAGENT_DISPATCH ──► TOOL_EXECUTION ──► RESPONSE_ASSEMBLY ──► APPEND_TURN
//! ```
//!
//! Sessions live in a `DashMap` keyed by id, each behind its own async
//! mutex, so one turn at a time runs per session while distinct sessions
//! proceed concurrently. A shard guard is never held across an await.

use crate::catalog::{CaseCatalog, CaseDefinition, ProbeRef};
use crate::error::ClinicalError;
use crate::knowledge::StaticGuidelineIndex;
use crate::noise::NoiseProfile;
use crate::pathway::PathwayStatus;
use crate::perturbation::Perturb;
use crate::safety::SafetyMode;
use crate::sanitize::SanitizerConfig;
use crate::session::{EvidenceLink, Session, SessionSnapshot, SessionSummary, Turn, TurnDiagnosis};
use crate::subagents::default_subagents;
use crate::tools::ToolRegistry;
use crate::world::WorldModel;
use dashmap::DashMap;
use medworld_env::{
    DiagnosisDecision, DiagnosticRequest, GuidelineEvidence, KnowledgeRetriever, SafetyRequest,
    SafetyVerdict, SessionId, Subagents, TimedRetriever, ToolCall, ToolKind, TriageDecision,
    TriageRequest,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Reason recorded on probes refused under the emergency override.
pub const OVERRIDE_REASON: &str = "active safety override";

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Guideline references attached per diagnosis (1..=20)
    pub evidence_top_k: usize,

    /// Diagnoses below this confidence are refused
    pub min_confidence: f64,

    /// Longest accepted user message, in characters
    pub max_message_len: usize,

    pub max_sessions: usize,

    /// Deadline for one retrieval call
    pub retrieval_timeout_ms: u64,

    pub sanitizer: SanitizerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            evidence_top_k: 3,
            min_confidence: 0.35,
            max_message_len: 2000,
            max_sessions: 100,
            retrieval_timeout_ms: 2000,
            sanitizer: SanitizerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_evidence_top_k(mut self, top_k: usize) -> Self {
        self.evidence_top_k = top_k;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ClinicalError> {
        if !(1..=20).contains(&self.evidence_top_k) {
            return Err(ClinicalError::invalid(format!(
                "evidence_top_k must be within 1..=20, got {}",
                self.evidence_top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ClinicalError::invalid("min_confidence must be within [0, 1]"));
        }
        if self.max_sessions == 0 {
            return Err(ClinicalError::invalid("max_sessions must be at least 1"));
        }
        Ok(())
    }
}

/// Session start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSession {
    pub case_id: String,

    /// Drawn from OS entropy when absent; the drawn seed is recorded
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub noise: NoiseProfile,
}

impl StartSession {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            seed: None,
            noise: NoiseProfile::none(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_noise(mut self, noise: NoiseProfile) -> Self {
        self.noise = noise;
        self
    }
}

/// Owns every live session and drives turns through the subagents.
pub struct Orchestrator {
    catalog: Arc<CaseCatalog>,
    subagents: Subagents,
    custom_subagents: bool,
    retriever: Arc<dyn KnowledgeRetriever>,
    registry: ToolRegistry,
    strategies: Vec<(String, Arc<dyn Perturb>)>,
    config: OrchestratorConfig,

    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    live: AtomicUsize,
    next_ordinal: AtomicU64,
}

impl Orchestrator {
    /// Creates an orchestrator with the rule-based subagents and the
    /// built-in guideline index.
    pub fn new(catalog: Arc<CaseCatalog>) -> Self {
        let config = OrchestratorConfig::default();
        Self {
            subagents: default_subagents(&catalog, config.min_confidence),
            custom_subagents: false,
            retriever: Arc::new(StaticGuidelineIndex::builtin()),
            registry: ToolRegistry::clinical(),
            strategies: Vec::new(),
            config,
            sessions: DashMap::new(),
            live: AtomicUsize::new(0),
            next_ordinal: AtomicU64::new(0),
            catalog,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        if !self.custom_subagents {
            self.subagents = default_subagents(&self.catalog, config.min_confidence);
        }
        self.config = config;
        self
    }

    pub fn with_subagents(mut self, subagents: Subagents) -> Self {
        self.subagents = subagents;
        self.custom_subagents = true;
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Installs a numeric perturbation strategy for one probe id in every
    /// session started afterwards.
    pub fn with_perturbation(mut self, probe_id: &str, strategy: Arc<dyn Perturb>) -> Self {
        self.strategies.push((probe_id.to_string(), strategy));
        self
    }

    pub fn catalog(&self) -> &Arc<CaseCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Starts a session bound to one case.
    pub fn start_session(&self, request: StartSession) -> Result<SessionId, ClinicalError> {
        self.config.validate()?;
        request.noise.validate()?;

        let seed = request.seed.unwrap_or_else(|| rand::rngs::OsRng.next_u64());
        let mut world = self
            .strategies
            .iter()
            .fold(WorldModel::new(Arc::clone(&self.catalog)), |world, (id, strategy)| {
                world.with_perturbation(id, Arc::clone(strategy))
            });
        world.reset(&request.case_id, seed, request.noise.normalized())?;

        let id = SessionId::new();
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::SeqCst);
        let session = Session::new(id, ordinal, world)?;

        let max = self.config.max_sessions;
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .map_err(|_| ClinicalError::SessionLimitReached(max))?;
        self.sessions.insert(id, Arc::new(Mutex::new(session)));

        info!(session_id = %id, case_id = %request.case_id, seed, "Session started");
        Ok(id)
    }

    /// Runs one free-text turn through the triage subagent.
    pub async fn execute_turn(&self, id: SessionId, message: &str) -> Result<Turn, ClinicalError> {
        let length = message.chars().count();
        if length > self.config.max_message_len {
            return Err(ClinicalError::invalid(format!(
                "message is {} characters, limit is {}",
                length, self.config.max_message_len
            )));
        }

        let handle = self.handle(id)?;
        let mut session = handle.lock().await;

        let decision = {
            let world = session.world();
            let case = world.case()?;
            let prior_calls: Vec<ToolCall> = session.turns().iter().filter_map(|t| t.tool.clone()).collect();
            self.subagents.triage.route(&TriageRequest {
                message,
                prior_calls: &prior_calls,
                presenting_symptoms: &case.presenting_symptoms,
                probe_log: world.probe_log(),
            })
        };

        self.run_turn(&mut session, message, decision).await
    }

    /// Runs one scripted tool call, bypassing triage.
    pub async fn execute_tool(&self, id: SessionId, call: ToolCall) -> Result<Turn, ClinicalError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        let message = call.to_string();
        self.run_turn(&mut session, &message, TriageDecision::Tool { call }).await
    }

    pub async fn turns(&self, id: SessionId) -> Result<Vec<Turn>, ClinicalError> {
        let handle = self.handle(id)?;
        let session = handle.lock().await;
        Ok(session.turns().to_vec())
    }

    pub async fn pathway(&self, id: SessionId) -> Result<PathwayStatus, ClinicalError> {
        let handle = self.handle(id)?;
        let session = handle.lock().await;
        Ok(session.pathway().status())
    }

    pub async fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, ClinicalError> {
        let handle = self.handle(id)?;
        let session = handle.lock().await;
        session.snapshot(&self.config.sanitizer)
    }

    /// Live sessions, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let handles: Vec<Arc<Mutex<Session>>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.lock().await.summary());
        }
        summaries.sort_by_key(|s| s.ordinal);
        summaries
    }

    /// Removes a session and frees its slot.
    pub async fn end_session(&self, id: SessionId) -> Result<SessionSummary, ClinicalError> {
        let (_, handle) = self
            .sessions
            .remove(&id)
            .ok_or_else(|| ClinicalError::SessionNotFound(id.to_string()))?;
        self.live.fetch_sub(1, Ordering::SeqCst);

        let summary = handle.lock().await.summary();
        info!(session_id = %id, case_id = %summary.case_id, turns = summary.turn_count, "Session ended");
        Ok(summary)
    }

    fn handle(&self, id: SessionId) -> Result<Arc<Mutex<Session>>, ClinicalError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ClinicalError::SessionNotFound(id.to_string()))
    }

    async fn run_turn(
        &self,
        session: &mut Session,
        message: &str,
        decision: TriageDecision,
    ) -> Result<Turn, ClinicalError> {
        let index = session.next_index();
        let case = Arc::clone(session.world().case()?);

        // SAFETY_CHECK runs on ground truth before anything executes
        let tripped = session.world().red_flag_present() && session.safety_mut().trip(index);
        if tripped {
            warn!(session_id = %session.id(), case_id = %case.case_id, turn = index, "Safety override tripped");
        }

        let mut turn = Turn::new(message, session.safety().mode());
        if session.safety().is_active() {
            self.emergency(&case, &mut turn, decision, tripped);
        } else {
            match decision {
                TriageDecision::DirectResponse { reply } => turn.reply = reply,
                TriageDecision::Tool { call } => self.dispatch(session, &case, &mut turn, index, call).await?,
            }
        }

        turn.red_flags = session.world().triggered_rules().to_vec();
        let turn = session.append_turn(turn).clone();
        debug!(
            session_id = %session.id(),
            turn = turn.index,
            tool = ?turn.tool.as_ref().map(|c| c.name.as_str()),
            escalate = turn.escalate_to_human,
            refusal = turn.refusal,
            "Turn appended"
        );
        Ok(turn)
    }

    /// EMERGENCY_OVERRIDE: subagent reasoning is skipped entirely.
    fn emergency(&self, case: &CaseDefinition, turn: &mut Turn, decision: TriageDecision, tripped: bool) {
        turn.escalate_to_human = true;
        turn.safety_triggered = tripped;
        turn.safety_mode = SafetyMode::Emergency;
        turn.plan = Some(case.emergency_pathway.clone());

        if tripped {
            turn.tool = Some(ToolCall::recommend_plan());
            turn.reply = format!("Red flag present. {}", case.emergency_pathway);
            return;
        }

        match decision {
            TriageDecision::Tool { call } if call.kind() == Some(ToolKind::RecommendPlan) => {
                turn.tool = Some(call);
                turn.reply = format!("Emergency pathway in effect. {}", case.emergency_pathway);
            }
            TriageDecision::Tool { call } => {
                let conflict = ClinicalError::SafetyOverrideConflict(call.to_string());
                debug!(%conflict, "Refusing call under override");
                turn.reply = conflict.to_string();
                turn.tool = Some(call);
                turn.refuse(OVERRIDE_REASON);
            }
            TriageDecision::DirectResponse { reply } => turn.reply = reply,
        }
    }

    /// SUBAGENT_DISPATCH and TOOL_EXECUTION on the normal path.
    async fn dispatch(
        &self,
        session: &mut Session,
        case: &CaseDefinition,
        turn: &mut Turn,
        index: usize,
        call: ToolCall,
    ) -> Result<(), ClinicalError> {
        let Some(kind) = self.registry.resolve(&call) else {
            let verdict = self.subagents.safety.review(&SafetyRequest {
                requested_tool: &call,
                tool_registered: false,
                decision: None,
            });
            match verdict {
                SafetyVerdict::Refuse { reason } => turn.refuse(reason),
                SafetyVerdict::Allow => turn.tool_error = Some(format!("no handler for tool '{}'", call.name)),
            }
            turn.tool = Some(call);
            return Ok(());
        };

        let Some(probe_kind) = kind.probe_kind() else {
            self.recommend(session, case, turn, call).await;
            return Ok(());
        };

        let probe_id = call.probe_id().map(str::to_string);
        turn.tool = Some(call);
        let Some(probe_id) = probe_id else {
            let err = ClinicalError::invalid(format!(
                "{} requires a '{}' argument",
                kind,
                kind.argument_key().unwrap_or("probe")
            ));
            turn.tool_error = Some(err.to_string());
            return Ok(());
        };

        match session.world_mut().step(probe_kind, &probe_id) {
            Ok(outcome) => {
                session.pathway_mut().record(&ProbeRef::new(probe_kind, &probe_id));
                turn.reply = format!("{} {}: {}", probe_kind, outcome.record.probe_id, outcome.record.observed);
                turn.observation = Some(outcome.record);

                // A probe that exposes a red flag escalates its own turn
                if outcome.red_flag_newly_triggered && session.safety_mut().trip(index) {
                    warn!(
                        session_id = %session.id(),
                        case_id = %case.case_id,
                        rules = ?outcome.newly_triggered_rules,
                        "Safety override tripped"
                    );
                    turn.escalate_to_human = true;
                    turn.safety_triggered = true;
                    turn.safety_mode = SafetyMode::Emergency;
                    turn.plan = Some(case.emergency_pathway.clone());
                }
            }
            Err(err @ ClinicalError::UnknownProbe { .. }) => {
                warn!(session_id = %session.id(), error = %err, "Tool error");
                turn.tool_error = Some(err.to_string());
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Diagnosis, safety review and evidence for `recommend_plan`.
    async fn recommend(&self, session: &Session, case: &CaseDefinition, turn: &mut Turn, call: ToolCall) {
        let raw = self.subagents.diagnostic.diagnose(&DiagnosticRequest {
            presenting_symptoms: &case.presenting_symptoms,
            probe_log: session.world().probe_log(),
        });
        let decision = DiagnosisDecision {
            confidence: clamp_confidence(raw.confidence),
            ..raw
        };

        let verdict = self.subagents.safety.review(&SafetyRequest {
            requested_tool: &call,
            tool_registered: true,
            decision: Some(&decision),
        });

        let hits = if decision.evidence.is_empty() {
            Vec::new()
        } else {
            self.retrieve(&decision.label).await
        };
        turn.evidence_chain = evidence_chain(&hits, &decision.evidence);

        match verdict {
            SafetyVerdict::Allow => {
                turn.reply = format!(
                    "Working diagnosis: {} (confidence {:.2})",
                    decision.label, decision.confidence
                );
                turn.plan = decision.plan.clone();
            }
            SafetyVerdict::Refuse { reason } => {
                turn.reply = format!("No recommendation: {}", reason);
                turn.refuse(reason);
            }
        }
        turn.tool = Some(call);
        turn.diagnosis = Some(TurnDiagnosis {
            label: decision.label,
            confidence: decision.confidence,
            evidence: decision.evidence,
        });
    }

    /// Degrades to no evidence on timeout or collaborator failure.
    async fn retrieve(&self, label: &str) -> Vec<GuidelineEvidence> {
        let top_k = self.config.evidence_top_k;
        let timed = TimedRetriever::new(Arc::clone(&self.retriever), self.config.retrieval_timeout());
        match timed.rank_evidence(label, top_k).await {
            Ok(mut hits) => {
                hits.truncate(top_k);
                hits
            }
            Err(err) => {
                warn!(error = %err, label, "Evidence retrieval degraded");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("cases", &self.catalog.len())
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Empty when either side is empty.
fn evidence_chain(hits: &[GuidelineEvidence], supporting: &[String]) -> Vec<EvidenceLink> {
    if supporting.is_empty() {
        return Vec::new();
    }
    hits.iter()
        .map(|hit| EvidenceLink {
            guideline_id: hit.guideline_id.clone(),
            title: hit.title.clone(),
            source: hit.source.clone(),
            score: hit.score,
            supporting: supporting.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use medworld_env::{DiagnosticAgent, EnvError, ProbeKind};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(CaseCatalog::builtin().unwrap()))
    }

    fn start(orch: &Orchestrator, case_id: &str, seed: u64, noise: f64) -> SessionId {
        orch.start_session(
            StartSession::new(case_id)
                .with_seed(seed)
                .with_noise(NoiseProfile::uniform(noise)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_st_elevation_escalates_first_turn() {
        for noise in [0.0, 0.5, 1.0] {
            let orch = orchestrator();
            let id = start(&orch, "chest_pain_001", 7, noise);
            let turn = orch.execute_tool(id, ToolCall::order_test("ecg")).await.unwrap();

            assert_eq!(turn.index, 0);
            assert!(turn.escalate_to_human);
            assert!(turn.safety_triggered);
            assert!(turn.observation.is_some());
            assert!(!turn.refusal);
            let case = orch.catalog().get("chest_pain_001").unwrap();
            assert_eq!(turn.plan.as_deref(), Some(case.emergency_pathway.as_str()));
        }
    }

    #[tokio::test]
    async fn test_override_is_sticky() {
        let orch = orchestrator();
        let id = start(&orch, "chest_pain_001", 7, 0.0);
        orch.execute_tool(id, ToolCall::order_test("ecg")).await.unwrap();

        let probe = orch.execute_tool(id, ToolCall::order_test("troponin")).await.unwrap();
        assert!(probe.escalate_to_human);
        assert!(probe.refusal);
        assert_eq!(probe.refusal_reason.as_deref(), Some(OVERRIDE_REASON));
        assert!(probe.observation.is_none());
        assert!(!probe.safety_triggered);

        let question = orch.execute_turn(id, "ask onset").await.unwrap();
        assert!(question.escalate_to_human && question.refusal);

        let plan = orch.execute_tool(id, ToolCall::recommend_plan()).await.unwrap();
        assert!(plan.escalate_to_human);
        assert!(!plan.refusal);
        assert!(plan.diagnosis.is_none());
        assert_eq!(plan.safety_mode, SafetyMode::Emergency);

        let chat = orch.execute_turn(id, "help").await.unwrap();
        assert!(chat.escalate_to_human);

        // Refused probes never reached the world
        let snapshot = orch.snapshot(id).await.unwrap();
        assert_eq!(snapshot.world.probe_log.len(), 1);
        assert_eq!(snapshot.safety_tripped_at, Some(0));
    }

    #[tokio::test]
    async fn test_turns_carry_observed_red_flags() {
        let orch = orchestrator();
        let id = start(&orch, "chest_pain_001", 7, 1.0);

        let ecg = orch.execute_tool(id, ToolCall::order_test("ecg")).await.unwrap();
        assert_eq!(ecg.red_flags, vec!["st_elevation".to_string()]);

        let refused = orch.execute_tool(id, ToolCall::order_test("troponin")).await.unwrap();
        assert_eq!(refused.red_flags, vec!["st_elevation".to_string()]);
        let plan = orch.execute_tool(id, ToolCall::recommend_plan()).await.unwrap();
        assert_eq!(plan.red_flags, vec!["st_elevation".to_string()]);

        let quiet = start(&orch, "resp_001", 7, 0.0);
        let cbc = orch.execute_tool(quiet, ToolCall::order_test("cbc")).await.unwrap();
        assert!(cbc.red_flags.is_empty());
    }

    #[tokio::test]
    async fn test_session_noise_keys_are_normalized() {
        let orch = orchestrator();
        let noise: NoiseProfile = serde_json::from_str(r#"{ "test": { " ECG ": 1.0 } }"#).unwrap();
        let id = orch
            .start_session(StartSession::new("chest_pain_001").with_seed(3).with_noise(noise))
            .unwrap();

        let snapshot = orch.snapshot(id).await.unwrap();
        assert_eq!(snapshot.noise.test.get("ecg"), Some(&1.0));
        assert_eq!(snapshot.noise.resolve("chest_pain_001", ProbeKind::Test, "ecg"), 1.0);
    }

    #[test]
    fn test_config_loads_from_json() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{ "evidence_top_k": 5, "retrieval_timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.evidence_top_k, 5);
        assert_eq!(config.retrieval_timeout(), Duration::from_millis(250));
        assert_eq!(config.min_confidence, OrchestratorConfig::default().min_confidence);
        assert_eq!(OrchestratorConfig::default().retrieval_timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unknown_probe_is_tool_error() {
        let orch = orchestrator();
        let id = start(&orch, "resp_001", 1, 0.0);
        let turn = orch.execute_tool(id, ToolCall::order_test("mri")).await.unwrap();
        assert!(turn.tool_error.as_deref().unwrap().contains("mri"));
        assert!(!turn.refusal);

        let next = orch.execute_tool(id, ToolCall::order_test("cbc")).await.unwrap();
        assert_eq!(next.index, 1);
        assert!(next.tool_error.is_none());
    }

    #[tokio::test]
    async fn test_missing_probe_argument() {
        let orch = orchestrator();
        let id = start(&orch, "resp_001", 1, 0.0);
        let turn = orch.execute_tool(id, ToolCall::new("order_test")).await.unwrap();
        assert!(turn.tool_error.as_deref().unwrap().contains("'test'"));
    }

    #[tokio::test]
    async fn test_client_errors() {
        let orch = orchestrator();
        let err = orch.start_session(StartSession::new("nope")).unwrap_err();
        assert_eq!(err, ClinicalError::UnknownCase("nope".to_string()));
        assert_eq!(orch.session_count(), 0);

        let ghost = SessionId::new();
        let err = orch.execute_turn(ghost, "hi").await.unwrap_err();
        assert!(matches!(err, ClinicalError::SessionNotFound(_)));
        assert!(orch.end_session(ghost).await.is_err());

        let id = start(&orch, "resp_001", 1, 0.0);
        let long = "x".repeat(2001);
        assert!(matches!(
            orch.execute_turn(id, &long).await.unwrap_err(),
            ClinicalError::InvalidInput(_)
        ));

        let bad_noise = StartSession::new("resp_001").with_noise(NoiseProfile::uniform(1.5));
        assert!(matches!(orch.start_session(bad_noise), Err(ClinicalError::InvalidInput(_))));

        let bad_config = orchestrator().with_config(OrchestratorConfig::default().with_evidence_top_k(0));
        assert!(bad_config.start_session(StartSession::new("resp_001")).is_err());
    }

    #[tokio::test]
    async fn test_triage_driven_workup() {
        let orch = orchestrator();
        let id = start(&orch, "resp_001", 3, 0.0);

        let first = orch.execute_turn(id, "what next?").await.unwrap();
        assert_eq!(first.tool, Some(ToolCall::order_test("cbc")));
        let second = orch.execute_turn(id, "and then?").await.unwrap();
        assert_eq!(second.tool, Some(ToolCall::order_test("chest_xray")));

        let plan = orch.execute_turn(id, "recommend a plan").await.unwrap();
        let diagnosis = plan.diagnosis.clone().unwrap();
        assert_eq!(diagnosis.label, "community-acquired pneumonia");
        approx::assert_relative_eq!(diagnosis.confidence, 1.0);
        assert!(!plan.refusal);
        assert!(!plan.escalate_to_human);
        assert_eq!(plan.evidence_chain[0].guideline_id, "cap-001");
        assert_eq!(plan.evidence_chain[0].supporting.len(), 2);
        assert!(plan.evidence_chain.len() <= 3);

        let pathway = orch.pathway(id).await.unwrap();
        assert_eq!(pathway.completed, vec!["cbc", "chest_xray"]);
        assert_eq!(pathway.pointer, None);
    }

    #[tokio::test]
    async fn test_low_confidence_is_refused() {
        let orch = orchestrator();
        let id = start(&orch, "resp_001", 3, 0.0);
        let turn = orch.execute_tool(id, ToolCall::recommend_plan()).await.unwrap();
        assert!(turn.refusal);
        assert!(!turn.escalate_to_human);
        assert_eq!(turn.confidence(), Some(0.0));
        assert!(turn.evidence_chain.is_empty());
        assert!(turn.plan.is_none());
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_refused() {
        let orch = orchestrator();
        let id = start(&orch, "resp_001", 3, 0.0);
        let turn = orch
            .execute_tool(id, ToolCall::new("prescribe").with_arg("drug", "amoxicillin"))
            .await
            .unwrap();
        assert!(turn.refusal);
        assert!(turn.refusal_reason.unwrap().contains("capability"));

        let narrow = orchestrator().with_registry(ToolRegistry::new([ToolKind::RecommendPlan]));
        let id = start(&narrow, "resp_001", 3, 0.0);
        let turn = narrow.execute_tool(id, ToolCall::order_test("cbc")).await.unwrap();
        assert!(turn.refusal);
        assert!(turn.observation.is_none());
    }

    #[tokio::test]
    async fn test_repeated_order_draws_each_time() {
        let orch = orchestrator();
        let id = start(&orch, "resp_001", 5, 0.0);
        let a = orch.execute_tool(id, ToolCall::order_test("crp")).await.unwrap();
        let b = orch.execute_tool(id, ToolCall::order_test("crp")).await.unwrap();
        assert_eq!(a.observation.unwrap().sequence, 0);
        assert_eq!(b.observation.unwrap().sequence, 1);
        assert_eq!(orch.turns(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unmapped_probe_does_not_advance_pathway() {
        let orch = orchestrator();
        let id = start(&orch, "resp_001", 5, 0.0);
        orch.execute_tool(id, ToolCall::ask_question("onset")).await.unwrap();
        orch.execute_tool(id, ToolCall::order_test("crp")).await.unwrap();
        let status = orch.pathway(id).await.unwrap();
        assert!(status.completed.is_empty());
        assert_eq!(status.pointer, Some(0));
    }

    #[tokio::test]
    async fn test_session_limit_under_concurrency() {
        let orch = Arc::new(orchestrator().with_config(OrchestratorConfig::default().with_max_sessions(3)));
        let mut tasks = Vec::new();
        for seed in 0..12 {
            let orch = Arc::clone(&orch);
            tasks.push(tokio::spawn(async move {
                orch.start_session(StartSession::new("uti_001").with_seed(seed))
            }));
        }
        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(err) => assert_eq!(err, ClinicalError::SessionLimitReached(3)),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(orch.session_count(), 3);

        let oldest = orch.list_sessions().await[0].session_id;
        orch.end_session(oldest).await.unwrap();
        assert!(orch.start_session(StartSession::new("uti_001")).is_ok());
    }

    #[tokio::test]
    async fn test_list_sessions_in_creation_order() {
        let orch = orchestrator();
        let a = start(&orch, "resp_001", 1, 0.0);
        let b = start(&orch, "abd_001", 2, 0.0);
        orch.execute_tool(b, ToolCall::order_test("cbc")).await.unwrap();

        let listed = orch.list_sessions().await;
        assert_eq!(listed.iter().map(|s| s.session_id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(listed[1].turn_count, 1);
        assert_eq!(listed[1].seed, 2);

        let ended = orch.end_session(a).await.unwrap();
        assert_eq!(ended.case_id, "resp_001");
        assert_eq!(orch.list_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_entropy_seed_is_recorded_and_replayable() {
        let orch = orchestrator();
        let noise = NoiseProfile::uniform(0.5);
        let id = orch
            .start_session(StartSession::new("resp_001").with_noise(noise.clone()))
            .unwrap();
        for _ in 0..5 {
            orch.execute_tool(id, ToolCall::order_test("temperature")).await.unwrap();
        }
        let snapshot = orch.snapshot(id).await.unwrap();

        let replay = orch
            .start_session(StartSession::new("resp_001").with_seed(snapshot.world.seed).with_noise(noise))
            .unwrap();
        for _ in 0..5 {
            orch.execute_tool(replay, ToolCall::order_test("temperature")).await.unwrap();
        }
        let again = orch.snapshot(replay).await.unwrap();
        assert_eq!(snapshot.world.probe_log, again.world.probe_log);
    }

    struct Broken;

    #[async_trait]
    impl KnowledgeRetriever for Broken {
        async fn rank_evidence(&self, _label: &str, _top_k: usize) -> Result<Vec<GuidelineEvidence>, EnvError> {
            Err(EnvError::unavailable("index offline"))
        }
    }

    struct Slow;

    #[async_trait]
    impl KnowledgeRetriever for Slow {
        async fn rank_evidence(&self, label: &str, top_k: usize) -> Result<Vec<GuidelineEvidence>, EnvError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(StaticGuidelineIndex::builtin().rank(label, top_k))
        }
    }

    async fn diagnose_with(orch: Orchestrator) -> Turn {
        let id = start(&orch, "abd_001", 2, 0.0);
        orch.execute_tool(id, ToolCall::order_test("abdominal_ultrasound")).await.unwrap();
        orch.execute_tool(id, ToolCall::recommend_plan()).await.unwrap()
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades() {
        let turn = diagnose_with(orchestrator().with_retriever(Arc::new(Broken))).await;
        assert_eq!(turn.diagnosis.unwrap().label, "acute appendicitis");
        assert!(turn.evidence_chain.is_empty());
        assert!(!turn.refusal);

        let slow = orchestrator()
            .with_config(OrchestratorConfig::default().with_retrieval_timeout(Duration::from_millis(10)))
            .with_retriever(Arc::new(Slow));
        let turn = diagnose_with(slow).await;
        assert!(turn.evidence_chain.is_empty());
        assert!(turn.plan.is_some());
    }

    struct Overconfident(f64);

    impl DiagnosticAgent for Overconfident {
        fn diagnose(&self, _request: &DiagnosticRequest<'_>) -> DiagnosisDecision {
            DiagnosisDecision {
                label: "acute appendicitis".to_string(),
                confidence: self.0,
                evidence: vec!["test:abdominal_ultrasound=abnormal".to_string()],
                plan: None,
            }
        }
    }

    #[tokio::test]
    async fn test_confidence_is_clamped() {
        let catalog = Arc::new(CaseCatalog::builtin().unwrap());
        for (raw, expected) in [(7.5, 1.0), (-3.0, 0.0), (f64::NAN, 0.0)] {
            let mut subagents = default_subagents(&catalog, 0.35);
            subagents.diagnostic = Arc::new(Overconfident(raw));
            let orch = Orchestrator::new(Arc::clone(&catalog)).with_subagents(subagents);
            let turn = diagnose_with(orch).await;
            assert_eq!(turn.confidence(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_injected_perturbation_reaches_sessions() {
        struct Plus(f64);
        impl Perturb for Plus {
            fn delta(&self, _v: f64, _s: f64, _rng: &mut dyn RngCore) -> f64 {
                self.0
            }
        }

        let orch = orchestrator().with_perturbation("nihss", Arc::new(Plus(10.0)));
        let id = start(&orch, "stroke_001", 1, 1.0);
        let turn = orch.execute_tool(id, ToolCall::order_test("nihss")).await.unwrap();
        let record = turn.observation.unwrap();
        assert_eq!(record.kind, ProbeKind::Test);
        approx::assert_relative_eq!(record.observed.as_number().unwrap(), 19.0);
    }
}
