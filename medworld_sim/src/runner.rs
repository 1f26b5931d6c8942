//! Replay runner - drives scripted episodes through a fresh orchestrator.

use crate::aggregate::{MetricsAccumulator, ReplayReport};
use crate::error::EvalError;

use medworld_core::{CaseCatalog, CaseDefinition, NoiseProfile, Orchestrator, OrchestratorConfig, StartSession, Turn};
use medworld_env::{KnowledgeRetriever, ProbeKind, Subagents, ToolCall, ToolKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// What a correct run of an episode looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    /// Final diagnosis label; `None` when no diagnosis should be made
    pub diagnosis: Option<String>,

    /// Whether the final turn must escalate to a human
    pub escalate_to_human: bool,
}

/// One scripted, fully deterministic replay scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEpisode {
    pub name: String,
    pub case_id: String,
    pub seed: u64,
    #[serde(default)]
    pub noise: NoiseProfile,

    /// Tool calls issued in order, bypassing triage
    pub script: Vec<ToolCall>,

    pub expected: ExpectedOutcome,
}

impl ReplayEpisode {
    /// Creates an episode with an empty script that expects nothing.
    pub fn new(name: impl Into<String>, case_id: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            case_id: case_id.into(),
            seed,
            noise: NoiseProfile::none(),
            script: Vec::new(),
            expected: ExpectedOutcome {
                diagnosis: None,
                escalate_to_human: false,
            },
        }
    }

    pub fn with_noise(mut self, noise: NoiseProfile) -> Self {
        self.noise = noise;
        self
    }

    /// Appends `order_test(test)`.
    pub fn order(mut self, test: &str) -> Self {
        self.script.push(ToolCall::order_test(test));
        self
    }

    /// Appends `ask_question(question)`.
    pub fn ask(mut self, question: &str) -> Self {
        self.script.push(ToolCall::ask_question(question));
        self
    }

    /// Appends an arbitrary call.
    pub fn call(mut self, call: ToolCall) -> Self {
        self.script.push(call);
        self
    }

    pub fn expect_diagnosis(mut self, label: impl Into<String>) -> Self {
        self.expected.diagnosis = Some(label.into());
        self
    }

    pub fn expect_escalation(mut self) -> Self {
        self.expected.escalate_to_human = true;
        self
    }

    /// The script as executed: a closing `recommend_plan` is appended
    /// unless the script already ends with one.
    pub fn closed_script(&self) -> Vec<ToolCall> {
        let mut script = self.script.clone();
        let closed = script
            .last()
            .map(|call| call.kind() == Some(ToolKind::RecommendPlan))
            .unwrap_or(false);
        if !closed {
            script.push(ToolCall::recommend_plan());
        }
        script
    }
}

/// Maps a probe to the tool call that issues it.
pub fn probe_call(kind: ProbeKind, probe_id: &str) -> ToolCall {
    match kind {
        ProbeKind::Question => ToolCall::ask_question(probe_id),
        ProbeKind::Test => ToolCall::order_test(probe_id),
    }
}

/// Outcome class of one episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Scored,
    Failed,
}

/// Scored result of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Position in the batch
    pub index: usize,
    pub name: String,
    pub case_id: String,
    pub seed: u64,
    pub status: EpisodeStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub predicted_diagnosis: Option<String>,
    pub expected_diagnosis: Option<String>,
    pub diagnosis_correct: bool,

    /// Confidence of the final diagnosis, 0 when none was made
    pub confidence: f64,

    pub escalated: bool,
    pub expected_escalation: bool,
    pub safety_compliant: bool,

    /// Escalation was required but did not happen
    pub dangerous_miss: bool,

    pub turns: usize,

    /// 1-based index of the final diagnosis turn, or the turn count
    pub turns_to_diagnosis: usize,

    /// Distinct tests that returned an observation, sorted
    pub ordered_tests: Vec<String>,
    pub key_test_hit_rate: f64,
    pub over_testing_rate: f64,
}

impl EpisodeRecord {
    /// Record for an episode that could not be scored.
    pub fn failed(index: usize, episode: &ReplayEpisode, err: &EvalError) -> Self {
        Self {
            index,
            name: episode.name.clone(),
            case_id: episode.case_id.clone(),
            seed: episode.seed,
            status: EpisodeStatus::Failed,
            failure_reason: Some(err.to_string()),
            predicted_diagnosis: None,
            expected_diagnosis: episode.expected.diagnosis.clone(),
            diagnosis_correct: false,
            confidence: 0.0,
            escalated: false,
            expected_escalation: episode.expected.escalate_to_human,
            safety_compliant: false,
            dangerous_miss: false,
            turns: 0,
            turns_to_diagnosis: 0,
            ordered_tests: Vec::new(),
            key_test_hit_rate: 0.0,
            over_testing_rate: 0.0,
        }
    }

    pub fn is_scored(&self) -> bool {
        self.status == EpisodeStatus::Scored
    }

    /// Scores a completed run.
    fn score(index: usize, episode: &ReplayEpisode, case: &CaseDefinition, turns: &[Turn]) -> Self {
        let escalated = turns.last().map(|t| t.escalate_to_human).unwrap_or(false);
        let final_diagnosis = turns
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, t)| t.diagnosis.as_ref().map(|d| (i, d)));

        let predicted = final_diagnosis.map(|(_, d)| d.label.clone());
        let confidence = final_diagnosis.map(|(_, d)| d.confidence).unwrap_or(0.0);
        let turns_to_diagnosis = final_diagnosis.map(|(i, _)| i + 1).unwrap_or(turns.len());

        let diagnosis_correct = match (&episode.expected.diagnosis, &predicted) {
            (Some(expected), Some(label)) => expected.eq_ignore_ascii_case(label),
            (None, None) => true,
            _ => false,
        };

        let ordered: BTreeSet<String> = turns
            .iter()
            .filter_map(|t| t.observation.as_ref())
            .filter(|obs| obs.kind == ProbeKind::Test)
            .map(|obs| obs.probe_id.clone())
            .collect();
        let key_hits = case.key_tests.iter().filter(|k| ordered.contains(*k)).count();
        let key_test_hit_rate = if case.key_tests.is_empty() {
            0.0
        } else {
            key_hits as f64 / case.key_tests.len() as f64
        };
        let over_testing_rate = if ordered.is_empty() {
            1.0
        } else {
            ordered.iter().filter(|t| !case.is_key_test(t)).count() as f64 / ordered.len() as f64
        };

        Self {
            index,
            name: episode.name.clone(),
            case_id: episode.case_id.clone(),
            seed: episode.seed,
            status: EpisodeStatus::Scored,
            failure_reason: None,
            predicted_diagnosis: predicted,
            expected_diagnosis: episode.expected.diagnosis.clone(),
            diagnosis_correct,
            confidence,
            escalated,
            expected_escalation: episode.expected.escalate_to_human,
            safety_compliant: escalated == episode.expected.escalate_to_human,
            dangerous_miss: episode.expected.escalate_to_human && !escalated,
            turns: turns.len(),
            turns_to_diagnosis,
            ordered_tests: ordered.into_iter().collect(),
            key_test_hit_rate,
            over_testing_rate,
        }
    }
}

/// Runs replay episodes, each against its own orchestrator.
#[derive(Clone)]
pub struct ReplayRunner {
    catalog: Arc<CaseCatalog>,
    config: OrchestratorConfig,
    subagents: Option<Subagents>,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
    concurrency: usize,
}

impl ReplayRunner {
    /// Creates a runner with default orchestrator settings.
    pub fn new(catalog: Arc<CaseCatalog>) -> Self {
        Self {
            catalog,
            config: OrchestratorConfig::default(),
            subagents: None,
            retriever: None,
            concurrency: 4,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_subagents(mut self, subagents: Subagents) -> Self {
        self.subagents = Some(subagents);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Sets how many episodes `run_concurrent` keeps in flight (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn catalog(&self) -> &Arc<CaseCatalog> {
        &self.catalog
    }

    fn orchestrator(&self) -> Orchestrator {
        let mut orchestrator = Orchestrator::new(Arc::clone(&self.catalog)).with_config(self.config.clone());
        if let Some(subagents) = &self.subagents {
            orchestrator = orchestrator.with_subagents(subagents.clone());
        }
        if let Some(retriever) = &self.retriever {
            orchestrator = orchestrator.with_retriever(Arc::clone(retriever));
        }
        orchestrator
    }

    /// Runs one episode. Any tool error fails the whole episode.
    pub async fn run(&self, index: usize, episode: &ReplayEpisode) -> Result<EpisodeRecord, EvalError> {
        debug!(episode = %episode.name, case_id = %episode.case_id, seed = episode.seed, "Episode started");
        let fail = |reason: String| EvalError::episode(&episode.name, reason);

        let case = self.catalog.get(&episode.case_id).map_err(|e| fail(e.to_string()))?;
        let orchestrator = self.orchestrator();
        let session = orchestrator
            .start_session(
                StartSession::new(&episode.case_id)
                    .with_seed(episode.seed)
                    .with_noise(episode.noise.clone()),
            )
            .map_err(|e| fail(e.to_string()))?;

        let mut turns = Vec::new();
        for call in episode.closed_script() {
            let turn = orchestrator
                .execute_tool(session, call)
                .await
                .map_err(|e| fail(e.to_string()))?;
            if let Some(err) = &turn.tool_error {
                return Err(fail(err.clone()));
            }
            turns.push(turn);
        }
        orchestrator.end_session(session).await.map_err(|e| fail(e.to_string()))?;

        let record = EpisodeRecord::score(index, episode, &case, &turns);
        debug!(
            episode = %record.name,
            correct = record.diagnosis_correct,
            confidence = record.confidence,
            escalated = record.escalated,
            "Episode scored"
        );
        Ok(record)
    }

    /// Runs one episode and converts a failure into a failed record.
    pub async fn run_recorded(&self, index: usize, episode: &ReplayEpisode) -> EpisodeRecord {
        match self.run(index, episode).await {
            Ok(record) => record,
            Err(err) => {
                warn!(episode = %episode.name, error = %err, "Episode failed");
                EpisodeRecord::failed(index, episode, &err)
            }
        }
    }

    /// Runs episodes one after another.
    pub async fn run_batch(&self, episodes: &[ReplayEpisode]) -> ReplayReport {
        let accumulator = MetricsAccumulator::new();
        for (index, episode) in episodes.iter().enumerate() {
            accumulator.record(self.run_recorded(index, episode).await);
        }
        let report = accumulator.into_report();
        log_summary(&report);
        report
    }

    /// Runs episodes on tokio tasks, at most `concurrency` at a time.
    ///
    /// Records are ordered by episode index, so the report does not depend
    /// on scheduling.
    pub async fn run_concurrent(&self, episodes: Vec<ReplayEpisode>) -> ReplayReport {
        let accumulator = Arc::new(MetricsAccumulator::new());
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, episode) in episodes.into_iter().enumerate() {
            let runner = self.clone();
            let accumulator = Arc::clone(&accumulator);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                accumulator.record(runner.run_recorded(index, &episode).await);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "Episode task aborted");
            }
        }

        let report = match Arc::try_unwrap(accumulator) {
            Ok(accumulator) => accumulator.into_report(),
            Err(shared) => shared.report(),
        };
        log_summary(&report);
        report
    }
}

impl std::fmt::Debug for ReplayRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayRunner")
            .field("cases", &self.catalog.len())
            .field("config", &self.config)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

fn log_summary(report: &ReplayReport) {
    let m = &report.metrics;
    info!(
        episodes = m.episodes,
        failed = m.failed,
        accuracy = m.diagnosis_accuracy,
        safety = m.safety_compliance,
        "Replay batch finished"
    );
}
