//! Subagent capability contracts.
//!
//! Each subagent is one entry point over borrowed inputs. The orchestrator
//! owns the protocol that sequences them; implementations own nothing but
//! their own decision logic.
//!
//! ```text
//! message ──► TriageAgent ──► ToolCall | DirectResponse
//!                                 │
//!                  recommend_plan │
//!                                 ▼
//! probe log ──► DiagnosticAgent ──► DiagnosisDecision ──► SafetyAgent ──► Allow | Refuse
//! ```

use crate::types::{ProbeRecord, ToolCall};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Input to the triage subagent.
#[derive(Debug, Clone, Copy)]
pub struct TriageRequest<'a> {
    /// Free-form user message for this turn
    pub message: &'a str,

    /// Tool calls issued in earlier turns, oldest first
    pub prior_calls: &'a [ToolCall],

    /// Complaints the patient presented with at session start
    pub presenting_symptoms: &'a [String],

    /// Observations gathered so far
    pub probe_log: &'a [ProbeRecord],
}

/// What the triage subagent wants to do with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum TriageDecision {
    /// Invoke a tool
    Tool { call: ToolCall },

    /// Answer without touching the world
    DirectResponse { reply: String },
}

/// Input to the diagnostic subagent.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticRequest<'a> {
    pub presenting_symptoms: &'a [String],
    pub probe_log: &'a [ProbeRecord],
}

/// Output of the diagnostic subagent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisDecision {
    pub label: String,

    /// Belief in `label`; the orchestrator clamps it to [0, 1]
    pub confidence: f64,

    /// Observations supporting the label, e.g. `test:ecg=ST elevation`
    pub evidence: Vec<String>,

    /// Suggested management, if the subagent proposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

/// Input to the safety subagent.
#[derive(Debug, Clone, Copy)]
pub struct SafetyRequest<'a> {
    pub requested_tool: &'a ToolCall,

    /// Whether the tool registry declares `requested_tool`
    pub tool_registered: bool,

    /// Present only when a diagnosis was produced this turn
    pub decision: Option<&'a DiagnosisDecision>,
}

/// Outcome of a safety review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SafetyVerdict {
    Allow,
    Refuse { reason: String },
}

impl SafetyVerdict {
    /// Creates a refusal.
    pub fn refuse(reason: impl Into<String>) -> Self {
        Self::Refuse {
            reason: reason.into(),
        }
    }

    /// Returns the refusal reason, if refused.
    pub fn reason(&self) -> Option<&str> {
        match self {
            SafetyVerdict::Allow => None,
            SafetyVerdict::Refuse { reason } => Some(reason),
        }
    }
}

/// Chooses the next action for a user message.
pub trait TriageAgent: Send + Sync {
    fn route(&self, request: &TriageRequest<'_>) -> TriageDecision;
}

/// Proposes a diagnosis from the probe log.
pub trait DiagnosticAgent: Send + Sync {
    fn diagnose(&self, request: &DiagnosticRequest<'_>) -> DiagnosisDecision;
}

/// Vetoes decisions that should not reach the user.
pub trait SafetyAgent: Send + Sync {
    fn review(&self, request: &SafetyRequest<'_>) -> SafetyVerdict;
}

/// The capability set the orchestrator is built with.
#[derive(Clone)]
pub struct Subagents {
    pub triage: Arc<dyn TriageAgent>,
    pub diagnostic: Arc<dyn DiagnosticAgent>,
    pub safety: Arc<dyn SafetyAgent>,
}

impl Subagents {
    /// Creates a capability set from three implementations.
    pub fn new(
        triage: impl TriageAgent + 'static,
        diagnostic: impl DiagnosticAgent + 'static,
        safety: impl SafetyAgent + 'static,
    ) -> Self {
        Self {
            triage: Arc::new(triage),
            diagnostic: Arc::new(diagnostic),
            safety: Arc::new(safety),
        }
    }
}

impl std::fmt::Debug for Subagents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subagents").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysPlan;

    impl TriageAgent for AlwaysPlan {
        fn route(&self, _request: &TriageRequest<'_>) -> TriageDecision {
            TriageDecision::Tool {
                call: ToolCall::recommend_plan(),
            }
        }
    }

    #[test]
    fn test_triage_contract_is_object_safe() {
        let agent: Arc<dyn TriageAgent> = Arc::new(AlwaysPlan);
        let request = TriageRequest {
            message: "what is it?",
            prior_calls: &[],
            presenting_symptoms: &[],
            probe_log: &[],
        };
        assert_eq!(
            agent.route(&request),
            TriageDecision::Tool {
                call: ToolCall::recommend_plan()
            }
        );
    }

    #[test]
    fn test_safety_verdict_reason() {
        assert_eq!(SafetyVerdict::Allow.reason(), None);
        assert_eq!(SafetyVerdict::refuse("low confidence").reason(), Some("low confidence"));
    }
}
