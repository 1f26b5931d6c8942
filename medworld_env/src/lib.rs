//! MedWorld Collaborator Contracts
//!
//! This crate holds the seams between the clinical simulation core and the
//! collaborators it drives but does not own:
//! - **Knowledge retrieval**: ranked guideline evidence for a diagnosis label
//! - **Subagents**: triage, diagnostic and safety decision functions
//! - **Shared vocabulary**: session ids, probe kinds, tool calls, observations
//!
//! Everything here is a contract. Any implementation satisfying it is
//! interchangeable, including deterministic rule-based stand-ins for testing.
//!
//! # Example
//!
//! ```ignore
//! use medworld_env::{KnowledgeRetriever, TimedRetriever, NoEvidence};
//! use std::time::Duration;
//!
//! let retriever = TimedRetriever::new(NoEvidence, Duration::from_secs(2));
//! let hits = retriever.rank_evidence("community-acquired pneumonia", 3).await?;
//! assert!(hits.is_empty());
//! ```

mod agents;
mod error;
mod retrieval;
mod timeout;
mod types;

pub use agents::{
    DiagnosisDecision, DiagnosticAgent, DiagnosticRequest, SafetyAgent, SafetyRequest,
    SafetyVerdict, Subagents, TriageAgent, TriageDecision, TriageRequest,
};
pub use error::EnvError;
pub use retrieval::{GuidelineEvidence, KnowledgeRetriever, NoEvidence};
pub use timeout::TimedRetriever;
pub use types::{ClinicalValue, ProbeKind, ProbeRecord, SessionId, ToolCall, ToolKind};
