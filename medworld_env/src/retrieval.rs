//! Knowledge retrieval contract.

use crate::error::EnvError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One ranked guideline reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineEvidence {
    pub guideline_id: String,
    pub title: String,
    pub source: String,
    /// Relevance in [0, 1], highest first in a ranked list
    pub score: f64,
}

/// Black-box ranked-evidence provider.
///
/// # Implementations
///
/// - **Static**: in-memory guideline index (see `medworld_core::knowledge`)
/// - **Remote**: a search service, usually wrapped in [`crate::TimedRetriever`]
///
/// # Contract
///
/// An empty or unavailable corpus yields `Ok(vec![])`, not an error. Errors
/// are reserved for failures the caller should log; the orchestrator treats
/// them the same as an empty list.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync + 'static {
    /// Returns at most `top_k` references for a diagnosis label, best first.
    async fn rank_evidence(
        &self,
        diagnosis_label: &str,
        top_k: usize,
    ) -> Result<Vec<GuidelineEvidence>, EnvError>;
}

/// Retriever over an empty corpus.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvidence;

#[async_trait]
impl KnowledgeRetriever for NoEvidence {
    async fn rank_evidence(
        &self,
        _diagnosis_label: &str,
        _top_k: usize,
    ) -> Result<Vec<GuidelineEvidence>, EnvError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_evidence_is_empty() {
        let hits = NoEvidence.rank_evidence("stroke", 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
