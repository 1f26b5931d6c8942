//! Tokio-backed deadline for retrieval collaborators.

use crate::error::EnvError;
use crate::retrieval::{GuidelineEvidence, KnowledgeRetriever};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a retriever so that a slow call becomes `EnvError::Timeout`.
///
/// The wrapped call is dropped on expiry; the retriever must tolerate
/// cancellation at any await point.
pub struct TimedRetriever<R> {
    inner: R,
    deadline: Duration,
}

impl<R: KnowledgeRetriever> TimedRetriever<R> {
    /// Creates a new TimedRetriever.
    pub fn new(inner: R, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    /// Creates an Arc-wrapped retriever for sharing across sessions.
    pub fn shared(inner: R, deadline: Duration) -> Arc<Self> {
        Arc::new(Self::new(inner, deadline))
    }

    /// Returns the configured deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

#[async_trait]
impl<R: KnowledgeRetriever> KnowledgeRetriever for TimedRetriever<R> {
    async fn rank_evidence(
        &self,
        diagnosis_label: &str,
        top_k: usize,
    ) -> Result<Vec<GuidelineEvidence>, EnvError> {
        match tokio::time::timeout(self.deadline, self.inner.rank_evidence(diagnosis_label, top_k)).await {
            Ok(result) => result,
            Err(_) => Err(EnvError::Timeout(self.deadline.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl KnowledgeRetriever for Arc<dyn KnowledgeRetriever> {
    async fn rank_evidence(
        &self,
        diagnosis_label: &str,
        top_k: usize,
    ) -> Result<Vec<GuidelineEvidence>, EnvError> {
        self.as_ref().rank_evidence(diagnosis_label, top_k).await
    }
}
