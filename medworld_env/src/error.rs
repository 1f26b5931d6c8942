//! Error types for collaborator calls.

use thiserror::Error;

/// Errors a collaborator (retriever, remote subagent) can report.
///
/// None of these are fatal to a turn: the orchestrator degrades to
/// "no evidence attached" when retrieval fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvError {
    /// Collaborator could not serve the request (corpus missing, backend down)
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// Collaborator did not answer in time
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Collaborator answered with something the contract does not allow
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl EnvError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates an invalid-response error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_error_display() {
        assert_eq!(EnvError::Timeout(250).to_string(), "Timeout after 250ms");
        assert_eq!(
            EnvError::unavailable("corpus empty").to_string(),
            "Collaborator unavailable: corpus empty"
        );
    }
}
