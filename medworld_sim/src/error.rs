//! Errors raised by the replay harness.

use medworld_core::ClinicalError;
use thiserror::Error;

/// Replay evaluation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// A scripted episode is malformed or failed mid-run
    #[error("Episode '{name}' failed: {reason}")]
    Episode { name: String, reason: String },

    #[error("Report error: {0}")]
    Report(String),

    #[error(transparent)]
    Clinical(#[from] ClinicalError),
}

impl EvalError {
    /// Creates an episode error.
    pub fn episode(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Episode {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a report error.
    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report(msg.into())
    }
}

impl From<std::io::Error> for EvalError {
    fn from(err: std::io::Error) -> Self {
        Self::Report(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Report(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_error_display() {
        let err = EvalError::episode("bad_probe", "Unknown test 'mri' for case resp_001");
        assert_eq!(
            err.to_string(),
            "Episode 'bad_probe' failed: Unknown test 'mri' for case resp_001"
        );
    }

    #[test]
    fn test_clinical_error_is_transparent() {
        let err: EvalError = ClinicalError::unknown_case("nope").into();
        assert_eq!(err.to_string(), "Unknown case: nope");
    }
}
