//! Errors raised by the clinical core.

use medworld_env::ProbeKind;
use thiserror::Error;

/// Clinical simulation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClinicalError {
    #[error("Unknown case: {0}")]
    UnknownCase(String),

    #[error("Unknown {kind} '{probe_id}' for case {case_id}")]
    UnknownProbe {
        case_id: String,
        kind: ProbeKind,
        probe_id: String,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A probe was requested while the emergency override is active
    #[error("Active safety override: {0}")]
    SafetyOverrideConflict(String),

    #[error("World model has not been reset")]
    WorldNotReady,

    #[error("Session limit reached ({0})")]
    SessionLimitReached(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Catalog error: {0}")]
    Catalog(String),
}

impl ClinicalError {
    /// Creates an unknown-case error.
    pub fn unknown_case(case_id: impl Into<String>) -> Self {
        Self::UnknownCase(case_id.into())
    }

    /// Creates an invalid-input error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates a catalog error.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Whether the caller, not the simulation, is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ClinicalError::WorldNotReady | ClinicalError::Catalog(_))
    }
}
