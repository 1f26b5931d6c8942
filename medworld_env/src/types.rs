//! Shared vocabulary between the simulation core and its collaborators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a clinical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic SessionId from a seed (for replay).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// What a probe asks the world model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// History question answered by the patient
    Question,
    /// Ordered investigation
    Test,
}

impl ProbeKind {
    /// Returns the wire name.
    pub fn name(&self) -> &'static str {
        match self {
            ProbeKind::Question => "question",
            ProbeKind::Test => "test",
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tools the orchestrator can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    AskQuestion,
    OrderTest,
    RecommendPlan,
}

impl ToolKind {
    /// Returns every tool kind.
    pub fn all() -> Vec<ToolKind> {
        vec![ToolKind::AskQuestion, ToolKind::OrderTest, ToolKind::RecommendPlan]
    }

    /// Returns the tool name used in tool calls.
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::AskQuestion => "ask_question",
            ToolKind::OrderTest => "order_test",
            ToolKind::RecommendPlan => "recommend_plan",
        }
    }

    /// Returns the probe kind this tool issues, if it probes the world.
    pub fn probe_kind(&self) -> Option<ProbeKind> {
        match self {
            ToolKind::AskQuestion => Some(ProbeKind::Question),
            ToolKind::OrderTest => Some(ProbeKind::Test),
            ToolKind::RecommendPlan => None,
        }
    }

    /// Returns the argument carrying the probe id.
    pub fn argument_key(&self) -> Option<&'static str> {
        match self {
            ToolKind::AskQuestion => Some("question"),
            ToolKind::OrderTest => Some("test"),
            ToolKind::RecommendPlan => None,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ask_question" => Ok(ToolKind::AskQuestion),
            "order_test" => Ok(ToolKind::OrderTest),
            "recommend_plan" => Ok(ToolKind::RecommendPlan),
            _ => Err(format!("Unknown tool: {}", s)),
        }
    }
}

/// A tool invocation: name plus string arguments.
///
/// The name is kept as a string so that a subagent can request a tool the
/// registry does not declare; the orchestrator decides what to do with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
}

impl ToolCall {
    /// Creates a call with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    /// `ask_question(question)`
    pub fn ask_question(question: impl Into<String>) -> Self {
        Self::new(ToolKind::AskQuestion.name()).with_arg("question", question)
    }

    /// `order_test(test)`
    pub fn order_test(test: impl Into<String>) -> Self {
        Self::new(ToolKind::OrderTest.name()).with_arg("test", test)
    }

    /// `recommend_plan()`
    pub fn recommend_plan() -> Self {
        Self::new(ToolKind::RecommendPlan.name())
    }

    /// Adds an argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Returns an argument value.
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).map(String::as_str)
    }

    /// Resolves the declared tool kind, if the name is a known tool.
    pub fn kind(&self) -> Option<ToolKind> {
        self.name.parse().ok()
    }

    /// Returns the probe id argument for probing tools.
    pub fn probe_id(&self) -> Option<&str> {
        self.kind()
            .and_then(|k| k.argument_key())
            .and_then(|key| self.argument(key))
    }
}

impl std::fmt::Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let args: Vec<String> = self.arguments.values().cloned().collect();
        write!(f, "{}({})", self.name, args.join(", "))
    }
}

/// A clinical fact value: what a question answers or a test reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClinicalValue {
    /// One of a finite set of findings
    Categorical { value: String },

    /// A measurement
    Numeric {
        value: f64,
        #[serde(default)]
        unit: String,
    },
}

impl ClinicalValue {
    /// Creates a categorical value.
    pub fn categorical(value: impl Into<String>) -> Self {
        Self::Categorical { value: value.into() }
    }

    /// Creates a numeric value.
    pub fn numeric(value: f64, unit: impl Into<String>) -> Self {
        Self::Numeric {
            value,
            unit: unit.into(),
        }
    }

    /// Returns the numeric reading, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ClinicalValue::Numeric { value, .. } => Some(*value),
            ClinicalValue::Categorical { .. } => None,
        }
    }

    /// Returns the categorical finding, if any.
    pub fn as_category(&self) -> Option<&str> {
        match self {
            ClinicalValue::Categorical { value } => Some(value),
            ClinicalValue::Numeric { .. } => None,
        }
    }

    /// Compares two findings. Categories compare case-insensitively,
    /// numbers within `tolerance`.
    pub fn agrees_with(&self, other: &ClinicalValue, tolerance: f64) -> bool {
        match (self, other) {
            (ClinicalValue::Categorical { value: a }, ClinicalValue::Categorical { value: b }) => {
                a.eq_ignore_ascii_case(b)
            }
            (ClinicalValue::Numeric { value: a, .. }, ClinicalValue::Numeric { value: b, .. }) => {
                (a - b).abs() <= tolerance
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for ClinicalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClinicalValue::Categorical { value } => write!(f, "{}", value),
            ClinicalValue::Numeric { value, unit } if unit.is_empty() => write!(f, "{:.2}", value),
            ClinicalValue::Numeric { value, unit } => write!(f, "{:.2} {}", value, unit),
        }
    }
}

/// One entry of a session's probe log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// Position in the log (0-based)
    pub sequence: u64,

    pub kind: ProbeKind,

    pub probe_id: String,

    /// Value returned to the caller, possibly corrupted
    pub observed: ClinicalValue,

    /// Whether noise replaced the canonical value
    pub corrupted: bool,

    /// Whether this probe made a red-flag rule hold for the first time
    pub red_flag_triggered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_seed_is_stable() {
        assert_eq!(SessionId::from_seed(7), SessionId::from_seed(7));
        assert_ne!(SessionId::from_seed(7), SessionId::from_seed(8));
    }

    #[test]
    fn test_session_id_round_trips_through_display() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_tool_call_probe_id() {
        assert_eq!(ToolCall::order_test("ecg").probe_id(), Some("ecg"));
        assert_eq!(ToolCall::ask_question("onset").probe_id(), Some("onset"));
        assert_eq!(ToolCall::recommend_plan().probe_id(), None);
        assert_eq!(ToolCall::new("prescribe").kind(), None);
    }

    #[test]
    fn test_clinical_value_agreement() {
        let a = ClinicalValue::categorical("ST elevation");
        assert!(a.agrees_with(&ClinicalValue::categorical("st elevation"), 0.0));
        assert!(!a.agrees_with(&ClinicalValue::categorical("normal sinus rhythm"), 0.0));

        let x = ClinicalValue::numeric(4.2, "ng/mL");
        assert!(x.agrees_with(&ClinicalValue::numeric(4.25, "ng/mL"), 0.1));
        assert!(!x.agrees_with(&ClinicalValue::numeric(5.0, "ng/mL"), 0.1));
        assert!(!x.agrees_with(&a, 100.0));
    }
}
