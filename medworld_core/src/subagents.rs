//! Deterministic rule-based subagents.
//!
//! These stand in for model-backed agents: triage follows a symptom-keyed
//! work-up protocol, diagnosis scores catalog-derived profiles against the
//! probe log, and safety applies a confidence floor plus the tool registry.

use crate::catalog::{CaseCatalog, FactCondition, Predicate, ProbeRef};
use medworld_env::{
    ClinicalValue, DiagnosisDecision, DiagnosticAgent, DiagnosticRequest, ProbeKind, SafetyAgent,
    SafetyRequest, SafetyVerdict, Subagents, ToolCall, TriageAgent, TriageDecision, TriageRequest,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Label used when no profile is supported by the probe log.
pub const UNDETERMINED: &str = "undetermined";

const HELP: &str = "Commands: 'order <test>', 'ask <question>', 'recommend'. \
                    Anything else follows the work-up protocol for the presenting complaint.";

/// A symptom-keyed test sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkupProtocol {
    pub name: String,

    /// Matches if every keyword of any one group appears in the symptoms
    pub triggers: Vec<Vec<String>>,

    /// Tests to order, in order
    pub tests: Vec<String>,

    pub follow_up: Option<FollowUp>,
}

/// A test ordered after the protocol's own tests unless every condition
/// already holds on the latest observations.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub test: String,
    pub unless: Vec<FactCondition>,
}

impl FollowUp {
    pub fn new(test: &str, unless: Vec<FactCondition>) -> Self {
        Self {
            test: test.to_string(),
            unless,
        }
    }

    fn confirmed(&self, latest: &BTreeMap<ProbeRef, &ClinicalValue>) -> bool {
        self.unless.iter().all(|condition| {
            latest
                .get(&condition.probe)
                .is_some_and(|value| condition.predicate.holds(value))
        })
    }
}

impl WorkupProtocol {
    pub fn new(name: &str, triggers: &[&[&str]], tests: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            triggers: triggers
                .iter()
                .map(|group| group.iter().map(|k| k.to_string()).collect())
                .collect(),
            tests: tests.iter().map(|t| t.to_string()).collect(),
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    fn matches(&self, symptoms: &str) -> bool {
        self.triggers
            .iter()
            .any(|group| group.iter().all(|keyword| symptoms.contains(keyword.as_str())))
    }
}

/// Command parser plus work-up protocol.
#[derive(Debug, Clone)]
pub struct RuleTriage {
    protocols: Vec<WorkupProtocol>,
    fallback_question: String,
}

impl Default for RuleTriage {
    fn default() -> Self {
        // Respiratory before chest pain: pleuritic chest pain is a pneumonia complaint
        Self::new(vec![
            WorkupProtocol::new("respiratory", &[&["fever", "cough"]], &["cbc", "chest_xray"]).with_follow_up(
                FollowUp::new("crp", vec![condition("chest_xray", Predicate::Contains("consolidation".into()))]),
            ),
            WorkupProtocol::new("chest_pain", &[&["chest pain"]], &["ecg", "troponin"]).with_follow_up(FollowUp::new(
                "chest_xray",
                vec![
                    condition("ecg", Predicate::Contains("ST elevation".into())),
                    condition("troponin", Predicate::AtLeast(0.5)),
                ],
            )),
            WorkupProtocol::new("abdominal", &[&["right lower quadrant"]], &["abdominal_ultrasound"]),
            WorkupProtocol::new(
                "urinary",
                &[&["dysuria"], &["urinary frequency"]],
                &["urinalysis", "urine_culture"],
            ),
            WorkupProtocol::new(
                "neurological",
                &[&["slurred speech"], &["weakness"], &["facial droop"]],
                &["head_ct", "nihss"],
            ),
        ])
    }
}

fn condition(test: &str, predicate: Predicate) -> FactCondition {
    FactCondition {
        probe: ProbeRef::test(test),
        predicate,
    }
}

impl RuleTriage {
    pub fn new(protocols: Vec<WorkupProtocol>) -> Self {
        Self {
            protocols,
            fallback_question: "onset".to_string(),
        }
    }

    fn parse_command(message: &str) -> Option<TriageDecision> {
        let lower = message.trim().to_lowercase();
        if lower.is_empty() || lower == "help" {
            return Some(TriageDecision::DirectResponse {
                reply: HELP.to_string(),
            });
        }

        let mut words = lower.split_whitespace();
        let head = words.next().unwrap_or_default();
        let rest: Vec<&str> = words.collect();
        let arg = rest.join("_");

        let call = match head {
            "order" | "order_test" if !arg.is_empty() => ToolCall::order_test(arg),
            "ask" | "ask_question" if !arg.is_empty() => ToolCall::ask_question(arg),
            "call" if !rest.is_empty() => {
                let name = rest[0];
                let value = rest[1..].join("_");
                let key = name
                    .parse::<medworld_env::ToolKind>()
                    .ok()
                    .and_then(|k| k.argument_key())
                    .unwrap_or("arg");
                let call = ToolCall::new(name);
                if value.is_empty() {
                    call
                } else {
                    call.with_arg(key, value)
                }
            }
            _ => {
                let concluding = lower.split(|c: char| !c.is_alphanumeric()).any(|w| {
                    w.starts_with("recommend") || w.starts_with("diagnos") || w.starts_with("summar") || w == "plan"
                });
                if !concluding {
                    return None;
                }
                ToolCall::recommend_plan()
            }
        };
        Some(TriageDecision::Tool { call })
    }
}

impl TriageAgent for RuleTriage {
    fn route(&self, request: &TriageRequest<'_>) -> TriageDecision {
        if let Some(decision) = Self::parse_command(request.message) {
            return decision;
        }

        let symptoms = request.presenting_symptoms.join(" ").to_lowercase();
        let issued: BTreeSet<ProbeRef> = request
            .probe_log
            .iter()
            .map(|r| ProbeRef::new(r.kind, &r.probe_id))
            .collect();

        // Later observations of a probe replace earlier ones
        let latest: BTreeMap<ProbeRef, &ClinicalValue> = request
            .probe_log
            .iter()
            .map(|r| (ProbeRef::new(r.kind, &r.probe_id), &r.observed))
            .collect();

        let call = match self.protocols.iter().find(|p| p.matches(&symptoms)) {
            Some(protocol) => protocol
                .tests
                .iter()
                .find(|test| !issued.contains(&ProbeRef::test(test)))
                .or_else(|| {
                    protocol
                        .follow_up
                        .as_ref()
                        .filter(|f| !issued.contains(&ProbeRef::test(&f.test)) && !f.confirmed(&latest))
                        .map(|f| &f.test)
                })
                .map(|test| ToolCall::order_test(test.clone()))
                .unwrap_or_else(ToolCall::recommend_plan),
            None if !issued.contains(&ProbeRef::question(&self.fallback_question)) => {
                ToolCall::ask_question(self.fallback_question.clone())
            }
            None => ToolCall::recommend_plan(),
        };
        TriageDecision::Tool { call }
    }
}

/// One expected finding of a diagnostic profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedFinding {
    pub probe: ProbeRef,
    pub value: ClinicalValue,
    /// Numeric agreement tolerance
    pub tolerance: f64,
}

/// Findings that characterize one diagnosis.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticProfile {
    pub label: String,
    pub plan: String,
    pub findings: Vec<ExpectedFinding>,
}

/// Differential over diagnostic profiles.
///
/// For each profile, coverage is matched / expected findings and precision
/// is matched / observed findings; confidence is their product. The latest
/// observation of a probe wins.
#[derive(Debug, Clone)]
pub struct ProfileDiagnostician {
    profiles: Vec<DiagnosticProfile>,
}

impl ProfileDiagnostician {
    pub fn new(profiles: Vec<DiagnosticProfile>) -> Self {
        Self { profiles }
    }

    /// One profile per case, from the canonical values of its key tests.
    pub fn from_catalog(catalog: &CaseCatalog) -> Self {
        let profiles = catalog
            .cases()
            .map(|case| DiagnosticProfile {
                label: case.true_diagnosis.clone(),
                plan: case.treatment_plan.clone(),
                findings: case
                    .key_tests
                    .iter()
                    .filter_map(|test| {
                        case.probe(ProbeKind::Test, test).map(|spec| ExpectedFinding {
                            probe: ProbeRef::test(test),
                            value: spec.value.clone(),
                            tolerance: match spec.value {
                                ClinicalValue::Numeric { .. } => 0.2 * spec.severity,
                                ClinicalValue::Categorical { .. } => 0.0,
                            },
                        })
                    })
                    .collect(),
            })
            .filter(|profile| !profile.findings.is_empty())
            .collect();
        Self::new(profiles)
    }
}

impl DiagnosticAgent for ProfileDiagnostician {
    fn diagnose(&self, request: &DiagnosticRequest<'_>) -> DiagnosisDecision {
        let latest: BTreeMap<ProbeRef, &ClinicalValue> = request
            .probe_log
            .iter()
            .map(|r| (ProbeRef::new(r.kind, &r.probe_id), &r.observed))
            .collect();

        let mut best: Option<(f64, &DiagnosticProfile, Vec<String>)> = None;
        for profile in &self.profiles {
            let observed: Vec<(&ExpectedFinding, &ClinicalValue)> = profile
                .findings
                .iter()
                .filter_map(|f| latest.get(&f.probe).map(|v| (f, *v)))
                .collect();
            let matched: Vec<String> = observed
                .iter()
                .filter(|(f, v)| f.value.agrees_with(v, f.tolerance))
                .map(|(f, v)| format!("{}={}", f.probe, v))
                .collect();
            if matched.is_empty() {
                continue;
            }

            let coverage = matched.len() as f64 / profile.findings.len() as f64;
            let precision = matched.len() as f64 / observed.len() as f64;
            let confidence = coverage * precision;
            if best.as_ref().map(|(c, _, _)| confidence > *c).unwrap_or(true) {
                best = Some((confidence, profile, matched));
            }
        }

        match best {
            Some((confidence, profile, evidence)) => DiagnosisDecision {
                label: profile.label.clone(),
                confidence,
                evidence,
                plan: Some(profile.plan.clone()),
            },
            None => DiagnosisDecision {
                label: UNDETERMINED.to_string(),
                confidence: 0.0,
                evidence: Vec::new(),
                plan: None,
            },
        }
    }
}

/// Refuses low-confidence diagnoses and undeclared tools.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdSafety {
    pub min_confidence: f64,
}

impl ThresholdSafety {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

impl SafetyAgent for ThresholdSafety {
    fn review(&self, request: &SafetyRequest<'_>) -> SafetyVerdict {
        if !request.tool_registered {
            return SafetyVerdict::refuse(format!(
                "tool '{}' is outside the declared capability set",
                request.requested_tool.name
            ));
        }
        match request.decision {
            Some(decision) if decision.confidence < self.min_confidence => SafetyVerdict::refuse(format!(
                "diagnosis confidence {:.2} is below the {:.2} threshold",
                decision.confidence, self.min_confidence
            )),
            _ => SafetyVerdict::Allow,
        }
    }
}

/// The rule-based capability set for a catalog.
pub fn default_subagents(catalog: &CaseCatalog, min_confidence: f64) -> Subagents {
    Subagents {
        triage: Arc::new(RuleTriage::default()),
        diagnostic: Arc::new(ProfileDiagnostician::from_catalog(catalog)),
        safety: Arc::new(ThresholdSafety::new(min_confidence)),
    }
}
