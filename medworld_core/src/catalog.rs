//! Case catalog: immutable case definitions keyed by case id.
//!
//! Cases are JSON documents. The built-in catalog embeds five cases; a
//! directory of `*.json` files can replace it. Every document is validated
//! on load, and a failure here is the only fatal error class in the core.

use crate::error::ClinicalError;
use crate::perturbation::Perturbation;
use medworld_env::{ClinicalValue, ProbeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const BUILTIN_CASES: [(&str, &str); 5] = [
    ("chest_pain_001", include_str!("../cases/chest_pain_001.json")),
    ("resp_001", include_str!("../cases/resp_001.json")),
    ("abd_001", include_str!("../cases/abd_001.json")),
    ("uti_001", include_str!("../cases/uti_001.json")),
    ("stroke_001", include_str!("../cases/stroke_001.json")),
];

/// Normalizes a probe id for lookup.
pub fn normalize_probe_id(probe_id: &str) -> String {
    probe_id.trim().to_lowercase()
}

/// Reference to one askable or orderable fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProbeRef {
    pub kind: ProbeKind,
    pub id: String,
}

impl ProbeRef {
    pub fn new(kind: ProbeKind, id: &str) -> Self {
        Self {
            kind,
            id: normalize_probe_id(id),
        }
    }

    pub fn test(id: &str) -> Self {
        Self::new(ProbeKind::Test, id)
    }

    pub fn question(id: &str) -> Self {
        Self::new(ProbeKind::Question, id)
    }
}

impl std::fmt::Display for ProbeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

fn default_severity() -> f64 {
    1.0
}

/// Canonical answer to a probe plus how it corrupts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub value: ClinicalValue,

    /// Other valid categories a corrupted categorical answer may take
    #[serde(default)]
    pub alternatives: Vec<String>,

    /// Scale of numeric perturbation
    #[serde(default = "default_severity")]
    pub severity: f64,

    #[serde(default)]
    pub perturbation: Perturbation,
}

impl ProbeSpec {
    /// Creates a categorical probe.
    pub fn categorical(value: &str, alternatives: &[&str]) -> Self {
        Self {
            value: ClinicalValue::categorical(value),
            alternatives: alternatives.iter().map(|a| a.to_string()).collect(),
            severity: default_severity(),
            perturbation: Perturbation::default(),
        }
    }

    /// Creates a numeric probe.
    pub fn numeric(value: f64, unit: &str, severity: f64) -> Self {
        Self {
            value: ClinicalValue::numeric(value, unit),
            alternatives: Vec::new(),
            severity,
            perturbation: Perturbation::default(),
        }
    }

    pub fn with_perturbation(mut self, perturbation: Perturbation) -> Self {
        self.perturbation = perturbation;
        self
    }
}

/// Predicate over a canonical fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Category equals (case-insensitive)
    Equals(String),
    /// Category contains (case-insensitive)
    Contains(String),
    /// Number is >= threshold
    AtLeast(f64),
    /// Number is <= threshold
    AtMost(f64),
}

impl Predicate {
    pub fn holds(&self, value: &ClinicalValue) -> bool {
        match (self, value) {
            (Predicate::Equals(expected), ClinicalValue::Categorical { value }) => {
                value.eq_ignore_ascii_case(expected)
            }
            (Predicate::Contains(needle), ClinicalValue::Categorical { value }) => {
                value.to_lowercase().contains(&needle.to_lowercase())
            }
            (Predicate::AtLeast(threshold), ClinicalValue::Numeric { value, .. }) => value >= threshold,
            (Predicate::AtMost(threshold), ClinicalValue::Numeric { value, .. }) => value <= threshold,
            _ => false,
        }
    }
}

/// One fact condition of a red-flag rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCondition {
    pub probe: ProbeRef,
    pub predicate: Predicate,
}

/// A ground-truth emergency condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlagRule {
    pub id: String,
    pub description: String,
    pub all_of: Vec<FactCondition>,
}

/// One checklist item of a clinical pathway template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathwayItem {
    pub code: String,
    pub title: String,
    pub required_probes: Vec<ProbeRef>,
}

/// Immutable description of one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub case_id: String,
    pub true_diagnosis: String,
    #[serde(default)]
    pub demographics: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub presenting_symptoms: Vec<String>,
    #[serde(default)]
    pub questions: BTreeMap<String, ProbeSpec>,
    #[serde(default)]
    pub tests: BTreeMap<String, ProbeSpec>,
    #[serde(default)]
    pub red_flags: Vec<RedFlagRule>,
    pub treatment_plan: String,
    pub emergency_pathway: String,
    #[serde(default)]
    pub guideline_tags: Vec<String>,
    #[serde(default)]
    pub key_tests: Vec<String>,
    #[serde(default)]
    pub pathway: Vec<PathwayItem>,
}

impl CaseDefinition {
    /// Parses and validates one case document.
    pub fn from_json(json: &str) -> Result<Self, ClinicalError> {
        let mut case: CaseDefinition =
            serde_json::from_str(json).map_err(|e| ClinicalError::catalog(e.to_string()))?;
        case.normalize();
        case.validate()?;
        Ok(case)
    }

    /// Looks up a probe spec; ids are matched case-insensitively.
    pub fn probe(&self, kind: ProbeKind, probe_id: &str) -> Option<&ProbeSpec> {
        let id = normalize_probe_id(probe_id);
        match kind {
            ProbeKind::Question => self.questions.get(&id),
            ProbeKind::Test => self.tests.get(&id),
        }
    }

    /// Whether `test_id` is one of the case's key tests.
    pub fn is_key_test(&self, test_id: &str) -> bool {
        let id = normalize_probe_id(test_id);
        self.key_tests.iter().any(|k| *k == id)
    }

    fn normalize(&mut self) {
        self.questions = std::mem::take(&mut self.questions)
            .into_iter()
            .map(|(k, v)| (normalize_probe_id(&k), v))
            .collect();
        self.tests = std::mem::take(&mut self.tests)
            .into_iter()
            .map(|(k, v)| (normalize_probe_id(&k), v))
            .collect();
        for key in &mut self.key_tests {
            *key = normalize_probe_id(key);
        }
        let refs = self
            .red_flags
            .iter_mut()
            .flat_map(|rule| rule.all_of.iter_mut().map(|c| &mut c.probe))
            .chain(self.pathway.iter_mut().flat_map(|item| item.required_probes.iter_mut()));
        for probe in refs {
            probe.id = normalize_probe_id(&probe.id);
        }
    }

    fn validate(&self) -> Result<(), ClinicalError> {
        let fail = |msg: String| Err(ClinicalError::catalog(format!("{}: {}", self.case_id, msg)));

        if self.case_id.trim().is_empty() {
            return Err(ClinicalError::catalog("case_id must not be empty"));
        }
        for (id, spec) in self.questions.iter().chain(self.tests.iter()) {
            if !(spec.severity.is_finite() && spec.severity > 0.0) {
                return fail(format!("probe '{}' has non-positive severity", id));
            }
            if let ClinicalValue::Categorical { value } = &spec.value {
                if spec.alternatives.iter().any(|a| a.eq_ignore_ascii_case(value)) {
                    return fail(format!("probe '{}' lists its canonical value as an alternative", id));
                }
            }
        }
        for rule in &self.red_flags {
            if rule.all_of.is_empty() {
                return fail(format!("red flag '{}' has no conditions", rule.id));
            }
            for condition in &rule.all_of {
                if self.probe(condition.probe.kind, &condition.probe.id).is_none() {
                    return fail(format!("red flag '{}' references unknown {}", rule.id, condition.probe));
                }
            }
        }
        for test in &self.key_tests {
            if !self.tests.contains_key(test) {
                return fail(format!("key test '{}' is not orderable", test));
            }
        }
        for item in &self.pathway {
            if item.required_probes.is_empty() {
                return fail(format!("pathway item '{}' has no required probes", item.code));
            }
            for probe in &item.required_probes {
                if self.probe(probe.kind, &probe.id).is_none() {
                    return fail(format!("pathway item '{}' references unknown {}", item.code, probe));
                }
            }
        }
        Ok(())
    }
}

/// Read-only library of cases, shared across sessions.
#[derive(Debug, Clone)]
pub struct CaseCatalog {
    cases: BTreeMap<String, Arc<CaseDefinition>>,
}

impl CaseCatalog {
    /// Builds a catalog from already-parsed cases.
    pub fn from_cases(cases: impl IntoIterator<Item = CaseDefinition>) -> Result<Self, ClinicalError> {
        let mut map = BTreeMap::new();
        for mut case in cases {
            case.normalize();
            case.validate()?;
            let id = case.case_id.clone();
            if map.insert(id.clone(), Arc::new(case)).is_some() {
                return Err(ClinicalError::catalog(format!("duplicate case id {}", id)));
            }
        }
        if map.is_empty() {
            return Err(ClinicalError::catalog("catalog is empty"));
        }
        Ok(Self { cases: map })
    }

    /// The embedded five-case catalog.
    pub fn builtin() -> Result<Self, ClinicalError> {
        let cases = BUILTIN_CASES
            .iter()
            .map(|(_, json)| CaseDefinition::from_json(json))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_cases(cases)
    }

    /// Loads every `*.json` file in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ClinicalError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| ClinicalError::catalog(format!("{}: {}", dir.display(), e)))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut cases = Vec::with_capacity(paths.len());
        for path in paths {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| ClinicalError::catalog(format!("{}: {}", path.display(), e)))?;
            let case = CaseDefinition::from_json(&json)
                .map_err(|e| ClinicalError::catalog(format!("{}: {}", path.display(), e)))?;
            debug!(case_id = %case.case_id, path = %path.display(), "Loaded case");
            cases.push(case);
        }
        Self::from_cases(cases)
    }

    /// Looks up a case.
    pub fn get(&self, case_id: &str) -> Result<Arc<CaseDefinition>, ClinicalError> {
        self.cases
            .get(case_id.trim())
            .cloned()
            .ok_or_else(|| ClinicalError::unknown_case(case_id))
    }

    pub fn contains(&self, case_id: &str) -> bool {
        self.cases.contains_key(case_id.trim())
    }

    /// Case ids in sorted order.
    pub fn case_ids(&self) -> Vec<String> {
        self.cases.keys().cloned().collect()
    }

    pub fn cases(&self) -> impl Iterator<Item = &Arc<CaseDefinition>> {
        self.cases.values()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// Collects the probes referenced by a case's rules and pathway.
pub fn referenced_probes(case: &CaseDefinition) -> BTreeSet<ProbeRef> {
    case.red_flags
        .iter()
        .flat_map(|rule| rule.all_of.iter().map(|c| c.probe.clone()))
        .chain(case.pathway.iter().flat_map(|item| item.required_probes.iter().cloned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = CaseCatalog::builtin().unwrap();
        assert_eq!(
            catalog.case_ids(),
            vec!["abd_001", "chest_pain_001", "resp_001", "stroke_001", "uti_001"]
        );
        for (id, _) in BUILTIN_CASES {
            assert!(catalog.contains(id));
        }
    }

    #[test]
    fn test_unknown_case() {
        let catalog = CaseCatalog::builtin().unwrap();
        assert_eq!(
            catalog.get("nope_999").unwrap_err(),
            ClinicalError::UnknownCase("nope_999".to_string())
        );
    }

    #[test]
    fn test_probe_lookup_is_case_insensitive() {
        let catalog = CaseCatalog::builtin().unwrap();
        let case = catalog.get("chest_pain_001").unwrap();
        assert!(case.probe(ProbeKind::Test, " ECG ").is_some());
        assert!(case.probe(ProbeKind::Question, "ecg").is_none());
        assert!(case.is_key_test("Troponin"));
        assert!(!case.is_key_test("chest_xray"));
    }

    #[test]
    fn test_predicates() {
        let st = ClinicalValue::categorical("ST elevation in II, III, aVF");
        assert!(Predicate::Contains("st elevation".into()).holds(&st));
        assert!(!Predicate::Equals("st elevation".into()).holds(&st));
        assert!(!Predicate::AtLeast(1.0).holds(&st));

        let trop = ClinicalValue::numeric(2.4, "ng/mL");
        assert!(Predicate::AtLeast(0.5).holds(&trop));
        assert!(!Predicate::AtMost(0.5).holds(&trop));
    }

    #[test]
    fn test_rejects_dangling_red_flag_reference() {
        let json = r#"{
            "case_id": "bad_001",
            "true_diagnosis": "x",
            "tests": { "ecg": { "value": { "type": "categorical", "value": "normal" } } },
            "red_flags": [{
                "id": "r", "description": "d",
                "all_of": [{ "probe": { "kind": "test", "id": "mri" }, "predicate": { "contains": "mass" } }]
            }],
            "treatment_plan": "p",
            "emergency_pathway": "e"
        }"#;
        let err = CaseDefinition::from_json(json).unwrap_err();
        assert!(matches!(err, ClinicalError::Catalog(msg) if msg.contains("mri")));
    }

    #[test]
    fn test_rejects_canonical_value_among_alternatives() {
        let json = r#"{
            "case_id": "bad_002",
            "true_diagnosis": "x",
            "tests": { "ecg": {
                "value": { "type": "categorical", "value": "normal" },
                "alternatives": ["Normal"]
            } },
            "treatment_plan": "p",
            "emergency_pathway": "e"
        }"#;
        assert!(CaseDefinition::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_duplicate_and_empty_catalogs() {
        let catalog = CaseCatalog::builtin().unwrap();
        let case = (*catalog.get("resp_001").unwrap()).clone();
        assert!(CaseCatalog::from_cases(vec![case.clone(), case]).is_err());
        assert!(CaseCatalog::from_cases(Vec::new()).is_err());
    }

    #[test]
    fn test_missing_field_is_catalog_error() {
        let err = CaseDefinition::from_json(r#"{ "case_id": "x" }"#).unwrap_err();
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_from_dir_missing_directory() {
        let err = CaseCatalog::from_dir("/definitely/not/here").unwrap_err();
        assert!(matches!(err, ClinicalError::Catalog(_)));
    }
}
