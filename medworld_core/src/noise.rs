//! Layered noise profile and its resolver.
//!
//! ```text
//! case_qa / case_test   (case + probe)      most specific
//!        qa / test      (probe kind + id)
//!        case           (case id)
//!        default
//!        FALLBACK_NOISE                      least specific
//! ```
//!
//! Resolution is a pure lookup: the first populated layer wins, absent
//! layers fall through, and the result is always clamped to [0, 1].

use crate::catalog::normalize_probe_id;
use crate::error::ClinicalError;
use medworld_env::ProbeKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Probability used when no layer is populated.
pub const FALLBACK_NOISE: f64 = 0.0;

/// Six override layers, each optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,

    /// By case id
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub case: BTreeMap<String, f64>,

    /// By test id
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub test: BTreeMap<String, f64>,

    /// By case id, then test id
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub case_test: BTreeMap<String, BTreeMap<String, f64>>,

    /// By question id
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub qa: BTreeMap<String, f64>,

    /// By case id, then question id
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub case_qa: BTreeMap<String, BTreeMap<String, f64>>,
}

impl NoiseProfile {
    /// A profile with every layer empty (resolves to the fallback).
    pub fn none() -> Self {
        Self::default()
    }

    /// A profile with only the default layer.
    pub fn uniform(p: f64) -> Self {
        Self {
            default: Some(p),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, p: f64) -> Self {
        self.default = Some(p);
        self
    }

    pub fn with_case(mut self, case_id: &str, p: f64) -> Self {
        self.case.insert(case_id.to_string(), p);
        self
    }

    /// Sets the probe-kind layer (`test` or `qa`).
    pub fn with_probe(mut self, kind: ProbeKind, probe_id: &str, p: f64) -> Self {
        self.kind_layer_mut(kind).insert(normalize_probe_id(probe_id), p);
        self
    }

    /// Sets the case + probe layer (`case_test` or `case_qa`).
    pub fn with_case_probe(mut self, case_id: &str, kind: ProbeKind, probe_id: &str, p: f64) -> Self {
        let layer = match kind {
            ProbeKind::Question => &mut self.case_qa,
            ProbeKind::Test => &mut self.case_test,
        };
        layer
            .entry(case_id.to_string())
            .or_default()
            .insert(normalize_probe_id(probe_id), p);
        self
    }

    /// Parses a profile from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, ClinicalError> {
        let profile: NoiseProfile =
            serde_json::from_str(json).map_err(|e| ClinicalError::invalid(format!("noise profile: {}", e)))?;
        let profile = profile.normalized();
        profile.validate()?;
        Ok(profile)
    }

    /// Re-keys every probe layer by normalized probe id.
    pub fn normalized(mut self) -> Self {
        fn rekey(layer: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
            layer.into_iter().map(|(id, p)| (normalize_probe_id(&id), p)).collect()
        }
        fn rekey_nested(layer: BTreeMap<String, BTreeMap<String, f64>>) -> BTreeMap<String, BTreeMap<String, f64>> {
            layer.into_iter().map(|(case, probes)| (case, rekey(probes))).collect()
        }

        self.test = rekey(std::mem::take(&mut self.test));
        self.qa = rekey(std::mem::take(&mut self.qa));
        self.case_test = rekey_nested(std::mem::take(&mut self.case_test));
        self.case_qa = rekey_nested(std::mem::take(&mut self.case_qa));
        self
    }

    /// Rejects probabilities outside [0, 1] (including NaN).
    pub fn validate(&self) -> Result<(), ClinicalError> {
        let nested = |layer: &BTreeMap<String, BTreeMap<String, f64>>| -> Vec<(String, f64)> {
            layer
                .iter()
                .flat_map(|(case, probes)| probes.iter().map(move |(id, p)| (format!("{}.{}", case, id), *p)))
                .collect()
        };
        let flat = |name: &str, layer: &BTreeMap<String, f64>| -> Vec<(String, f64)> {
            layer.iter().map(|(k, p)| (format!("{}.{}", name, k), *p)).collect()
        };

        let mut entries: Vec<(String, f64)> = Vec::new();
        if let Some(p) = self.default {
            entries.push(("default".to_string(), p));
        }
        entries.extend(flat("case", &self.case));
        entries.extend(flat("test", &self.test));
        entries.extend(flat("qa", &self.qa));
        entries.extend(nested(&self.case_test).into_iter().map(|(k, p)| (format!("case_test.{}", k), p)));
        entries.extend(nested(&self.case_qa).into_iter().map(|(k, p)| (format!("case_qa.{}", k), p)));

        for (key, p) in entries {
            if !(0.0..=1.0).contains(&p) {
                return Err(ClinicalError::invalid(format!(
                    "noise '{}' = {} is outside [0, 1]",
                    key, p
                )));
            }
        }
        Ok(())
    }

    /// Effective corruption probability for one probe.
    pub fn resolve(&self, case_id: &str, kind: ProbeKind, probe_id: &str) -> f64 {
        let probe_id = probe_id.trim().to_lowercase();
        let case_probe = match kind {
            ProbeKind::Question => &self.case_qa,
            ProbeKind::Test => &self.case_test,
        };

        let raw = case_probe
            .get(case_id)
            .and_then(|probes| probes.get(&probe_id))
            .or_else(|| self.kind_layer(kind).get(&probe_id))
            .or_else(|| self.case.get(case_id))
            .copied()
            .or(self.default)
            .unwrap_or(FALLBACK_NOISE);

        clamp_probability(raw)
    }

    fn kind_layer(&self, kind: ProbeKind) -> &BTreeMap<String, f64> {
        match kind {
            ProbeKind::Question => &self.qa,
            ProbeKind::Test => &self.test,
        }
    }

    fn kind_layer_mut(&mut self, kind: ProbeKind) -> &mut BTreeMap<String, f64> {
        match kind {
            ProbeKind::Question => &mut self.qa,
            ProbeKind::Test => &mut self.test,
        }
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        FALLBACK_NOISE
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_profile_is_fallback() {
        assert_eq!(NoiseProfile::none().resolve("resp_001", ProbeKind::Test, "cbc"), FALLBACK_NOISE);
    }

    #[test]
    fn test_case_test_override_wins() {
        let profile = NoiseProfile::from_json(
            r#"{ "default": 0.0, "test": { "cbc": 0.3 }, "case_test": { "resp_001": { "cbc": 1.0 } } }"#,
        )
        .unwrap();
        assert_eq!(profile.resolve("resp_001", ProbeKind::Test, "cbc"), 1.0);
        assert_eq!(profile.resolve("abd_001", ProbeKind::Test, "cbc"), 0.3);
        assert_eq!(profile.resolve("resp_001", ProbeKind::Test, "crp"), 0.0);
    }

    #[test]
    fn test_question_and_test_layers_are_separate() {
        let profile = NoiseProfile::none()
            .with_probe(ProbeKind::Question, "onset", 0.9)
            .with_case_probe("uti_001", ProbeKind::Test, "onset", 0.1);
        assert_eq!(profile.resolve("uti_001", ProbeKind::Question, "onset"), 0.9);
        assert_eq!(profile.resolve("uti_001", ProbeKind::Test, "onset"), 0.1);
        assert_eq!(profile.resolve("resp_001", ProbeKind::Test, "onset"), 0.0);
    }

    #[test]
    fn test_noise_keys_match_regardless_of_case_and_padding() {
        let profile = NoiseProfile::from_json(
            r#"{ "test": { "ECG": 1.0 }, "case_qa": { "chest_pain_001": { " Onset ": 0.6 } } }"#,
        )
        .unwrap();
        assert_eq!(profile.resolve("chest_pain_001", ProbeKind::Test, "ecg"), 1.0);
        assert_eq!(profile.resolve("chest_pain_001", ProbeKind::Test, " ECG "), 1.0);
        assert_eq!(profile.resolve("chest_pain_001", ProbeKind::Question, "onset"), 0.6);

        let built = NoiseProfile::none()
            .with_probe(ProbeKind::Test, " ecg ", 1.0)
            .with_case_probe("resp_001", ProbeKind::Question, "\tCough ", 0.4);
        assert_eq!(built.resolve("x", ProbeKind::Test, "ecg"), 1.0);
        assert_eq!(built.resolve("x", ProbeKind::Test, " ecg "), 1.0);
        assert_eq!(built.resolve("resp_001", ProbeKind::Question, "COUGH"), 0.4);
    }

    #[test]
    fn test_normalized_rekeys_deserialized_layers() {
        let raw: NoiseProfile = serde_json::from_str(r#"{ "qa": { "Onset": 0.3 } }"#).unwrap();
        assert_eq!(raw.resolve("c", ProbeKind::Question, "onset"), 0.0);
        assert_eq!(raw.normalized().resolve("c", ProbeKind::Question, "onset"), 0.3);
    }

    #[test]
    fn test_case_layer_beats_default() {
        let profile = NoiseProfile::uniform(0.2).with_case("abd_001", 0.7);
        assert_eq!(profile.resolve("abd_001", ProbeKind::Question, "onset"), 0.7);
        assert_eq!(profile.resolve("resp_001", ProbeKind::Question, "onset"), 0.2);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let err = NoiseProfile::from_json(r#"{ "qa": { "onset": 1.5 } }"#).unwrap_err();
        assert!(matches!(err, ClinicalError::InvalidInput(msg) if msg.contains("qa.onset")));
        assert!(NoiseProfile::uniform(f64::NAN).validate().is_err());
        assert!(NoiseProfile::uniform(1.0).validate().is_ok());
    }

    #[test]
    fn test_resolver_clamps_unvalidated_values() {
        assert_eq!(NoiseProfile::uniform(3.0).resolve("x", ProbeKind::Test, "y"), 1.0);
        assert_eq!(NoiseProfile::uniform(-1.0).resolve("x", ProbeKind::Test, "y"), 0.0);
        assert_eq!(NoiseProfile::uniform(f64::NAN).resolve("x", ProbeKind::Test, "y"), FALLBACK_NOISE);
    }

    fn layer() -> impl Strategy<Value = Option<f64>> {
        proptest::option::of(0.0f64..=1.0)
    }

    proptest! {
        #[test]
        fn test_most_specific_layer_wins(
            default in layer(),
            case in layer(),
            kind_only in layer(),
            case_probe in layer(),
            question in any::<bool>(),
        ) {
            let kind = if question { ProbeKind::Question } else { ProbeKind::Test };
            let mut profile = NoiseProfile::none();
            profile.default = default;
            if let Some(p) = case {
                profile = profile.with_case("c1", p);
            }
            if let Some(p) = kind_only {
                profile = profile.with_probe(kind, "probe", p);
            }
            if let Some(p) = case_probe {
                profile = profile.with_case_probe("c1", kind, "probe", p);
            }

            let expected = case_probe.or(kind_only).or(case).or(default).unwrap_or(FALLBACK_NOISE);
            prop_assert_eq!(profile.resolve("c1", kind, "probe"), expected);

            // Resolution is independent of call order
            let again = profile.resolve("c1", kind, "probe");
            prop_assert_eq!(again, expected);
        }

        #[test]
        fn test_resolved_probability_in_unit_interval(p in any::<f64>()) {
            let resolved = NoiseProfile::uniform(p).resolve("c", ProbeKind::Test, "t");
            prop_assert!((0.0..=1.0).contains(&resolved));
        }
    }
}
