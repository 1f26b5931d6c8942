//! Demographic de-identification for snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What to do with one demographic field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStrategy {
    Keep,
    Remove,
    /// Bucket a numeric age; `90+` cap
    AgeBucket { bucket_size: u32 },
    /// Keep the first character, star the rest
    Mask,
}

/// Field rules; fields without a rule are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizerConfig {
    pub rules: BTreeMap<String, FieldStrategy>,
    pub enabled: bool,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        let rules = [
            ("age", FieldStrategy::AgeBucket { bucket_size: 10 }),
            ("sex", FieldStrategy::Keep),
            ("name", FieldStrategy::Remove),
            ("id_number", FieldStrategy::Remove),
            ("phone", FieldStrategy::Remove),
            ("address", FieldStrategy::Remove),
        ]
        .into_iter()
        .map(|(field, strategy)| (field.to_string(), strategy))
        .collect();
        Self { rules, enabled: true }
    }
}

impl SanitizerConfig {
    /// Passes demographics through untouched.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_rule(mut self, field: &str, strategy: FieldStrategy) -> Self {
        self.rules.insert(field.to_string(), strategy);
        self
    }
}

/// Applies the configured rules to a demographics map.
pub fn sanitize_demographics(
    demographics: &BTreeMap<String, Value>,
    config: &SanitizerConfig,
) -> BTreeMap<String, Value> {
    if !config.enabled {
        return demographics.clone();
    }

    demographics
        .iter()
        .filter_map(|(key, value)| {
            let sanitized = match config.rules.get(key) {
                None | Some(FieldStrategy::Keep) => Some(value.clone()),
                Some(FieldStrategy::Remove) => None,
                Some(FieldStrategy::AgeBucket { bucket_size }) => {
                    Some(Value::String(bucket_age(value, *bucket_size)))
                }
                Some(FieldStrategy::Mask) => Some(Value::String(mask(value))),
            };
            sanitized.map(|v| (key.clone(), v))
        })
        .collect()
}

fn bucket_age(value: &Value, bucket_size: u32) -> String {
    let age = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let size = i64::from(bucket_size.max(1));
    match age {
        Some(a) if a >= 90 => "90+".to_string(),
        Some(a) if a >= 0 => {
            let lower = (a / size) * size;
            format!("{}-{}", lower, (lower + size - 1).min(89))
        }
        _ => "unknown".to_string(),
    }
}

fn mask(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if text.chars().count() > 1 => {
            let mut out = first.to_string();
            out.extend(chars.map(|_| '*'));
            out
        }
        _ => "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demographics(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn age_of(age: Value) -> Value {
        let out = sanitize_demographics(&demographics(json!({ "age": age })), &SanitizerConfig::default());
        out["age"].clone()
    }

    #[test]
    fn test_age_buckets() {
        assert_eq!(age_of(json!(0)), json!("0-9"));
        assert_eq!(age_of(json!(9)), json!("0-9"));
        assert_eq!(age_of(json!(62)), json!("60-69"));
        assert_eq!(age_of(json!(89)), json!("80-89"));
        assert_eq!(age_of(json!(90)), json!("90+"));
        assert_eq!(age_of(json!(105)), json!("90+"));
        assert_eq!(age_of(json!("34")), json!("30-39"));
    }

    #[test]
    fn test_uneven_bucket_stops_below_cap() {
        assert_eq!(bucket_age(&json!(80), 25), "75-89");
        assert_eq!(bucket_age(&json!(74), 25), "50-74");
        assert_eq!(bucket_age(&json!(90), 25), "90+");
    }

    #[test]
    fn test_invalid_ages() {
        assert_eq!(age_of(json!(-5)), json!("unknown"));
        assert_eq!(age_of(json!("old")), json!("unknown"));
        assert_eq!(age_of(Value::Null), json!("unknown"));
    }

    #[test]
    fn test_identifiers_removed_and_unknown_fields_kept() {
        let input = demographics(json!({
            "age": 30, "name": "R. Whitfield", "phone": "555-0142",
            "address": "12 Harbour Lane", "id_number": "A-1", "blood_type": "A+"
        }));
        let out = sanitize_demographics(&input, &SanitizerConfig::default());
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["age", "blood_type"]);
    }

    #[test]
    fn test_mask_and_disabled() {
        let input = demographics(json!({ "name": "Lindqvist" }));
        let config = SanitizerConfig::default().with_rule("name", FieldStrategy::Mask);
        assert_eq!(sanitize_demographics(&input, &config)["name"], json!("L********"));

        let out = sanitize_demographics(&input, &SanitizerConfig::disabled());
        assert_eq!(out, input);
    }
}
