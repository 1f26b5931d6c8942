//! Red-flag evaluation and the sticky emergency override.

use crate::catalog::{CaseDefinition, ProbeRef, RedFlagRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Pure predicate over a case's red-flag rules.
///
/// A rule holds once every probe it references has been issued and every
/// condition holds on the canonical value. Observed (possibly corrupted)
/// values are never consulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyEvaluator;

impl SafetyEvaluator {
    /// Rules that currently hold, in declaration order.
    pub fn holding_rules<'a>(case: &'a CaseDefinition, issued: &BTreeSet<ProbeRef>) -> Vec<&'a RedFlagRule> {
        case.red_flags
            .iter()
            .filter(|rule| Self::rule_holds(case, rule, issued))
            .collect()
    }

    /// Whether any red flag holds.
    pub fn evaluate(case: &CaseDefinition, issued: &BTreeSet<ProbeRef>) -> bool {
        case.red_flags
            .iter()
            .any(|rule| Self::rule_holds(case, rule, issued))
    }

    fn rule_holds(case: &CaseDefinition, rule: &RedFlagRule, issued: &BTreeSet<ProbeRef>) -> bool {
        rule.all_of.iter().all(|condition| {
            issued.contains(&condition.probe)
                && case
                    .probe(condition.probe.kind, &condition.probe.id)
                    .map(|spec| condition.predicate.holds(&spec.value))
                    .unwrap_or(false)
        })
    }
}

/// Safety mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    #[default]
    Normal,
    Emergency,
}

impl std::fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyMode::Normal => write!(f, "normal"),
            SafetyMode::Emergency => write!(f, "emergency"),
        }
    }
}

/// One-way `Normal -> Emergency` state machine attached to a session.
///
/// `trip` is the only transition; there is no way back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyOverride {
    mode: SafetyMode,
    tripped_at_turn: Option<usize>,
}

impl SafetyOverride {
    /// Enters emergency mode. Returns `true` only on the first trip.
    pub fn trip(&mut self, turn_index: usize) -> bool {
        match self.mode {
            SafetyMode::Normal => {
                self.mode = SafetyMode::Emergency;
                self.tripped_at_turn = Some(turn_index);
                true
            }
            SafetyMode::Emergency => false,
        }
    }

    pub fn mode(&self) -> SafetyMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.mode == SafetyMode::Emergency
    }

    /// Turn index at which the override tripped.
    pub fn tripped_at(&self) -> Option<usize> {
        self.tripped_at_turn
    }
}
