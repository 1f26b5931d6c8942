//! Clinical pathway checklist progress.

use crate::catalog::{CaseDefinition, PathwayItem, ProbeRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Progress through a case's checklist template.
#[derive(Debug, Clone, Default)]
pub struct PathwayProgress {
    items: Vec<PathwayItem>,
    completed_probes: BTreeSet<ProbeRef>,
}

/// Reportable view of pathway progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathwayStatus {
    pub total: usize,
    pub completed: Vec<String>,
    pub pending: Vec<String>,
    /// Completed share in [0, 1]; 1.0 for an empty template
    pub fraction: f64,
    /// Index of the first pending item
    pub pointer: Option<usize>,
}

impl PathwayProgress {
    pub fn new(items: Vec<PathwayItem>) -> Self {
        Self {
            items,
            completed_probes: BTreeSet::new(),
        }
    }

    pub fn for_case(case: &CaseDefinition) -> Self {
        Self::new(case.pathway.clone())
    }

    /// Records a completed probe. Returns `true` if the probe is mapped to a
    /// checklist item and was not already recorded.
    pub fn record(&mut self, probe: &ProbeRef) -> bool {
        let mapped = self
            .items
            .iter()
            .any(|item| item.required_probes.contains(probe));
        mapped && self.completed_probes.insert(probe.clone())
    }

    fn is_complete(&self, item: &PathwayItem) -> bool {
        item.required_probes
            .iter()
            .all(|probe| self.completed_probes.contains(probe))
    }

    /// Index of the first item not yet complete.
    pub fn pointer(&self) -> Option<usize> {
        self.items.iter().position(|item| !self.is_complete(item))
    }

    pub fn status(&self) -> PathwayStatus {
        let (done, pending): (Vec<&PathwayItem>, Vec<&PathwayItem>) =
            self.items.iter().partition(|item| self.is_complete(item));
        let total = self.items.len();
        PathwayStatus {
            total,
            fraction: if total == 0 { 1.0 } else { done.len() as f64 / total as f64 },
            completed: done.into_iter().map(|i| i.code.clone()).collect(),
            pending: pending.into_iter().map(|i| i.code.clone()).collect(),
            pointer: self.pointer(),
        }
    }
}
