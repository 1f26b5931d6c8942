//! Declared tool capability set.

use medworld_env::{ToolCall, ToolKind};
use std::collections::BTreeSet;

/// The tools an orchestrator is allowed to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRegistry {
    declared: BTreeSet<ToolKind>,
}

impl ToolRegistry {
    pub fn new(kinds: impl IntoIterator<Item = ToolKind>) -> Self {
        Self {
            declared: kinds.into_iter().collect(),
        }
    }

    /// `ask_question`, `order_test` and `recommend_plan`.
    pub fn clinical() -> Self {
        Self::new(ToolKind::all())
    }

    /// Resolves a call to a declared tool, or `None` if it is outside the set.
    pub fn resolve(&self, call: &ToolCall) -> Option<ToolKind> {
        call.kind().filter(|kind| self.declared.contains(kind))
    }

    pub fn is_registered(&self, call: &ToolCall) -> bool {
        self.resolve(call).is_some()
    }

    pub fn capabilities(&self) -> Vec<&'static str> {
        self.declared.iter().map(|k| k.name()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::clinical()
    }
}
