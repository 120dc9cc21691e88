//! Ambiance: the execution context threaded through nested node execution
//!
//! An ambiance is never mutated in place. Descending into a child produces a
//! new value with one more [`Level`]; moving to a sibling or a retry produces
//! a new value whose last level is replaced.

use crate::{NodeExecutionId, PlanExecutionId, PlanNode, PlanNodeId, StepType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Account/org/project scoped key-value pairs handed to delegates
pub type SetupAbstractions = BTreeMap<String, String>;

/// One nesting depth of an execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Node execution running at this depth
    pub runtime_id: NodeExecutionId,
    /// Plan node being executed at this depth
    pub setup_id: PlanNodeId,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub step_type: StepType,
    /// Zero for the first attempt, incremented per retry
    #[serde(default)]
    pub retry_index: u32,
}

impl Level {
    pub fn new(runtime_id: NodeExecutionId, node: &PlanNode) -> Self {
        Self {
            runtime_id,
            setup_id: node.uuid.clone(),
            identifier: node.identifier.clone(),
            group: node.group.clone(),
            step_type: node.step_type.clone(),
            retry_index: 0,
        }
    }
}

/// Execution context for one node execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: PlanExecutionId,
    /// Outermost level first
    pub levels: Vec<Level>,
    #[serde(default)]
    pub setup_abstractions: SetupAbstractions,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Ambiance {
    /// Root ambiance of a plan execution, with no levels
    pub fn new(plan_execution_id: PlanExecutionId, setup_abstractions: SetupAbstractions) -> Self {
        Self {
            plan_execution_id,
            levels: Vec::new(),
            setup_abstractions,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A child ambiance: this one plus `level`
    pub fn fork(&self, level: Level) -> Self {
        let mut child = self.clone();
        child.levels.push(level);
        child
    }

    /// The ambiance of the enclosing scope (this one minus the last level)
    pub fn parent_scope(&self) -> Self {
        let mut parent = self.clone();
        parent.levels.pop();
        parent
    }

    /// A sibling ambiance: same depth, last level replaced by `level`
    pub fn sibling(&self, level: Level) -> Self {
        self.parent_scope().fork(level)
    }

    /// The ambiance for a retry of the current node
    pub fn for_retry(&self, runtime_id: NodeExecutionId) -> Self {
        let mut retried = self.clone();
        if let Some(last) = retried.levels.last_mut() {
            last.runtime_id = runtime_id;
            last.retry_index += 1;
        }
        retried
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn node_execution_id(&self) -> Option<&NodeExecutionId> {
        self.current_level().map(|l| &l.runtime_id)
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Runtime ids of every level, outermost first
    pub fn runtime_ids(&self) -> Vec<NodeExecutionId> {
        self.levels.iter().map(|l| l.runtime_id.clone()).collect()
    }

    /// Index of the nearest level tagged with `group`
    pub fn level_index_for_group(&self, group: &str) -> Option<usize> {
        self.levels
            .iter()
            .rposition(|l| l.group.as_deref() == Some(group))
    }
}
