//! Plans and plan nodes
//!
//! A [`Plan`] is built once per execution request and never mutated while
//! running. Node executions hold an `Arc` to the plan node they run; only a
//! retry with new parameters produces a different node value, through
//! [`PlanNode::clone_for_retry`].

use crate::{
    AdviserType, Dimension, FacilitatorType, OrchestrationError, OrchestrationResult, PlanNodeId,
    RefObject, StepType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ── Obtainments ──────────────────────────────────────────────────────

/// A facilitator the node asks for, with its configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorObtainment {
    #[serde(rename = "type")]
    pub facilitator_type: FacilitatorType,
    #[serde(default)]
    pub parameters: Value,
}

impl FacilitatorObtainment {
    pub fn new(facilitator_type: FacilitatorType) -> Self {
        Self {
            facilitator_type,
            parameters: Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// An adviser consulted after the node finishes, with its configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviserObtainment {
    #[serde(rename = "type")]
    pub adviser_type: AdviserType,
    #[serde(default)]
    pub parameters: Value,
}

impl AdviserObtainment {
    pub fn new(adviser_type: AdviserType) -> Self {
        Self {
            adviser_type,
            parameters: Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A timeout attached to the node, in one dimension
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutObtainment {
    pub dimension: Dimension,
    #[serde(default)]
    pub parameters: Value,
}

impl TimeoutObtainment {
    pub fn new(dimension: Dimension, parameters: Value) -> Self {
        Self {
            dimension,
            parameters,
        }
    }
}

/// How a skipped node is presented to graph consumers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipType {
    #[default]
    Noop,
    SkipNode,
    SkipTree,
}

// ── Plan Node ────────────────────────────────────────────────────────

/// One node of a plan
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    pub uuid: PlanNodeId,
    pub name: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub step_type: StepType,
    /// Step-specific parameters; opaque to the engine
    #[serde(default)]
    pub step_parameters: Value,
    #[serde(default)]
    pub ref_objects: Vec<RefObject>,
    #[serde(default)]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    #[serde(default)]
    pub facilitator_obtainments: Vec<FacilitatorObtainment>,
    #[serde(default)]
    pub timeout_obtainments: Vec<TimeoutObtainment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_condition: Option<String>,
    #[serde(default)]
    pub skip_graph_type: SkipType,
}

impl PlanNode {
    /// Create a node whose name and identifier default to its id
    pub fn new(uuid: impl Into<PlanNodeId>, step_type: StepType) -> Self {
        let uuid = uuid.into();
        Self {
            name: uuid.to_string(),
            identifier: uuid.to_string(),
            uuid,
            group: None,
            step_type,
            step_parameters: Value::Null,
            ref_objects: Vec::new(),
            adviser_obtainments: Vec::new(),
            facilitator_obtainments: Vec::new(),
            timeout_obtainments: Vec::new(),
            skip_condition: None,
            skip_graph_type: SkipType::Noop,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn with_ref(mut self, ref_object: RefObject) -> Self {
        self.ref_objects.push(ref_object);
        self
    }

    pub fn with_adviser(mut self, obtainment: AdviserObtainment) -> Self {
        self.adviser_obtainments.push(obtainment);
        self
    }

    pub fn with_facilitator(mut self, obtainment: FacilitatorObtainment) -> Self {
        self.facilitator_obtainments.push(obtainment);
        self
    }

    pub fn with_timeout(mut self, obtainment: TimeoutObtainment) -> Self {
        self.timeout_obtainments.push(obtainment);
        self
    }

    pub fn with_skip_condition(mut self, condition: impl Into<String>) -> Self {
        self.skip_condition = Some(condition.into());
        self
    }

    pub fn with_skip_graph_type(mut self, skip_type: SkipType) -> Self {
        self.skip_graph_type = skip_type;
        self
    }

    /// Same identity, different parameters
    pub fn clone_for_retry(&self, new_parameters: Value) -> PlanNode {
        PlanNode {
            step_parameters: new_parameters,
            ..self.clone()
        }
    }
}

// ── Plan ─────────────────────────────────────────────────────────────

/// Immutable DAG of plan nodes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanDocument", into = "PlanDocument")]
pub struct Plan {
    nodes: HashMap<PlanNodeId, Arc<PlanNode>>,
    root_node_ids: Vec<PlanNodeId>,
    created_at: DateTime<Utc>,
}

/// Serialized form of a plan: a flat list of nodes plus the roots
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanDocument {
    root_node_ids: Vec<PlanNodeId>,
    nodes: Vec<PlanNode>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

impl Plan {
    /// An empty plan with the given root
    pub fn new(root: impl Into<PlanNodeId>) -> Self {
        Self {
            nodes: HashMap::new(),
            root_node_ids: vec![root.into()],
            created_at: Utc::now(),
        }
    }

    /// Build a plan from its roots and nodes, then validate it
    pub fn from_nodes(
        root_node_ids: Vec<PlanNodeId>,
        nodes: impl IntoIterator<Item = PlanNode>,
    ) -> OrchestrationResult<Self> {
        let mut plan = Self {
            nodes: HashMap::new(),
            root_node_ids,
            created_at: Utc::now(),
        };
        for node in nodes {
            plan.add_node(node)?;
        }
        plan.validate()?;
        Ok(plan)
    }

    /// Add another root; roots run as independent chains
    pub fn add_root(&mut self, root: impl Into<PlanNodeId>) {
        self.root_node_ids.push(root.into());
    }

    pub fn add_node(&mut self, node: PlanNode) -> OrchestrationResult<()> {
        if self.nodes.contains_key(&node.uuid) {
            return Err(OrchestrationError::DuplicatePlanNode(node.uuid));
        }
        self.nodes.insert(node.uuid.clone(), Arc::new(node));
        Ok(())
    }

    pub fn node(&self, id: &PlanNodeId) -> OrchestrationResult<&Arc<PlanNode>> {
        self.nodes
            .get(id)
            .ok_or_else(|| OrchestrationError::PlanNodeNotFound(id.clone()))
    }

    pub fn contains(&self, id: &PlanNodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn root_node_ids(&self) -> &[PlanNodeId] {
        &self.root_node_ids
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<PlanNode>> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Structural checks: at least one root, every root present, no
    /// root listed twice
    pub fn validate(&self) -> OrchestrationResult<()> {
        if self.root_node_ids.is_empty() {
            return Err(OrchestrationError::InvalidPlan(
                "plan has no root nodes".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for root in &self.root_node_ids {
            if !seen.insert(root) {
                return Err(OrchestrationError::InvalidPlan(format!(
                    "root node listed twice: {}",
                    root
                )));
            }
            if !self.nodes.contains_key(root) {
                return Err(OrchestrationError::PlanNodeNotFound(root.clone()));
            }
        }
        Ok(())
    }
}

impl TryFrom<PlanDocument> for Plan {
    type Error = OrchestrationError;

    fn try_from(doc: PlanDocument) -> Result<Self, Self::Error> {
        let mut plan = Plan::from_nodes(doc.root_node_ids, doc.nodes)?;
        plan.created_at = doc.created_at;
        Ok(plan)
    }
}

impl From<Plan> for PlanDocument {
    fn from(plan: Plan) -> Self {
        let mut nodes: Vec<PlanNode> = plan
            .nodes
            .into_values()
            .map(|n| Arc::try_unwrap(n).unwrap_or_else(|shared| (*shared).clone()))
            .collect();
        nodes.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        PlanDocument {
            root_node_ids: plan.root_node_ids,
            nodes,
            created_at: plan.created_at,
        }
    }
}
