//! Step contracts
//!
//! A [`Step`] is the unit of business logic the engine drives. It declares
//! which execution modes it supports by returning an executable for each
//! one; the engine picks the mode through facilitation and then calls only
//! that executable. Every method receives a [`StepContext`] carrying the
//! node's ambiance, parameters and resolved inputs.
//!
//! Steps never decide what happens after they finish. A returned error is
//! converted into a failed [`StepResponse`] and handed to the advisers.

use crate::registry::Registries;
use crate::resolver::OutputScope;
use async_trait::async_trait;
use orchestration_types::{
    Ambiance, CorrelationId, OrchestrationError, OrchestrationResult, OutputInstanceId, PlanNode,
    PlanNodeId, RefObject, RefType, ResponseDataMap, StepResponse, StepResult, TaskChainLink,
    TaskRequest,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

// ── Step ─────────────────────────────────────────────────────────────

/// A registered step implementation
pub trait Step: Send + Sync {
    fn as_sync(&self) -> Option<&dyn SyncExecutable> {
        None
    }

    fn as_async(&self) -> Option<&dyn AsyncExecutable> {
        None
    }

    fn as_task(&self) -> Option<&dyn TaskExecutable> {
        None
    }

    fn as_task_chain(&self) -> Option<&dyn TaskChainExecutable> {
        None
    }

    fn as_child(&self) -> Option<&dyn ChildExecutable> {
        None
    }

    fn as_children(&self) -> Option<&dyn ChildrenExecutable> {
        None
    }

    fn as_child_chain(&self) -> Option<&dyn ChildChainExecutable> {
        None
    }

    /// Plan nodes named in `parameters`; checked when a plan is validated
    fn referenced_nodes(&self, _parameters: &Value) -> Vec<PlanNodeId> {
        Vec::new()
    }
}

// ── Executables ──────────────────────────────────────────────────────

/// Computes its response inline
#[async_trait]
pub trait SyncExecutable: Send + Sync {
    async fn execute_sync(&self, ctx: &StepContext) -> StepResult<StepResponse>;
}

/// Callback ids an async step waits on
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AsyncResponse {
    pub callback_ids: Vec<CorrelationId>,
}

impl AsyncResponse {
    pub fn new(callback_ids: Vec<CorrelationId>) -> Self {
        Self { callback_ids }
    }
}

/// Suspends until every callback id it returned has been answered
#[async_trait]
pub trait AsyncExecutable: Send + Sync {
    async fn execute_async(&self, ctx: &StepContext) -> StepResult<AsyncResponse>;

    async fn handle_async_response(
        &self,
        ctx: &StepContext,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse>;

    /// Called when the node is aborted or expired while waiting
    async fn handle_abort(&self, _ctx: &StepContext, _callback_ids: &[CorrelationId]) {}
}

/// Delegates one task to the task executor
#[async_trait]
pub trait TaskExecutable: Send + Sync {
    async fn obtain_task(&self, ctx: &StepContext) -> StepResult<TaskRequest>;

    async fn handle_task_result(
        &self,
        ctx: &StepContext,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse>;
}

/// Delegates a sequence of tasks, one round at a time
#[async_trait]
pub trait TaskChainExecutable: Send + Sync {
    async fn start_chain_link(&self, ctx: &StepContext) -> StepResult<TaskChainLink>;

    /// Next round, given the previous round's pass-through data and result
    async fn next_chain_link(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        responses: &ResponseDataMap,
    ) -> StepResult<TaskChainLink>;

    async fn finalize_chain(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse>;
}

/// One child to spawn, plus values published to its subtree
#[derive(Clone, Debug, PartialEq)]
pub struct ChildRequest {
    pub child_node_id: PlanNodeId,
    pub additional_inputs: BTreeMap<String, Value>,
}

impl ChildRequest {
    pub fn new(child_node_id: impl Into<PlanNodeId>) -> Self {
        Self {
            child_node_id: child_node_id.into(),
            additional_inputs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.additional_inputs.insert(name.into(), value);
        self
    }
}

/// Spawns exactly one child and waits for it
#[async_trait]
pub trait ChildExecutable: Send + Sync {
    async fn obtain_child(&self, ctx: &StepContext) -> StepResult<ChildRequest>;

    async fn handle_child_response(
        &self,
        _ctx: &StepContext,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse> {
        Ok(StepResponse::from_child_responses(responses))
    }
}

/// Children to spawn in parallel
#[derive(Clone, Debug, PartialEq)]
pub struct ChildrenRequest {
    pub children: Vec<PlanNodeId>,
    /// Discontinue the remaining children once one is not positive
    pub fail_fast: bool,
    /// Upper bound on concurrently running children
    pub max_concurrency: Option<usize>,
}

impl ChildrenRequest {
    pub fn new(children: Vec<PlanNodeId>) -> Self {
        Self {
            children,
            fail_fast: false,
            max_concurrency: None,
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }
}

/// Spawns several children and waits for all of them
#[async_trait]
pub trait ChildrenExecutable: Send + Sync {
    async fn obtain_children(&self, ctx: &StepContext) -> StepResult<ChildrenRequest>;

    async fn handle_children_response(
        &self,
        _ctx: &StepContext,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse> {
        Ok(StepResponse::from_child_responses(responses))
    }
}

/// One link of a child chain
#[derive(Clone, Debug, PartialEq)]
pub struct ChildChainLink {
    pub child_node_id: PlanNodeId,
    pub pass_through: Value,
    /// No further link follows this one
    pub last_link: bool,
}

/// Spawns children one at a time, deciding each after the previous ends
#[async_trait]
pub trait ChildChainExecutable: Send + Sync {
    async fn start_child_chain(&self, ctx: &StepContext) -> StepResult<ChildChainLink>;

    async fn next_child_link(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        responses: &ResponseDataMap,
    ) -> StepResult<ChildChainLink>;

    async fn finalize_child_chain(
        &self,
        _ctx: &StepContext,
        _pass_through: &Value,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse> {
        Ok(StepResponse::from_child_responses(responses))
    }
}

// ── Context ──────────────────────────────────────────────────────────

/// A resolved reference, or why it could not be resolved
#[derive(Clone, Debug, PartialEq)]
pub enum StepInput {
    Value(Value),
    Missing(String),
}

/// A node's `refObjects`, resolved before invocation
///
/// Missing references do not fail the node up front; the step sees a
/// resolution error when it asks for one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepInputPackage {
    inputs: BTreeMap<String, StepInput>,
}

impl StepInputPackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, input: StepInput) {
        self.inputs.insert(name.into(), input);
    }

    pub fn get(&self, name: &str) -> OrchestrationResult<&Value> {
        match self.inputs.get(name) {
            Some(StepInput::Value(value)) => Ok(value),
            Some(StepInput::Missing(reason)) => Err(OrchestrationError::Resolution {
                name: name.to_string(),
                reason: reason.clone(),
            }),
            None => Err(OrchestrationError::Resolution {
                name: name.to_string(),
                reason: "not declared as a reference of this node".to_string(),
            }),
        }
    }

    pub fn get_optional(&self, name: &str) -> Option<&Value> {
        match self.inputs.get(name) {
            Some(StepInput::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Resolve every reference of `plan_node` from `ambiance`
    pub(crate) async fn resolve(
        registries: &Registries,
        ambiance: &Ambiance,
        plan_node: &PlanNode,
    ) -> OrchestrationResult<Self> {
        let mut package = Self::new();
        for ref_object in &plan_node.ref_objects {
            let resolver = registries.resolvers.obtain(&ref_object.ref_type)?;
            let input = match resolver.resolve(ambiance, ref_object).await {
                Ok(value) => StepInput::Value(value),
                Err(OrchestrationError::Resolution { reason, .. }) => StepInput::Missing(reason),
                Err(err) => return Err(err),
            };
            package.insert(ref_object.name.clone(), input);
        }
        Ok(package)
    }
}

/// Everything a step sees while it runs
#[derive(Clone)]
pub struct StepContext {
    pub ambiance: Ambiance,
    pub parameters: Value,
    pub inputs: StepInputPackage,
    pub plan_node: Arc<PlanNode>,
    registries: Arc<Registries>,
}

impl StepContext {
    pub fn new(
        ambiance: Ambiance,
        plan_node: Arc<PlanNode>,
        inputs: StepInputPackage,
        registries: Arc<Registries>,
    ) -> Self {
        Self {
            ambiance,
            parameters: plan_node.step_parameters.clone(),
            inputs,
            plan_node,
            registries,
        }
    }

    /// Step parameters decoded into a typed struct
    pub fn parameters_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.parameters.clone())
    }

    pub async fn resolve(&self, ref_object: &RefObject) -> OrchestrationResult<Value> {
        self.registries
            .resolvers
            .obtain(&ref_object.ref_type)?
            .resolve(&self.ambiance, ref_object)
            .await
    }

    pub async fn resolve_optional(&self, ref_object: &RefObject) -> OrchestrationResult<Option<Value>> {
        self.registries
            .resolvers
            .obtain(&ref_object.ref_type)?
            .resolve_optional(&self.ambiance, ref_object)
            .await
    }

    /// Publish a sweeping output visible to later siblings and their subtrees
    pub async fn publish_output(&self, name: &str, value: Value) -> OrchestrationResult<OutputInstanceId> {
        self.publish(name, value, OutputScope::Siblings).await
    }

    /// Publish a sweeping output visible under the nearest `group` level
    pub async fn publish_group_output(
        &self,
        name: &str,
        value: Value,
        group: &str,
    ) -> OrchestrationResult<OutputInstanceId> {
        self.publish(name, value, OutputScope::Group(group.to_string()))
            .await
    }

    async fn publish(
        &self,
        name: &str,
        value: Value,
        scope: OutputScope,
    ) -> OrchestrationResult<OutputInstanceId> {
        self.registries
            .resolvers
            .obtain(&RefType::SWEEPING_OUTPUT)?
            .consume(&self.ambiance, name, value, scope)
            .await
    }
}
