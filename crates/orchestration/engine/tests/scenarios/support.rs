//! Shared fixtures for engine scenarios: task handlers, plan builders and
//! waiting helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use orchestration_engine::{
    EngineBuilder, EngineConfig, EngineHandle, LocalTaskExecutor, OrchestrationEngine,
    TaskHandler,
};
use orchestration_types::{
    AdviserObtainment, AdviserType, Dimension, FacilitatorObtainment, FacilitatorType,
    FailureInfo, NodeExecution, Plan, PlanExecution, PlanExecutionId, PlanNode, PlanNodeId,
    SetupAbstractions, Status, StepType, TimeoutObtainment,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for any single wait in a scenario
pub const LIMIT: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Task handlers
// ---------------------------------------------------------------------------

/// Returns its parameters
pub struct EchoTask;

#[async_trait]
impl TaskHandler for EchoTask {
    async fn run(&self, parameters: Value) -> Result<Value, FailureInfo> {
        Ok(parameters)
    }
}

/// Always fails with `message`
pub struct FailTask;

#[async_trait]
impl TaskHandler for FailTask {
    async fn run(&self, parameters: Value) -> Result<Value, FailureInfo> {
        let message = parameters
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("task failed");
        Err(FailureInfo::application(message))
    }
}

/// Sleeps `millis`, then returns `{"slept": millis}`
pub struct SleepTask;

#[async_trait]
impl TaskHandler for SleepTask {
    async fn run(&self, parameters: Value) -> Result<Value, FailureInfo> {
        let millis = parameters.get("millis").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(json!({ "slept": millis }))
    }
}

/// Fails a fixed number of times, then succeeds
pub struct FlakyTask {
    failures_left: AtomicU32,
}

impl FlakyTask {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl TaskHandler for FlakyTask {
    async fn run(&self, _parameters: Value) -> Result<Value, FailureInfo> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(FailureInfo::application(format!("flaky, {} to go", left)));
        }
        Ok(json!({ "flaky": "done" }))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub fn make_executor(flaky_failures: u32) -> LocalTaskExecutor {
    LocalTaskExecutor::new()
        .with_handler("ECHO", Arc::new(EchoTask))
        .with_handler("FAIL", Arc::new(FailTask))
        .with_handler("SLEEP", Arc::new(SleepTask))
        .with_handler("FLAKY", Arc::new(FlakyTask::new(flaky_failures)))
}

pub fn start_engine() -> EngineHandle {
    start_engine_with(EngineConfig::default(), 0)
}

pub fn start_engine_with(config: EngineConfig, flaky_failures: u32) -> EngineHandle {
    EngineBuilder::new(config)
        .with_task_executor(Arc::new(make_executor(flaky_failures)))
        .start()
        .unwrap()
}

/// Start `plan` and wait for it to finish
pub async fn run_plan(engine: &OrchestrationEngine, plan: Plan) -> PlanExecution {
    let execution = engine
        .start_execution(plan, SetupAbstractions::new())
        .await
        .unwrap();
    finished(engine, &execution.uuid).await
}

pub async fn finished(engine: &OrchestrationEngine, id: &PlanExecutionId) -> PlanExecution {
    tokio::time::timeout(LIMIT, engine.wait_for_plan(id))
        .await
        .expect("plan did not finish in time")
        .unwrap()
}

/// Wait until some execution of `plan_node` reaches `status`
pub async fn wait_for_node(
    engine: &OrchestrationEngine,
    plan_execution_id: &PlanExecutionId,
    plan_node: &str,
    status: Status,
) -> NodeExecution {
    let mut updates = engine.subscribe();
    let target = PlanNodeId::new(plan_node);
    let found = tokio::time::timeout(LIMIT, async {
        loop {
            let nodes = engine.node_executions(plan_execution_id).await.unwrap();
            if let Some(node) = nodes
                .into_iter()
                .find(|n| n.plan_node_id() == &target && n.status == status)
            {
                return node;
            }
            let _ = updates.recv().await;
        }
    })
    .await;
    found.unwrap_or_else(|_| panic!("{} never reached {}", plan_node, status))
}

/// Executions of one plan node, in creation order
pub async fn executions_of(
    engine: &OrchestrationEngine,
    plan_execution_id: &PlanExecutionId,
    plan_node: &str,
) -> Vec<NodeExecution> {
    let target = PlanNodeId::new(plan_node);
    engine
        .node_executions(plan_execution_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.plan_node_id() == &target)
        .collect()
}

pub async fn only_execution(
    engine: &OrchestrationEngine,
    plan_execution_id: &PlanExecutionId,
    plan_node: &str,
) -> NodeExecution {
    let mut executions = executions_of(engine, plan_execution_id, plan_node).await;
    assert_eq!(executions.len(), 1, "{} ran {} times", plan_node, executions.len());
    executions.remove(0)
}

// ---------------------------------------------------------------------------
// Plan builders
// ---------------------------------------------------------------------------

pub fn plan(roots: &[&str], nodes: Vec<PlanNode>) -> Plan {
    Plan::from_nodes(roots.iter().map(|r| PlanNodeId::new(*r)).collect(), nodes).unwrap()
}

pub fn noop(id: &str) -> PlanNode {
    PlanNode::new(id, StepType::new("NOOP"))
}

/// A node delegating one task of `task_type`
pub fn task(id: &str, task_type: &str, parameters: Value) -> PlanNode {
    PlanNode::new(id, StepType::new("DELEGATE"))
        .with_parameters(json!({ "taskType": task_type, "parameters": parameters }))
}

pub fn fork(id: &str, children: &[&str]) -> PlanNode {
    PlanNode::new(id, StepType::new("FORK")).with_parameters(json!({ "childNodeIds": children }))
}

pub fn then(next: &str) -> AdviserObtainment {
    AdviserObtainment::new(AdviserType::ON_SUCCESS).with_parameters(json!({ "nextNodeId": next }))
}

pub fn adviser(adviser_type: AdviserType, parameters: Value) -> AdviserObtainment {
    AdviserObtainment::new(adviser_type).with_parameters(parameters)
}

pub fn absolute_timeout(secs: u64) -> TimeoutObtainment {
    TimeoutObtainment::new(Dimension::ABSOLUTE, json!({ "timeoutSecs": secs }))
}

pub fn active_timeout(secs: u64) -> TimeoutObtainment {
    TimeoutObtainment::new(Dimension::ACTIVE, json!({ "timeoutSecs": secs }))
}

pub fn mode(facilitator_type: FacilitatorType) -> FacilitatorObtainment {
    FacilitatorObtainment::new(facilitator_type)
}
