//! Plan loading, validation and execution

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::tasks::builtin_executor;
use orchestration_engine::{
    validate_plan, EngineBuilder, EngineHandle, InMemoryStorage, OrchestrationEngine, Registries,
};
use orchestration_types::{
    InterruptRequest, InterruptType, NodeExecution, Plan, PlanExecution, PlanExecutionId,
    SetupAbstractions, Status, StatusUpdate,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Issuer recorded on interrupts raised by orchestrd itself
pub const DAEMON_ISSUER: &str = "orchestrd";

// ── Loading ──────────────────────────────────────────────────────────

/// Read a plan document from `path`
pub fn load_plan(path: &Path) -> DaemonResult<Plan> {
    let contents = std::fs::read_to_string(path)?;
    parse_plan(&contents).map_err(|message| DaemonError::PlanLoad {
        path: path.display().to_string(),
        message,
    })
}

/// Parse a plan document
pub fn parse_plan(contents: &str) -> Result<Plan, String> {
    serde_json::from_str(contents).map_err(|e| e.to_string())
}

/// Parse `key=value` pairs into setup abstractions
pub fn parse_setup(pairs: &[String]) -> DaemonResult<SetupAbstractions> {
    let mut setup = SetupAbstractions::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| DaemonError::InvalidArgument(format!("expected KEY=VALUE, got {:?}", pair)))?;
        setup.insert(key.to_string(), value.to_string());
    }
    Ok(setup)
}

/// Check `plan` against the built-in registries without running it
pub fn validate(plan: &Plan, config: &DaemonConfig) -> DaemonResult<()> {
    let registries = Registries::with_defaults(Arc::new(InMemoryStorage::new()), &config.engine)?;
    validate_plan(plan, &registries)?;
    Ok(())
}

// ── Summary ──────────────────────────────────────────────────────────

/// Outcome of one plan run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub plan_execution_id: PlanExecutionId,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub nodes: Vec<NodeSummary>,
}

/// One node execution in a [`RunSummary`]
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub plan_node_id: String,
    pub status: Status,
    pub attempt: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl RunSummary {
    fn new(execution: &PlanExecution, mut nodes: Vec<NodeExecution>) -> Self {
        nodes.sort_by_key(|n| n.created_at);
        Self {
            plan_execution_id: execution.uuid.clone(),
            status: execution.status,
            failure: execution.failure_info.as_ref().map(|f| f.message.clone()),
            nodes: nodes.iter().map(NodeSummary::from).collect(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status.is_positive()
    }
}

impl From<&NodeExecution> for NodeSummary {
    fn from(node: &NodeExecution) -> Self {
        Self {
            plan_node_id: node.plan_node_id().to_string(),
            status: node.status,
            attempt: node.retry_ids.len() + 1,
            failure: node.failure_info.as_ref().map(|f| f.message.clone()),
            duration_ms: node
                .start_ts
                .zip(node.end_ts)
                .map(|(start, end)| (end - start).num_milliseconds()),
        }
    }
}

// ── Runner ───────────────────────────────────────────────────────────

/// Runs plans on an engine with the built-in task handlers
pub struct PlanRunner {
    handle: EngineHandle,
}

impl PlanRunner {
    pub fn start(config: &DaemonConfig) -> DaemonResult<Self> {
        let handle = EngineBuilder::new(config.engine.clone())
            .with_task_executor(Arc::new(builtin_executor()))
            .start()?;
        Ok(Self { handle })
    }

    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        self.handle.engine()
    }

    /// Run `plan` to completion
    pub async fn run(&self, plan: Plan, setup: SetupAbstractions) -> DaemonResult<RunSummary> {
        self.run_until(plan, setup, std::future::pending::<()>()).await
    }

    /// Run `plan`, aborting it if `stop` completes first
    pub async fn run_until<F>(
        &self,
        plan: Plan,
        setup: SetupAbstractions,
        stop: F,
    ) -> DaemonResult<RunSummary>
    where
        F: std::future::Future<Output = ()>,
    {
        let engine = self.engine();
        let updates = engine.subscribe();
        let execution = engine.start_execution(plan, setup).await?;
        let id = execution.uuid.clone();
        let progress = tokio::spawn(log_progress(updates, id.clone()));

        let finished = tokio::select! {
            finished = engine.wait_for_plan(&id) => finished?,
            _ = stop => {
                tracing::warn!(plan_execution_id = %id, "Stop requested, aborting plan");
                engine
                    .register_interrupt(
                        InterruptRequest::new(InterruptType::AbortAll, id.clone())
                            .issued_by(DAEMON_ISSUER),
                    )
                    .await?;
                engine.wait_for_plan(&id).await?
            }
        };
        progress.abort();

        let nodes = engine.node_executions(&id).await?;
        Ok(RunSummary::new(&finished, nodes))
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}

async fn log_progress(mut updates: broadcast::Receiver<StatusUpdate>, id: PlanExecutionId) {
    loop {
        match updates.recv().await {
            Ok(update) if update.plan_execution_id() == &id => match update {
                StatusUpdate::Node {
                    plan_node_id,
                    from,
                    to,
                    ..
                } => tracing::info!(node = %plan_node_id, %from, %to, "Node status"),
                StatusUpdate::Plan { from, to, .. } => {
                    tracing::info!(plan_execution_id = %id, %from, %to, "Plan status")
                }
            },
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Status updates lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
