//! The orchestration engine
//!
//! [`OrchestrationEngine`] drives node executions through facilitation,
//! invocation, response handling and advising. Work arrives as
//! [`EngineEvent`]s on a shared queue drained by a [`WorkerPool`]. Every
//! status change is a versioned compare-and-set, so any worker may pick up
//! any continuation and a lost race is simply a no-op.
//!
//! # Flow
//!
//! ```text
//! FACILITATE ──► START ──► invoke ──┬─► conclude ──► ADVISE ──► next / retry / end
//!                                   └─► wait ──► RESPONSE ──► RESUME ──┘
//! ```

mod advise;
mod control;
mod lifecycle;
mod service;

pub(crate) use service::ExecutionService;

use crate::adviser::Adviser;
use crate::clock::EngineClock;
use crate::config::EngineConfig;
use crate::delegate::{LocalTaskExecutor, TaskExecutor};
use crate::interrupts::{self, InterruptHandler};
use crate::queue::{event_channel, EventHandler, EventSender, ResponseSink, WorkerPool};
use crate::registry::{Registries, Registry};
use crate::step::Step;
use crate::storage::{
    InMemoryStorage, InterruptStorage, OutputStorage, PlanExecutionStorage, Storage,
};
use crate::timeout::TimeoutEngine;
use crate::validation::validate_plan;
use crate::waiter::WaitNotifyEngine;
use async_trait::async_trait;
use orchestration_types::{
    AdviserType, CorrelationId, EngineEvent, Interrupt, InterruptId, InterruptType, Level,
    NodeExecution, NodeExecutionId, OrchestrationError, OrchestrationResult, OutputInstance,
    Plan, PlanExecution, PlanExecutionId, RefType, ResponseData, SetupAbstractions,
    StatusUpdate, StepType,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Executes plans
pub struct OrchestrationEngine {
    pub(crate) config: EngineConfig,
    pub(crate) clock: EngineClock,
    pub(crate) registries: Arc<Registries>,
    pub(crate) interrupt_handlers: Registry<InterruptType, Arc<dyn InterruptHandler>>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) executions: ExecutionService,
    pub(crate) waiter: WaitNotifyEngine,
    pub(crate) timeouts: TimeoutEngine,
    pub(crate) task_executor: Arc<dyn TaskExecutor>,
    pub(crate) events: EventSender,
    updates: broadcast::Sender<StatusUpdate>,
}

impl OrchestrationEngine {
    // ── Plan executions ──────────────────────────────────────────────

    /// Validate `plan`, record a new execution of it and queue its roots
    pub async fn start_execution(
        &self,
        plan: Plan,
        setup_abstractions: SetupAbstractions,
    ) -> OrchestrationResult<PlanExecution> {
        validate_plan(&plan, &self.registries)?;

        let execution = PlanExecution::new(
            PlanExecutionId::generate(),
            Arc::new(plan),
            setup_abstractions,
            self.clock.now(),
        );
        self.storage.create_plan_execution(execution.clone()).await?;

        let root = execution.root_ambiance();
        let mut queued = Vec::new();
        for plan_node_id in execution.plan.root_node_ids() {
            let plan_node = execution.plan.node(plan_node_id)?.clone();
            let id = NodeExecutionId::generate();
            let ambiance = root.fork(Level::new(id.clone(), &plan_node));
            let node = NodeExecution::new(id.clone(), ambiance, plan_node, self.clock.now());
            self.executions.create_node(node).await?;
            queued.push(id);
        }
        for node_execution_id in queued {
            self.events.send(EngineEvent::Facilitate { node_execution_id })?;
        }

        tracing::info!(
            plan_execution_id = %execution.uuid,
            nodes = execution.plan.node_count(),
            roots = execution.plan.root_node_ids().len(),
            "Plan execution started"
        );
        Ok(execution)
    }

    pub async fn plan_execution(&self, id: &PlanExecutionId) -> OrchestrationResult<PlanExecution> {
        self.executions.plan(id).await
    }

    pub async fn node_execution(&self, id: &NodeExecutionId) -> OrchestrationResult<NodeExecution> {
        self.executions.node(id).await
    }

    /// Every node execution of a plan execution, in creation order
    pub async fn node_executions(
        &self,
        plan_execution_id: &PlanExecutionId,
    ) -> OrchestrationResult<Vec<NodeExecution>> {
        self.executions.nodes_of(plan_execution_id).await
    }

    pub async fn interrupt(&self, id: &InterruptId) -> OrchestrationResult<Interrupt> {
        self.storage
            .get_interrupt(id)
            .await?
            .ok_or_else(|| OrchestrationError::InterruptNotFound(id.clone()))
    }

    pub async fn interrupts(&self, plan_execution_id: &PlanExecutionId) -> OrchestrationResult<Vec<Interrupt>> {
        Ok(self.storage.list_interrupts(plan_execution_id).await?)
    }

    /// Published outputs of one kind and name
    pub async fn outputs(
        &self,
        plan_execution_id: &PlanExecutionId,
        ref_type: &RefType,
        name: &str,
    ) -> OrchestrationResult<Vec<OutputInstance>> {
        Ok(self
            .storage
            .list_outputs(plan_execution_id, ref_type, name)
            .await?)
    }

    /// Wait until the plan execution reaches a final status
    pub async fn wait_for_plan(&self, id: &PlanExecutionId) -> OrchestrationResult<PlanExecution> {
        let mut updates = self.updates.subscribe();
        loop {
            let execution = self.executions.plan(id).await?;
            if execution.status.is_final() {
                return Ok(execution);
            }
            match updates.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(OrchestrationError::QueueClosed),
            }
        }
    }

    // ── Responses ────────────────────────────────────────────────────

    /// Deliver a response for a correlation id
    pub fn notify(&self, correlation_id: CorrelationId, payload: ResponseData) -> OrchestrationResult<()> {
        self.events.send(EngineEvent::Response {
            correlation_id,
            payload,
        })
    }

    /// A handle external callback sources can report through
    pub fn response_sink(&self) -> ResponseSink {
        ResponseSink::new(self.events.clone())
    }

    /// Responses ignored as duplicate or late
    pub fn dropped_responses(&self) -> u64 {
        self.waiter.dropped_count()
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Every node and plan status change, in commit order per record
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates.subscribe()
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Timeouts still being tracked
    pub fn active_timeouts(&self) -> usize {
        self.timeouts.active_count()
    }
}

#[async_trait]
impl EventHandler for OrchestrationEngine {
    async fn handle(&self, event: EngineEvent) {
        let kind = event.kind();
        let node_execution_id = event.node_execution_id().cloned();
        let result = match event {
            EngineEvent::Facilitate { node_execution_id } => {
                self.on_facilitate(&node_execution_id).await
            }
            EngineEvent::Start { node_execution_id } => self.on_start(&node_execution_id).await,
            EngineEvent::Response {
                correlation_id,
                payload,
            } => self.on_response(correlation_id, payload).await,
            EngineEvent::Resume {
                node_execution_id,
                responses,
            } => self.on_resume(&node_execution_id, responses).await,
            EngineEvent::Advise {
                node_execution_id,
                status,
            } => self.on_advise(&node_execution_id, status).await,
            EngineEvent::Interrupt { interrupt_id } => self.process_interrupt(&interrupt_id).await,
            EngineEvent::TimeoutExpired {
                node_execution_id,
                timeout_instance_id,
            } => {
                self.on_timeout_expired(&node_execution_id, &timeout_instance_id)
                    .await
            }
            EngineEvent::InterventionTimeout { node_execution_id } => {
                self.on_intervention_timeout(&node_execution_id).await
            }
            EngineEvent::PruneCorrelations { plan_execution_id } => self
                .waiter
                .prune(&plan_execution_id, self.config.correlation_retention())
                .await
                .map(|_| ()),
        };

        let Err(err) = result else {
            return;
        };
        tracing::error!(event = kind, error = %err, "Event handling failed");
        if let Some(id) = node_execution_id {
            if let Err(err) = self.fail_on_error(&id, &err).await {
                tracing::error!(
                    node_execution_id = %id,
                    error = %err,
                    "Node could not be settled after a failed event"
                );
            }
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Assembles an engine and starts its workers
pub struct EngineBuilder {
    config: EngineConfig,
    storage: Option<Arc<dyn Storage>>,
    registries: Option<Registries>,
    task_executor: Option<Arc<dyn TaskExecutor>>,
    steps: Vec<(StepType, Arc<dyn Step>)>,
    advisers: Vec<(AdviserType, Arc<dyn Adviser>)>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            storage: None,
            registries: None,
            task_executor: None,
            steps: Vec::new(),
            advisers: Vec::new(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Replace the built-in registries entirely
    pub fn with_registries(mut self, registries: Registries) -> Self {
        self.registries = Some(registries);
        self
    }

    pub fn with_task_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.task_executor = Some(executor);
        self
    }

    /// Register an additional step type
    pub fn with_step(mut self, step_type: StepType, step: Arc<dyn Step>) -> Self {
        self.steps.push((step_type, step));
        self
    }

    /// Register an additional adviser type
    pub fn with_adviser(mut self, adviser_type: AdviserType, adviser: Arc<dyn Adviser>) -> Self {
        self.advisers.push((adviser_type, adviser));
        self
    }

    /// Build the engine and spawn its worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> OrchestrationResult<EngineHandle> {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let clock = EngineClock::new();
        let mut registries = match self.registries {
            Some(registries) => registries,
            None => Registries::with_clock(storage.clone(), &self.config, clock.clone())?,
        };
        for (step_type, step) in self.steps {
            registries.steps.register(step_type, step)?;
        }
        for (adviser_type, adviser) in self.advisers {
            registries.advisers.register(adviser_type, adviser)?;
        }

        let (events, receiver) = event_channel();
        let task_executor = self
            .task_executor
            .unwrap_or_else(|| Arc::new(LocalTaskExecutor::new()));
        task_executor.bind(ResponseSink::new(events.clone()));

        let (updates, _) = broadcast::channel(self.config.status_channel_capacity.max(1));
        let executions = ExecutionService::new(
            storage.clone(),
            clock.clone(),
            updates.clone(),
            self.config.max_update_attempts,
        );

        let engine = Arc::new(OrchestrationEngine {
            interrupt_handlers: interrupts::default_handlers()?,
            registries: Arc::new(registries),
            timeouts: TimeoutEngine::new(events.clone()),
            waiter: WaitNotifyEngine::new(storage.clone(), clock.clone()),
            config: self.config,
            clock,
            storage,
            executions,
            task_executor,
            events,
            updates,
        });

        let pool = WorkerPool::spawn(engine.config.workers, receiver, engine.clone());
        tracing::info!(workers = pool.size(), "Orchestration engine started");
        Ok(EngineHandle { engine, pool })
    }
}

/// A running engine and its workers
pub struct EngineHandle {
    engine: Arc<OrchestrationEngine>,
    pool: WorkerPool,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        &self.engine
    }

    /// Stop the workers once their current events finish
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
        tracing::info!("Orchestration engine stopped");
    }
}
