//! Orchestration Engine
//!
//! Executes [`Plan`](orchestration_types::Plan)s: DAGs of plan nodes whose
//! steps run synchronously, against callbacks, as delegated tasks or by
//! spawning child nodes. The engine records every attempt as a node
//! execution, advises on what happens once it finishes and reacts to
//! timeouts and interrupts while it runs.
//!
//! # Architecture
//!
//! The [`OrchestrationEngine`] composes specialized components:
//!
//! - [`Registries`]: step, facilitator, adviser, resolver and timeout
//!   implementations by type key
//! - [`WaitNotifyEngine`]: correlates asynchronous responses with the node
//!   waiting on them
//! - [`TimeoutEngine`]: schedules per-node timeout trackers
//! - [`TaskExecutor`]: the delegation subsystem tasks are handed to
//! - [`Storage`]: versioned persistence for executions, interrupts and
//!   published outputs
//!
//! Work arrives as events on a queue drained by a [`WorkerPool`]. Any
//! worker may pick up any event; status changes are compare-and-set, so a
//! lost race is a no-op rather than a double transition.
//!
//! # Example
//!
//! ```rust,no_run
//! use orchestration_engine::EngineBuilder;
//! use orchestration_types::{Plan, PlanNode, PlanNodeId, SetupAbstractions, StepType};
//!
//! # async fn run() -> orchestration_types::OrchestrationResult<()> {
//! let handle = EngineBuilder::default().start()?;
//! let plan = Plan::from_nodes(
//!     vec![PlanNodeId::new("build")],
//!     vec![PlanNode::new("build", StepType::new("NOOP"))],
//! )?;
//!
//! let execution = handle
//!     .engine()
//!     .start_execution(plan, SetupAbstractions::new())
//!     .await?;
//! let finished = handle.engine().wait_for_plan(&execution.uuid).await?;
//! assert!(finished.status.is_final());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod adviser;
pub mod clock;
pub mod config;
pub mod delegate;
pub mod engine;
pub mod facilitator;
pub mod interrupts;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod step;
pub mod steps;
pub mod storage;
pub mod timeout;
pub mod validation;
pub mod waiter;

// Re-export main types
pub use adviser::{Adviser, AdvisingEvent};
pub use config::EngineConfig;
pub use delegate::{LocalTaskExecutor, TaskExecutor, TaskHandler};
pub use engine::{EngineBuilder, EngineHandle, OrchestrationEngine};
pub use facilitator::Facilitator;
pub use interrupts::InterruptHandler;
pub use queue::{ResponseSink, WorkerPool};
pub use registry::{Registries, Registry};
pub use resolver::{OutputScope, Resolver};
pub use step::{Step, StepContext, StepInputPackage};
pub use storage::{InMemoryStorage, Storage};
pub use timeout::{TimeoutEngine, TimeoutTracker, TimeoutTrackerFactory};
pub use validation::validate_plan;
pub use waiter::WaitNotifyEngine;
