//! Orchestration Domain Types
//!
//! A pipeline is described by an immutable [`Plan`]: a DAG of [`PlanNode`]s.
//! The engine drives each node through facilitation, execution, response
//! handling and advising, recording every attempt as a [`NodeExecution`].
//!
//! # Key Concepts
//!
//! - **Plan / PlanNode**: the static graph and one node within it. Nodes
//!   declare which facilitators, advisers and timeouts apply to them.
//! - **Ambiance**: the append-only context stack threaded through nested
//!   node execution. Each nesting depth adds one [`Level`].
//! - **NodeExecution**: the mutable runtime record of a single attempt.
//!   Status changes follow the edge set in [`Status::can_transition_to`].
//! - **AdviserResponse**: the closed set of post-completion actions.
//! - **Interrupt**: an externally-triggered control action.
//! - **OutputInstance**: an outcome or sweeping output published by a node,
//!   visible to later nodes by scope.
//!
//! # Design Principles
//!
//! 1. Plans are read-only once built; executions reference plan nodes.
//! 2. Every polymorphic payload is a tagged enum with an explicit
//!    discriminant.
//! 3. Statuses only move along declared edges.
//! 4. Retry lineage is a linked list that never revisits an id.

#![deny(unsafe_code)]

mod ambiance;
mod correlation;
mod errors;
mod event;
mod execution;
mod ids;
mod interrupt;
mod keys;
mod outputs;
mod plan;
mod response;
mod status;
mod task;

pub use ambiance::*;
pub use correlation::*;
pub use errors::*;
pub use event::*;
pub use execution::*;
pub use ids::*;
pub use interrupt::*;
pub use keys::*;
pub use outputs::*;
pub use plan::*;
pub use response::*;
pub use status::*;
pub use task::*;
