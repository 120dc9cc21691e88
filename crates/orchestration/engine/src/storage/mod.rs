//! Storage layer for the orchestration engine
//!
//! Holds plan executions, node executions, interrupts, published outputs
//! and the correlation table of suspended nodes. Node executions and interrupts are replaced under an optimistic
//! version check; callers retry against the fresh record on conflict.

mod memory;
mod traits;

pub use memory::InMemoryStorage;
pub use traits::{
    CorrelationStorage, InterruptStorage, NodeExecutionStorage, OutputStorage,
    PlanExecutionStorage, Storage,
};
