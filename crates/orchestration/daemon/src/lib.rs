//! orchestrd library
//!
//! Configuration loading, the built-in task handlers and the plan runner
//! used by the `orchestrd` binary.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod runner;
pub mod tasks;

pub use config::{DaemonConfig, LoggingConfig};
pub use error::{DaemonError, DaemonResult};
pub use runner::{load_plan, parse_setup, validate, NodeSummary, PlanRunner, RunSummary};
