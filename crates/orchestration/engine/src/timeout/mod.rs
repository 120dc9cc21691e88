//! Timeout tracking
//!
//! A timeout obtainment names a [`Dimension`] and its parameters. The
//! factory registered for that dimension builds a [`TimeoutTracker`]; the
//! [`TimeoutEngine`] schedules it and raises an expiry event for the owning
//! node execution once its expiry instant has passed.

mod engine;
mod trackers;

pub use engine::TimeoutEngine;
pub use trackers::{AbsoluteTracker, AbsoluteTrackerFactory, ActiveTracker, ActiveTrackerFactory};

use orchestration_types::{Dimension, OrchestrationResult};
use serde_json::Value;
use tokio::time::Instant;

/// Lifecycle events a tracker may react to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutEvent {
    Paused,
    Resumed,
}

/// Computes when a node execution expires in one dimension
pub trait TimeoutTracker: Send + Sync {
    fn dimension(&self) -> Dimension;

    /// When the tracker expires; `None` while it is not counting down or
    /// when the deadline lies beyond what the clock can represent
    fn expiry_instant(&self) -> Option<Instant>;

    fn on_event(&mut self, event: TimeoutEvent, at: Instant);
}

/// Builds trackers for one dimension
pub trait TimeoutTrackerFactory: Send + Sync {
    fn create(&self, parameters: &Value, now: Instant) -> OrchestrationResult<Box<dyn TimeoutTracker>>;

    /// Reject parameters `create` would refuse; checked when a plan is validated
    fn validate(&self, _parameters: &Value) -> OrchestrationResult<()> {
        Ok(())
    }
}
