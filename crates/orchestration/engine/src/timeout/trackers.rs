//! Built-in timeout trackers

use super::{TimeoutEvent, TimeoutTracker, TimeoutTrackerFactory};
use orchestration_types::{Dimension, OrchestrationError, OrchestrationResult};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Parameters shared by the built-in dimensions
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeoutParameters {
    timeout_millis: Option<u64>,
    timeout_secs: Option<u64>,
}

fn parse_timeout(dimension: &Dimension, parameters: &Value) -> OrchestrationResult<Duration> {
    let params: TimeoutParameters = if parameters.is_null() {
        TimeoutParameters::default()
    } else {
        serde_json::from_value(parameters.clone()).map_err(|err| {
            OrchestrationError::InvalidPlan(format!("malformed {} timeout parameters: {}", dimension, err))
        })?
    };
    match (params.timeout_millis, params.timeout_secs) {
        (Some(millis), _) => Ok(Duration::from_millis(millis)),
        (None, Some(secs)) => Ok(Duration::from_secs(secs)),
        (None, None) => Err(OrchestrationError::InvalidPlan(format!(
            "{} timeout needs timeoutMillis or timeoutSecs",
            dimension
        ))),
    }
}

// ── Absolute ─────────────────────────────────────────────────────────

/// Wall-clock time since registration, pauses included
#[derive(Debug, Clone)]
pub struct AbsoluteTracker {
    started: Instant,
    timeout: Duration,
}

impl AbsoluteTracker {
    pub fn new(started: Instant, timeout: Duration) -> Self {
        Self { started, timeout }
    }
}

impl TimeoutTracker for AbsoluteTracker {
    fn dimension(&self) -> Dimension {
        Dimension::ABSOLUTE
    }

    fn expiry_instant(&self) -> Option<Instant> {
        self.started.checked_add(self.timeout)
    }

    fn on_event(&mut self, _event: TimeoutEvent, _at: Instant) {}
}

pub struct AbsoluteTrackerFactory;

impl TimeoutTrackerFactory for AbsoluteTrackerFactory {
    fn create(&self, parameters: &Value, now: Instant) -> OrchestrationResult<Box<dyn TimeoutTracker>> {
        let timeout = parse_timeout(&Dimension::ABSOLUTE, parameters)?;
        Ok(Box::new(AbsoluteTracker::new(now, timeout)))
    }

    fn validate(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_timeout(&Dimension::ABSOLUTE, parameters).map(|_| ())
    }
}

// ── Active ───────────────────────────────────────────────────────────

/// Time spent not paused
#[derive(Debug, Clone)]
pub struct ActiveTracker {
    timeout: Duration,
    consumed: Duration,
    running_since: Option<Instant>,
}

impl ActiveTracker {
    pub fn new(started: Instant, timeout: Duration) -> Self {
        Self {
            timeout,
            consumed: Duration::ZERO,
            running_since: Some(started),
        }
    }
}

impl TimeoutTracker for ActiveTracker {
    fn dimension(&self) -> Dimension {
        Dimension::ACTIVE
    }

    fn expiry_instant(&self) -> Option<Instant> {
        let since = self.running_since?;
        since.checked_add(self.timeout.saturating_sub(self.consumed))
    }

    fn on_event(&mut self, event: TimeoutEvent, at: Instant) {
        match (event, self.running_since) {
            (TimeoutEvent::Paused, Some(since)) => {
                self.consumed += at.saturating_duration_since(since);
                self.running_since = None;
            }
            (TimeoutEvent::Resumed, None) => self.running_since = Some(at),
            _ => {}
        }
    }
}

pub struct ActiveTrackerFactory;

impl TimeoutTrackerFactory for ActiveTrackerFactory {
    fn create(&self, parameters: &Value, now: Instant) -> OrchestrationResult<Box<dyn TimeoutTracker>> {
        let timeout = parse_timeout(&Dimension::ACTIVE, parameters)?;
        Ok(Box::new(ActiveTracker::new(now, timeout)))
    }

    fn validate(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_timeout(&Dimension::ACTIVE, parameters).map(|_| ())
    }
}
