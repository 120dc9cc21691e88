//! Engine clock
//!
//! Wall-clock timestamps are derived from tokio's monotonic clock, so record
//! timestamps, timeout deadlines and delayed events all agree, including
//! when time is paused in tests.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct EngineClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
        }
    }

    /// Current monotonic instant
    pub fn instant(&self) -> Instant {
        Instant::now()
    }

    /// Current wall-clock time
    pub fn now(&self) -> DateTime<Utc> {
        self.wall_at(Instant::now())
    }

    /// Wall-clock time corresponding to a monotonic instant
    pub fn wall_at(&self, instant: Instant) -> DateTime<Utc> {
        let elapsed = instant.saturating_duration_since(self.origin);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }

    /// Time elapsed since the clock was created
    pub fn uptime(&self) -> Duration {
        self.origin.elapsed()
    }
}
