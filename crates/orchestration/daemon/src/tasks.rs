//! Built-in task handlers
//!
//! `ECHO` returns its parameters, `SLEEP` waits `millis` and `FAIL` fails
//! with an optional `message`. Plans run by orchestrd delegate to these
//! through `DELEGATE` nodes.

use async_trait::async_trait;
use orchestration_engine::{LocalTaskExecutor, TaskHandler};
use orchestration_types::FailureInfo;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Returns its parameters as the task output
pub struct EchoTask;

#[async_trait]
impl TaskHandler for EchoTask {
    async fn run(&self, parameters: Value) -> Result<Value, FailureInfo> {
        tracing::info!(%parameters, "echo");
        Ok(parameters)
    }
}

/// Waits `millis` milliseconds
pub struct SleepTask;

#[async_trait]
impl TaskHandler for SleepTask {
    async fn run(&self, parameters: Value) -> Result<Value, FailureInfo> {
        let millis = match parameters.get("millis") {
            None => 0,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| FailureInfo::application("millis must be a non-negative integer"))?,
        };
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(json!({ "slept": millis }))
    }
}

/// Always fails
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

/// An executor with every built-in handler registered
pub fn builtin_executor() -> LocalTaskExecutor {
    LocalTaskExecutor::new()
        .with_handler("ECHO", Arc::new(EchoTask))
        .with_handler("SLEEP", Arc::new(SleepTask))
        .with_handler("FAIL", Arc::new(FailTask))
}
