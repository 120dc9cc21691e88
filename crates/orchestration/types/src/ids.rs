//! Strongly-typed identifiers for orchestration entities
//!
//! All IDs are string newtypes. Generated IDs are UUID v4; callers may also
//! supply their own (plan node ids are usually authored by hand).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(8) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of one run of a plan
    PlanExecutionId
);

string_id!(
    /// Identifier of a node inside a plan (the node's setup id)
    PlanNodeId
);

string_id!(
    /// Identifier of one execution attempt of a plan node (the runtime id)
    NodeExecutionId
);

string_id!(
    /// Identifier of a registered interrupt
    InterruptId
);

string_id!(
    /// Key under which an asynchronous response is correlated to its waiter
    CorrelationId
);

string_id!(
    /// Identifier assigned by the task executor to a delegated task
    TaskId
);

string_id!(
    /// Identifier of a scheduled timeout tracker
    TimeoutInstanceId
);

string_id!(
    /// Identifier of a persisted outcome or sweeping output
    OutputInstanceId
);

impl From<&TaskId> for CorrelationId {
    fn from(task_id: &TaskId) -> Self {
        Self(task_id.0.clone())
    }
}
