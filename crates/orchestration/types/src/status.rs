//! Execution statuses, the transition edge set, and execution modes

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Status ───────────────────────────────────────────────────────────

/// Status of a node execution or a plan execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, waiting for a worker to pick it up
    Queued,
    /// Picked up; skip condition and facilitation in progress
    Running,
    /// Execution mode chosen; waiting out the initial wait
    Facilitating,
    /// Step invoked; may be suspended on callbacks or children
    Executing,
    /// Pause requested while a response is still outstanding
    Pausing,
    /// Suspended by an interrupt
    Paused,
    /// Waiting for an operator to resolve a failure
    InterventionWaiting,
    /// Being aborted or discontinued; children are unwound first
    Discontinuing,
    Succeeded,
    Failed,
    Expired,
    Aborted,
    Discontinued,
    Skipped,
    /// Failed, but the failure was ignored by policy or by an operator
    IgnoreFailed,
}

impl Status {
    /// Every status, in declaration order
    pub const ALL: [Status; 15] = [
        Status::Queued,
        Status::Running,
        Status::Facilitating,
        Status::Executing,
        Status::Pausing,
        Status::Paused,
        Status::InterventionWaiting,
        Status::Discontinuing,
        Status::Succeeded,
        Status::Failed,
        Status::Expired,
        Status::Aborted,
        Status::Discontinued,
        Status::Skipped,
        Status::IgnoreFailed,
    ];

    /// Statuses from which a node may move to `to`.
    ///
    /// This is the complete edge set of the node state machine. `Queued` is
    /// the only initial status and has no predecessors.
    pub fn allowed_start_set(to: Status) -> &'static [Status] {
        use Status::*;
        match to {
            Queued => &[],
            Running => &[Queued, Paused],
            Facilitating => &[Running],
            Executing => &[Facilitating, Running, Pausing],
            Pausing => &[Executing],
            Paused => &[Queued, Running, Facilitating, Pausing],
            InterventionWaiting => &[Failed, Expired],
            Discontinuing => &[
                Queued,
                Running,
                Facilitating,
                Executing,
                Pausing,
                Paused,
                InterventionWaiting,
            ],
            Succeeded => &[Executing, Failed, Expired, InterventionWaiting],
            Failed => &[Running, Facilitating, Executing, InterventionWaiting],
            Expired => &[Executing, Pausing, Paused, InterventionWaiting],
            Aborted => &[Discontinuing],
            Discontinued => &[Discontinuing],
            Skipped => &[Running],
            IgnoreFailed => &[Failed, Expired, InterventionWaiting],
        }
    }

    /// Whether `self → to` is a declared edge
    pub fn can_transition_to(self, to: Status) -> bool {
        Self::allowed_start_set(to).contains(&self)
    }

    /// No further execution will happen for this record
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Status::Succeeded
                | Status::Failed
                | Status::Expired
                | Status::Aborted
                | Status::Discontinued
                | Status::Skipped
                | Status::IgnoreFailed
        )
    }

    /// Final and counted as success by aggregation and advisers
    pub fn is_positive(self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Skipped | Status::IgnoreFailed
        )
    }

    /// Failed or timed out; the statuses advisers react to
    pub fn is_broken(self) -> bool {
        matches!(self, Status::Failed | Status::Expired)
    }

    /// Any status that is not final
    pub fn is_live(self) -> bool {
        !self.is_final()
    }

    /// The node is suspended on an outstanding response
    pub fn is_resumable(self) -> bool {
        matches!(self, Status::Executing | Status::Pausing)
    }

    /// A node that can be paused without touching its children
    pub fn is_pausable(self) -> bool {
        matches!(
            self,
            Status::Queued | Status::Running | Status::Facilitating | Status::Executing
        )
    }

    /// Rank used by [`aggregate_status`]; higher wins
    fn severity(self) -> u8 {
        match self {
            Status::Aborted => 9,
            Status::Expired => 8,
            Status::Failed => 7,
            Status::Discontinued => 6,
            Status::InterventionWaiting => 5,
            Status::Paused | Status::Pausing => 4,
            Status::Discontinuing => 3,
            Status::Queued | Status::Running | Status::Facilitating | Status::Executing => 2,
            Status::Succeeded | Status::Skipped | Status::IgnoreFailed => 0,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::Facilitating => "FACILITATING",
            Status::Executing => "EXECUTING",
            Status::Pausing => "PAUSING",
            Status::Paused => "PAUSED",
            Status::InterventionWaiting => "INTERVENTION_WAITING",
            Status::Discontinuing => "DISCONTINUING",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::Expired => "EXPIRED",
            Status::Aborted => "ABORTED",
            Status::Discontinued => "DISCONTINUED",
            Status::Skipped => "SKIPPED",
            Status::IgnoreFailed => "IGNORE_FAILED",
        };
        f.write_str(name)
    }
}

/// Aggregate a set of statuses into one.
///
/// Used for parents (over their children) and plans (over their root
/// chains). Aborted outranks expired, expired outranks failed; positive
/// statuses collapse to `Succeeded`. An empty set is `Succeeded`.
pub fn aggregate_status<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let worst = statuses.into_iter().max_by_key(|s| s.severity());
    match worst {
        None => Status::Succeeded,
        Some(status) if status.is_positive() => Status::Succeeded,
        Some(Status::Pausing) => Status::Paused,
        Some(status) if status.severity() == 2 => Status::Running,
        Some(status) => status,
    }
}

// ── Execution Mode ───────────────────────────────────────────────────

/// How a step is invoked, as chosen by a facilitator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Sync,
    Async,
    Task,
    TaskChain,
    Child,
    Children,
    ChildChain,
}

impl ExecutionMode {
    /// The node waits on child node executions
    pub fn spawns_children(self) -> bool {
        matches!(
            self,
            ExecutionMode::Child | ExecutionMode::Children | ExecutionMode::ChildChain
        )
    }

    /// The node dispatches work to the task executor
    pub fn dispatches_tasks(self) -> bool {
        matches!(self, ExecutionMode::Task | ExecutionMode::TaskChain)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::Sync => "SYNC",
            ExecutionMode::Async => "ASYNC",
            ExecutionMode::Task => "TASK",
            ExecutionMode::TaskChain => "TASK_CHAIN",
            ExecutionMode::Child => "CHILD",
            ExecutionMode::Children => "CHILDREN",
            ExecutionMode::ChildChain => "CHILD_CHAIN",
        };
        f.write_str(name)
    }
}
