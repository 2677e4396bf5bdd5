// Job, execution event and result models

use serde::{Deserialize, Serialize};

use super::container::State;
use super::plan::ActionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Aborted,
    /// A consent gate was not granted.
    Denied,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Execution,
    Rollback,
    Restore,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Execution => "execution",
            JobKind::Rollback => "rollback",
            JobKind::Restore => "restore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "execution" => Some(JobKind::Execution),
            "rollback" => Some(JobKind::Rollback),
            "restore" => Some(JobKind::Restore),
            _ => None,
        }
    }
}

/// Per-action outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOutcome {
    /// Mutation performed against the runtime.
    Applied,
    /// Dry run: every check passed, nothing was changed.
    Validated,
    /// Informational action; nothing to do.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub index: usize,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub container: String,
    pub outcome: ActionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Validated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub status: ExecutionStatus,
    pub dry_run: bool,
    pub results: Vec<ActionResult>,
}

impl JobResult {
    pub fn applied_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == ActionOutcome::Applied)
            .count()
    }
}

/// Progress event pushed to observers while a plan executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    #[serde(rename = "job:start", rename_all = "camelCase")]
    JobStart { action_count: usize, dry_run: bool },
    #[serde(rename = "action:start", rename_all = "camelCase")]
    ActionStart {
        index: usize,
        action_type: ActionType,
        container: String,
    },
    #[serde(rename = "action:success", rename_all = "camelCase")]
    ActionSuccess {
        index: usize,
        container: String,
        outcome: ActionOutcome,
    },
    #[serde(rename = "action:error", rename_all = "camelCase")]
    ActionError {
        index: usize,
        container: String,
        error: String,
    },
    #[serde(rename = "job:complete", rename_all = "camelCase")]
    JobComplete { status: ExecutionStatus },
    #[serde(rename = "job:failed", rename_all = "camelCase")]
    JobFailed { error: String },
}

impl ExecutionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::JobComplete { .. } | ExecutionEvent::JobFailed { .. }
        )
    }
}

/// Execution event as recorded in a job's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub seq: u64,
    pub at: i64,
    #[serde(flatten)]
    pub event: ExecutionEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_state: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_state: Option<State>,
    pub events: Vec<JobEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
