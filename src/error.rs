// Error taxonomy for the reconcile pipeline.
// Classifier and planner never fail on well-formed input; these variants cover
// malformed upstream data, malformed plans and the executor's mutation path.

use std::fmt;

/// Consent gates checked by the executor, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    ApplyFlag,
    Confirmation,
    AllowMutation,
    MutationConfirmation,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Gate::ApplyFlag => "apply flag not set; refusing to execute the plan",
            Gate::Confirmation => "action list was not confirmed",
            Gate::AllowMutation => {
                "plan contains container mutations but allow-mutation was not granted"
            }
            Gate::MutationConfirmation => {
                "container recreate (downtime) was not confirmed"
            }
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Upstream unreachable or answered with a non-success status.
    #[error("transport error fetching {feed}: {reason}")]
    Transport { feed: &'static str, reason: String },

    /// Upstream answered, but the payload does not have the required shape.
    #[error("contract violation in {feed} feed: {reason}")]
    ContractViolation { feed: &'static str, reason: String },

    #[error("validation error: {0}")]
    Validation(String),

    /// Live runtime state differs from what the plan assumed.
    #[error("precondition failed for container '{container}': {reason}")]
    PreconditionFailed { container: String, reason: String },

    /// Runtime call failed; the container may be left partially recreated.
    #[error("runtime {operation} failed for '{container}': {output}")]
    RuntimeCommand {
        operation: &'static str,
        container: String,
        output: String,
    },

    #[error("aborted by user at gate: {gate}")]
    UserAborted { gate: Gate },

    #[error("gate denied: {gate}{}", detail_suffix(.detail))]
    GateDenied { gate: Gate, detail: Option<String> },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl ReconcileError {
    pub fn gate_denied(gate: Gate) -> Self {
        ReconcileError::GateDenied { gate, detail: None }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ReconcileError::Validation(msg.into())
    }

    pub fn precondition(container: &str, reason: impl Into<String>) -> Self {
        ReconcileError::PreconditionFailed {
            container: container.to_string(),
            reason: reason.into(),
        }
    }

    /// A declined prompt is a clean stop rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, ReconcileError::UserAborted { .. })
    }

    /// A consent gate was missing; fatal for the caller.
    pub fn is_denied(&self) -> bool {
        matches!(self, ReconcileError::GateDenied { .. })
    }

    /// Short machine-readable kind, used in audit lines and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Transport { .. } => "transport",
            ReconcileError::ContractViolation { .. } => "contract_violation",
            ReconcileError::Validation(_) => "validation",
            ReconcileError::PreconditionFailed { .. } => "precondition_failed",
            ReconcileError::RuntimeCommand { .. } => "runtime_command",
            ReconcileError::UserAborted { .. } => "user_aborted",
            ReconcileError::GateDenied { .. } => "gate_denied",
            ReconcileError::Storage(_) => "storage",
            ReconcileError::NotFound(_) => "not_found",
            ReconcileError::Io(_) => "io",
        }
    }
}

impl From<anyhow::Error> for ReconcileError {
    fn from(err: anyhow::Error) -> Self {
        ReconcileError::Storage(format!("{err:#}"))
    }
}
