// Plan executor: consent gates, preflight, then strictly sequential dispatch.
// The first failing action stops the run; already-applied actions are not undone.

mod handlers;

use handlers::validate_update;

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use crate::audit::{AuditRecord, AuditSink, AuditStatus};
use crate::confirm::Confirmer;
use crate::docker_repo::ContainerRuntime;
use crate::error::{Gate, ReconcileError};
use crate::models::{
    ActionResult, ActionType, ExecutionEvent, ExecutionStatus, JobResult, Plan, PlanAction,
};

pub enum PlanSource {
    Inline(Plan),
    File(PathBuf),
}

pub struct ExecutorOptions {
    pub plan: PlanSource,
    /// Without it nothing runs.
    pub apply: bool,
    /// Skip the interactive confirmation of the action list.
    pub yes: bool,
    /// Required when the plan recreates containers.
    pub allow_mutation: bool,
    /// The downtime confirmation was already given upstream.
    pub mutation_confirmed: bool,
    /// Validate every action without any destructive runtime call.
    pub dry_run: bool,
}

/// Push-based progress sink. Errors and panics are logged and never reach the executor.
pub trait ExecutionObserver: Send + Sync {
    fn notify(&self, event: &ExecutionEvent) -> anyhow::Result<()>;
}

/// Writes every event to the log.
pub struct LogObserver;

impl ExecutionObserver for LogObserver {
    fn notify(&self, event: &ExecutionEvent) -> anyhow::Result<()> {
        tracing::info!(event = %serde_json::to_string(event)?, "execution event");
        Ok(())
    }
}

pub struct ExecutionContext<'a, R, C> {
    pub runtime: &'a R,
    pub confirmer: &'a C,
    pub observer: Option<&'a dyn ExecutionObserver>,
    pub audit: Option<&'a AuditSink>,
    pub job_id: Option<&'a str>,
}

impl<R, C> ExecutionContext<'_, R, C> {
    fn emit(&self, event: ExecutionEvent) {
        let Some(observer) = self.observer else {
            return;
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| observer.notify(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "execution observer failed"),
            Err(_) => tracing::warn!("execution observer panicked"),
        }
    }
}

/// Run a plan through the gates and, if all pass, execute it. Exactly one audit line is
/// written per call when an audit sink is configured.
pub async fn run_executor<R: ContainerRuntime, C: Confirmer>(
    options: ExecutorOptions,
    ctx: &ExecutionContext<'_, R, C>,
) -> Result<JobResult, ReconcileError> {
    let dry_run = options.dry_run;
    let mut actions = Vec::new();
    let mut results = Vec::new();
    let outcome = execute(options, ctx, &mut actions, &mut results).await;

    let (status, error) = match &outcome {
        Ok(r) if r.status == ExecutionStatus::Validated => (AuditStatus::Validated, None),
        Ok(_) => (AuditStatus::Completed, None),
        Err(e) if e.is_abort() => (AuditStatus::Aborted, Some(e)),
        Err(e) if e.is_denied() => (AuditStatus::Denied, Some(e)),
        Err(e) => (AuditStatus::Failed, Some(e)),
    };
    if let Some(e) = error {
        tracing::warn!(job_id = ?ctx.job_id, kind = e.kind(), error = %e, "execution stopped");
        ctx.emit(ExecutionEvent::JobFailed {
            error: e.to_string(),
        });
    }
    if let Some(audit) = ctx.audit {
        let record = AuditRecord {
            at: crate::now_ms(),
            job_id: ctx.job_id,
            status,
            dry_run,
            actions: &actions,
            results: &results,
            error_kind: error.map(|e| e.kind()),
            error: error.map(|e| e.to_string()),
        };
        if let Err(e) = audit.append(&record).await {
            tracing::error!(error = %e, path = %audit.path().display(), "audit append failed");
        }
    }
    outcome
}

async fn execute<R: ContainerRuntime, C: Confirmer>(
    options: ExecutorOptions,
    ctx: &ExecutionContext<'_, R, C>,
    actions_out: &mut Vec<PlanAction>,
    results: &mut Vec<ActionResult>,
) -> Result<JobResult, ReconcileError> {
    if !options.apply {
        return Err(ReconcileError::gate_denied(Gate::ApplyFlag));
    }
    let plan = load_plan(options.plan).await?;
    actions_out.clone_from(&plan.actions);
    preflight(&plan)?;

    let dry_run = options.dry_run;
    if !options.yes {
        let lines: Vec<String> = plan.actions.iter().map(describe).collect();
        let prompt = format!("Execute {} action(s)?", plan.actions.len());
        if !ctx
            .confirmer
            .confirm(Gate::Confirmation, &prompt, &lines)
            .await?
        {
            return Err(ReconcileError::UserAborted {
                gate: Gate::Confirmation,
            });
        }
    }

    let mutations: Vec<String> = plan.mutations().map(describe).collect();
    if !mutations.is_empty() && !dry_run {
        if !options.allow_mutation {
            return Err(ReconcileError::GateDenied {
                gate: Gate::AllowMutation,
                detail: Some(format!("{} container(s) would be recreated", mutations.len())),
            });
        }
        if !options.mutation_confirmed {
            let prompt = format!(
                "{} container(s) will be stopped, removed and recreated (downtime). Proceed?",
                mutations.len()
            );
            if !ctx
                .confirmer
                .confirm(Gate::MutationConfirmation, &prompt, &mutations)
                .await?
            {
                return Err(ReconcileError::UserAborted {
                    gate: Gate::MutationConfirmation,
                });
            }
        }
    }

    ctx.emit(ExecutionEvent::JobStart {
        action_count: plan.actions.len(),
        dry_run,
    });
    for (index, action) in plan.actions.iter().enumerate() {
        ctx.emit(ExecutionEvent::ActionStart {
            index,
            action_type: action.action_type.clone(),
            container: action.container.clone(),
        });
        let dispatched = match &action.action_type {
            ActionType::UpdateContainerPorts if action.executable => {
                handlers::update_container_ports(ctx.runtime, action, dry_run).await
            }
            ActionType::UpdateContainerPorts
            | ActionType::ManualReview
            | ActionType::ReviewGamePorts
            | ActionType::NoOp => Ok(handlers::informational(action)),
            ActionType::Unrecognized(name) => Err(ReconcileError::validation(format!(
                "no handler for action type '{name}'"
            ))),
        };
        match dispatched {
            Ok((outcome, detail)) => {
                ctx.emit(ExecutionEvent::ActionSuccess {
                    index,
                    container: action.container.clone(),
                    outcome,
                });
                results.push(ActionResult {
                    index,
                    action_type: action.action_type.clone(),
                    container: action.container.clone(),
                    outcome,
                    detail: Some(detail),
                });
            }
            Err(e) => {
                ctx.emit(ExecutionEvent::ActionError {
                    index,
                    container: action.container.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        }
    }

    let status = if dry_run {
        ExecutionStatus::Validated
    } else {
        ExecutionStatus::Completed
    };
    ctx.emit(ExecutionEvent::JobComplete { status });
    Ok(JobResult {
        status,
        dry_run,
        results: results.clone(),
    })
}

async fn load_plan(source: PlanSource) -> Result<Plan, ReconcileError> {
    let plan = match source {
        PlanSource::Inline(plan) => plan,
        PlanSource::File(path) => {
            let text = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&text).map_err(|e| {
                ReconcileError::validation(format!("plan file {}: {e}", path.display()))
            })?
        }
    };
    if plan.action_count != plan.actions.len() {
        return Err(ReconcileError::validation(format!(
            "plan declares {} actions but lists {}",
            plan.action_count,
            plan.actions.len()
        )));
    }
    Ok(plan)
}

/// Every action type must be known and every mutation well-formed, before any gate prompts.
pub fn preflight(plan: &Plan) -> Result<(), ReconcileError> {
    for (index, action) in plan.actions.iter().enumerate() {
        if let ActionType::Unrecognized(name) = &action.action_type {
            return Err(ReconcileError::validation(format!(
                "action {index} ('{}'): unknown action type '{name}'",
                action.container
            )));
        }
        if action.action_type.is_mutation() && action.executable {
            validate_update(action)?;
        }
    }
    Ok(())
}

fn describe(action: &PlanAction) -> String {
    match (&action.from, &action.to) {
        (Some(from), Some(to)) => format!(
            "{} {}: {} -> {}",
            action.action_type,
            action.container,
            join(from),
            join(to)
        ),
        _ => format!(
            "{} {} ({})",
            action.action_type, action.container, action.policy_context.reason
        ),
    }
}

fn join(ports: &[crate::models::PortBinding]) -> String {
    ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
