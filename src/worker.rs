// Job runner: one job end to end against freshly fetched state, plus the background
// retention pruner. Jobs never reuse a precomputed plan.

use std::sync::Arc;

use serde::Deserialize;
use tokio::time::{Duration, interval};

use crate::audit::AuditSink;
use crate::classifier::classify;
use crate::confirm::Confirmer;
use crate::docker_repo::ContainerRuntime;
use crate::error::ReconcileError;
use crate::executor::{
    ExecutionContext, ExecutionObserver, ExecutorOptions, PlanSource, run_executor,
};
use crate::jobs::JobRegistry;
use crate::models::{
    ActionOutcome, Classification, EnforcementIntent, ExecutionEvent, JobKind, JobResult,
    Overrides, Plan, PortRecord, State,
};
use crate::planner::{PlanInput, build_plan};
use crate::policy::PolicyRegistry;
use crate::rollback::{RollbackInput, build_rollback_plan, capture_snapshot, create_restore_plan};
use crate::snapshot_repo::SnapshotRepo;
use crate::state_loader::StateLoader;

/// Shared services every job needs. Cheap to clone.
pub struct JobDeps<R> {
    pub loader: Arc<StateLoader>,
    pub runtime: Arc<R>,
    pub registry: JobRegistry,
    pub snapshots: Arc<SnapshotRepo>,
    pub audit: Arc<AuditSink>,
    pub policies: Arc<PolicyRegistry>,
    pub overrides: Arc<Overrides>,
    pub default_enforcement: Arc<EnforcementIntent>,
}

impl<R> Clone for JobDeps<R> {
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            runtime: self.runtime.clone(),
            registry: self.registry.clone(),
            snapshots: self.snapshots.clone(),
            audit: self.audit.clone(),
            policies: self.policies.clone(),
            overrides: self.overrides.clone(),
            default_enforcement: self.default_enforcement.clone(),
        }
    }
}

/// Consent flags for one run; all default to "no".
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateFlags {
    pub apply: bool,
    pub yes: bool,
    pub allow_mutation: bool,
    pub mutation_confirmed: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub enum JobRequest {
    /// Classify, plan and execute. `None` uses the configured enforcement intent.
    Execute {
        enforcement: Option<EnforcementIntent>,
        gates: GateFlags,
    },
    /// Undo a completed job's port changes.
    Rollback {
        job_id: String,
        containers: Option<Vec<String>>,
        gates: GateFlags,
    },
    /// Move live ports back to a snapshot's pre-state.
    Restore {
        snapshot_id: String,
        containers: Option<Vec<String>>,
        gates: GateFlags,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Execute { .. } => JobKind::Execution,
            JobRequest::Rollback { .. } => JobKind::Rollback,
            JobRequest::Restore { .. } => JobKind::Restore,
        }
    }

    pub fn gates(&self) -> GateFlags {
        match self {
            JobRequest::Execute { gates, .. }
            | JobRequest::Rollback { gates, .. }
            | JobRequest::Restore { gates, .. } => *gates,
        }
    }
}

/// Records executor events in the job's log, then forwards them.
struct RegistryObserver<'a> {
    registry: &'a JobRegistry,
    job_id: &'a str,
    forward: Option<&'a dyn ExecutionObserver>,
}

impl ExecutionObserver for RegistryObserver<'_> {
    fn notify(&self, event: &ExecutionEvent) -> anyhow::Result<()> {
        self.registry.record_event(self.job_id, event.clone());
        if let Some(f) = self.forward {
            f.notify(event)?;
        }
        Ok(())
    }
}

/// Classification and forward plan for one state.
pub fn forward_plan(
    state: &State,
    overrides: &Overrides,
    enforcement: &EnforcementIntent,
    policies: &PolicyRegistry,
    dry_run: bool,
) -> (Vec<Classification>, Plan) {
    let classifications = classify(state, overrides);
    let plan = build_plan(&PlanInput {
        classifications: &classifications,
        state,
        overrides,
        enforcement,
        policies,
        dry_run,
    });
    (classifications, plan)
}

/// Pre and post port tables of a finished job: the snapshot store first, then the registry.
async fn job_ports<R>(
    deps: &JobDeps<R>,
    job_id: &str,
) -> Result<(Vec<PortRecord>, Vec<PortRecord>), ReconcileError> {
    if let Some(ports) = deps.snapshots.load_ports(job_id).await? {
        return Ok(ports);
    }
    let job = deps
        .registry
        .get(job_id)
        .ok_or_else(|| ReconcileError::NotFound(format!("job '{job_id}'")))?;
    match (job.pre_state, job.post_state) {
        (Some(pre), Some(post)) => Ok((pre.port_records(), post.port_records())),
        _ => Err(ReconcileError::NotFound(format!(
            "no pre/post state recorded for job '{job_id}'"
        ))),
    }
}

/// Run a registered job to completion and record the outcome in the registry.
pub async fn run_job<R: ContainerRuntime, C: Confirmer>(
    deps: &JobDeps<R>,
    job_id: &str,
    request: JobRequest,
    confirmer: &C,
    forward: Option<&dyn ExecutionObserver>,
) -> Result<JobResult, ReconcileError> {
    let kind = request.kind();
    let gates = request.gates();
    let (pre, plan) = match prepare_job(deps, job_id, request, gates.dry_run).await {
        Ok(prepared) => prepared,
        Err(e) => return Err(finish_failed(deps, job_id, e)),
    };

    match execute_plan(deps, job_id, &plan, gates, confirmer, forward).await {
        Ok(result) => {
            let post = if gates.dry_run {
                None
            } else {
                refetch(deps, job_id).await
            };
            if let Some(post) = &post {
                let applied = result.applied_count();
                save_snapshot(deps, job_id, kind, pre, post.clone(), &plan, applied).await;
            }
            deps.registry.complete(job_id, result.clone(), post);
            Ok(result)
        }
        Err(e) => {
            // Earlier actions stay applied; keep what is needed to roll them back.
            let applied = applied_so_far(deps, job_id);
            if applied > 0
                && let Some(post) = refetch(deps, job_id).await
            {
                save_snapshot(deps, job_id, kind, pre, post.clone(), &plan, applied).await;
                deps.registry.set_post_state(job_id, post);
            }
            Err(finish_failed(deps, job_id, e))
        }
    }
}

async fn refetch<R>(deps: &JobDeps<R>, job_id: &str) -> Option<State> {
    match deps.loader.load_state().await {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(job_id, error = %e, "post-execution state fetch failed");
            None
        }
    }
}

async fn save_snapshot<R>(
    deps: &JobDeps<R>,
    job_id: &str,
    kind: JobKind,
    pre: State,
    post: State,
    plan: &Plan,
    applied: usize,
) {
    let snapshot = capture_snapshot(job_id, kind, crate::now_ms(), pre, post, plan, applied);
    if let Err(e) = deps.snapshots.save(&snapshot).await {
        tracing::error!(job_id, error = %e, "snapshot save failed");
    }
}

/// Mutations applied before the run stopped, counted from the job's event log.
fn applied_so_far<R>(deps: &JobDeps<R>, job_id: &str) -> usize {
    deps.registry.get(job_id).map_or(0, |job| {
        job.events
            .iter()
            .filter(|ev| {
                matches!(
                    ev.event,
                    ExecutionEvent::ActionSuccess {
                        outcome: ActionOutcome::Applied,
                        ..
                    }
                )
            })
            .count()
    })
}

fn finish_failed<R>(deps: &JobDeps<R>, job_id: &str, e: ReconcileError) -> ReconcileError {
    // Failures before the executor started have no terminal event yet.
    let has_terminal = deps
        .registry
        .get(job_id)
        .and_then(|j| j.events.last().map(|ev| ev.event.is_terminal()))
        .unwrap_or(false);
    if !has_terminal {
        deps.registry.record_event(
            job_id,
            ExecutionEvent::JobFailed {
                error: e.to_string(),
            },
        );
    }
    if e.is_abort() {
        deps.registry.abort(job_id, e.to_string());
    } else if e.is_denied() {
        deps.registry.deny(job_id, e.to_string());
    } else {
        deps.registry.fail(job_id, e.to_string());
    }
    e
}

/// Fresh state and the plan to run against it.
async fn prepare_job<R>(
    deps: &JobDeps<R>,
    job_id: &str,
    request: JobRequest,
    dry_run: bool,
) -> Result<(State, Plan), ReconcileError> {
    let pre = deps.loader.load_state().await?;
    deps.registry.set_pre_state(job_id, pre.clone());

    let plan = match request {
        JobRequest::Execute { enforcement, .. } => {
            let enforcement = enforcement.unwrap_or_else(|| (*deps.default_enforcement).clone());
            enforcement.validate()?;
            forward_plan(
                &pre,
                &deps.overrides,
                &enforcement,
                &deps.policies,
                dry_run,
            )
            .1
        }
        JobRequest::Rollback {
            job_id: target,
            containers,
            ..
        } => {
            let (pre_ports, post_ports) = job_ports(deps, &target).await?;
            build_rollback_plan(&RollbackInput {
                pre_ports: &pre_ports,
                post_ports: &post_ports,
                selected_containers: containers.as_deref(),
                dry_run,
            })
            .plan
        }
        JobRequest::Restore {
            snapshot_id,
            containers,
            ..
        } => {
            let snapshot = deps
                .snapshots
                .load(&snapshot_id)
                .await?
                .ok_or_else(|| ReconcileError::NotFound(format!("snapshot '{snapshot_id}'")))?;
            create_restore_plan(&snapshot, containers.as_deref(), &pre, dry_run).plan
        }
    };
    tracing::info!(
        job_id,
        actions = plan.action_count,
        mutations = plan.summary.mutations,
        dry_run,
        "plan built"
    );
    Ok((pre, plan))
}

async fn execute_plan<R: ContainerRuntime, C: Confirmer>(
    deps: &JobDeps<R>,
    job_id: &str,
    plan: &Plan,
    gates: GateFlags,
    confirmer: &C,
    forward: Option<&dyn ExecutionObserver>,
) -> Result<JobResult, ReconcileError> {
    let observer = RegistryObserver {
        registry: &deps.registry,
        job_id,
        forward,
    };
    run_executor(
        ExecutorOptions {
            plan: PlanSource::Inline(plan.clone()),
            apply: gates.apply,
            yes: gates.yes,
            allow_mutation: gates.allow_mutation,
            mutation_confirmed: gates.mutation_confirmed,
            dry_run: gates.dry_run,
        },
        &ExecutionContext {
            runtime: deps.runtime.as_ref(),
            confirmer,
            observer: Some(&observer),
            audit: Some(deps.audit.as_ref()),
            job_id: Some(job_id),
        },
    )
    .await
}

/// Register a job and run it in the background; returns the job id immediately.
pub fn spawn_job<R: ContainerRuntime, C: Confirmer + 'static>(
    deps: JobDeps<R>,
    request: JobRequest,
    confirmer: Arc<C>,
) -> String {
    let job_id = deps.registry.create(request.kind());
    let id = job_id.clone();
    tokio::spawn(async move {
        if let Err(e) = run_job(&deps, &id, request, confirmer.as_ref(), None).await {
            tracing::info!(job_id = %id, kind = e.kind(), "job did not complete: {}", e);
        }
    });
    job_id
}

/// Periodically delete snapshots past the retention and forget finished jobs older
/// than `job_retention`, until shutdown.
pub fn spawn_retention_pruner(
    snapshots: Arc<SnapshotRepo>,
    registry: JobRegistry,
    job_retention: Duration,
    prune_interval_secs: u64,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut prune_tick = interval(Duration::from_secs(prune_interval_secs));
        prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = prune_tick.tick() => {
                    match snapshots.prune_old_data().await {
                        Ok(0) => {}
                        Ok(removed) => {
                            tracing::info!(
                                operation = "prune_old_data",
                                removed,
                                "Snapshots pruned"
                            )
                        }
                        Err(e) => tracing::warn!(error = %e, "snapshot prune failed"),
                    }
                    let evicted = registry.evict_finished(job_retention);
                    if evicted > 0 {
                        tracing::debug!(operation = "evict_finished", evicted, "Jobs evicted");
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
        tracing::debug!("Retention pruner shutting down");
    })
}
