// HTTP handlers: state, classification, policies, plans, jobs and snapshots

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::classifier::classify;
use crate::confirm::NonInteractive;
use crate::docker_repo::ContainerRuntime;
use crate::error::ReconcileError;
use crate::models::{
    self, Classification, EnforcementIntent, Job, Plan, Snapshot, SnapshotSummary,
};
use crate::policy::Policy;
use crate::rollback::{RollbackPlan, create_restore_plan};
use crate::snapshot_repo::days;
use crate::version::{DESCRIPTION, NAME, VERSION};
use crate::worker::{GateFlags, JobRequest, forward_plan, spawn_job};

/// GET /version
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
        "description": DESCRIPTION,
    }))
}

/// GET /api/state: freshly fetched, normalized upstream state.
pub(super) async fn state_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
) -> Result<Json<models::State>, ApiError> {
    Ok(Json(state.deps.loader.load_state().await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ClassificationResponse {
    fetched_at: i64,
    classifications: Vec<Classification>,
}

/// GET /api/classification
pub(super) async fn classification_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
) -> Result<Json<ClassificationResponse>, ApiError> {
    let current = state.deps.loader.load_state().await?;
    Ok(Json(ClassificationResponse {
        fetched_at: current.fetched_at,
        classifications: classify(&current, &state.deps.overrides),
    }))
}

/// GET /api/policies
pub(super) async fn policies_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
) -> Json<Vec<Policy>> {
    Json(state.deps.policies.all().to_vec())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct PlanRequest {
    enforcement: Option<EnforcementIntent>,
    dry_run: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PlanPreview {
    fetched_at: i64,
    classifications: Vec<Classification>,
    plan: Plan,
}

/// POST /api/plan: side-effect-free preview against fresh state.
pub(super) async fn plan_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    body: Option<Json<PlanRequest>>,
) -> Result<Json<PlanPreview>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let enforcement = resolve_enforcement(&state, req.enforcement)?;
    let current = state.deps.loader.load_state().await?;
    let (classifications, plan) = forward_plan(
        &current,
        &state.deps.overrides,
        &enforcement,
        &state.deps.policies,
        req.dry_run.unwrap_or(true),
    );
    Ok(Json(PlanPreview {
        fetched_at: current.fetched_at,
        classifications,
        plan,
    }))
}

fn resolve_enforcement<R>(
    state: &AppState<R>,
    requested: Option<EnforcementIntent>,
) -> Result<EnforcementIntent, ReconcileError> {
    let enforcement = requested.unwrap_or_else(|| (*state.deps.default_enforcement).clone());
    enforcement.validate()?;
    Ok(enforcement)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateJobRequest {
    #[serde(default)]
    enforcement: Option<EnforcementIntent>,
    #[serde(flatten)]
    gates: GateFlags,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct JobAccepted {
    job_id: String,
}

fn accepted(job_id: String) -> (StatusCode, Json<JobAccepted>) {
    (StatusCode::ACCEPTED, Json(JobAccepted { job_id }))
}

/// POST /api/jobs: start an execution job; consent comes from the body flags.
pub(super) async fn create_job_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    if let Some(e) = &req.enforcement {
        e.validate()?;
    }
    let job_id = spawn_job(
        state.deps.clone(),
        JobRequest::Execute {
            enforcement: req.enforcement,
            gates: req.gates,
        },
        Arc::new(NonInteractive),
    );
    Ok(accepted(job_id))
}

/// GET /api/jobs: newest first.
pub(super) async fn list_jobs_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
) -> Json<Vec<Job>> {
    Json(state.deps.registry.list())
}

/// GET /api/jobs/{id}
pub(super) async fn get_job_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .deps
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| ReconcileError::NotFound(format!("job '{id}'")).into())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SelectionRequest {
    #[serde(default)]
    containers: Option<Vec<String>>,
    #[serde(flatten)]
    gates: GateFlags,
}

/// POST /api/jobs/{id}/rollback
pub(super) async fn rollback_job_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Path(id): Path<String>,
    Json(req): Json<SelectionRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let known = state.deps.registry.get(&id).is_some()
        || state.deps.snapshots.load_ports(&id).await?.is_some();
    if !known {
        return Err(ReconcileError::NotFound(format!("job '{id}'")).into());
    }
    let job_id = spawn_job(
        state.deps.clone(),
        JobRequest::Rollback {
            job_id: id,
            containers: req.containers,
            gates: req.gates,
        },
        Arc::new(NonInteractive),
    );
    Ok(accepted(job_id))
}

/// GET /api/snapshots: newest first.
pub(super) async fn list_snapshots_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
) -> Result<Json<Vec<SnapshotSummary>>, ApiError> {
    Ok(Json(state.deps.snapshots.list().await?))
}

/// GET /api/snapshots/{id}
pub(super) async fn get_snapshot_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Path(id): Path<String>,
) -> Result<Json<Snapshot>, ApiError> {
    load_snapshot(&state, &id).await.map(Json)
}

async fn load_snapshot<R>(state: &AppState<R>, id: &str) -> Result<Snapshot, ApiError> {
    state
        .deps
        .snapshots
        .load(id)
        .await?
        .ok_or_else(|| ReconcileError::NotFound(format!("snapshot '{id}'")).into())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct RestorePlanRequest {
    containers: Option<Vec<String>>,
    dry_run: Option<bool>,
}

/// POST /api/snapshots/{id}/restore-plan: preview only.
pub(super) async fn restore_plan_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Path(id): Path<String>,
    body: Option<Json<RestorePlanRequest>>,
) -> Result<Json<RollbackPlan>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let snapshot = load_snapshot(&state, &id).await?;
    let current = state.deps.loader.load_state().await?;
    Ok(Json(create_restore_plan(
        &snapshot,
        req.containers.as_deref(),
        &current,
        req.dry_run.unwrap_or(true),
    )))
}

/// POST /api/snapshots/{id}/restore
pub(super) async fn restore_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Path(id): Path<String>,
    Json(req): Json<SelectionRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    load_snapshot(&state, &id).await?;
    let job_id = spawn_job(
        state.deps.clone(),
        JobRequest::Restore {
            snapshot_id: id,
            containers: req.containers,
            gates: req.gates,
        },
        Arc::new(NonInteractive),
    );
    Ok(accepted(job_id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CleanupQuery {
    older_than_days: u32,
}

/// DELETE /api/snapshots?olderThanDays=N
pub(super) async fn cleanup_snapshots_handler<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Query(q): Query<CleanupQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if q.older_than_days == 0 {
        return Err(ReconcileError::validation("olderThanDays must be > 0").into());
    }
    let removed = state
        .deps
        .snapshots
        .cleanup_older_than(days(q.older_than_days))
        .await?;
    tracing::info!(removed, older_than_days = q.older_than_days, "snapshots cleaned up");
    Ok(Json(serde_json::json!({ "removed": removed })))
}
