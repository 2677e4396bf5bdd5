// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::docker_repo::ContainerRuntime;
use crate::error::ReconcileError;
use crate::worker::JobDeps;

pub(crate) struct AppState<R> {
    pub(crate) deps: JobDeps<R>,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            deps: self.deps.clone(),
        }
    }
}

/// Reconcile errors as JSON `{error, message}` with a status per kind.
pub(crate) struct ApiError(ReconcileError);

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        ApiError(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(e.into())
    }
}

pub fn status_for(err: &ReconcileError) -> StatusCode {
    match err {
        ReconcileError::Transport { .. } | ReconcileError::ContractViolation { .. } => {
            StatusCode::BAD_GATEWAY
        }
        ReconcileError::Validation(_) => StatusCode::BAD_REQUEST,
        ReconcileError::UserAborted { .. } | ReconcileError::GateDenied { .. } => {
            StatusCode::FORBIDDEN
        }
        ReconcileError::NotFound(_) => StatusCode::NOT_FOUND,
        ReconcileError::PreconditionFailed { .. } => StatusCode::CONFLICT,
        ReconcileError::RuntimeCommand { .. }
        | ReconcileError::Storage(_)
        | ReconcileError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub fn app<R: ContainerRuntime>(deps: JobDeps<R>) -> Router {
    let state = AppState { deps };
    Router::new()
        .route("/", get(|| async { "portpolicy: container port policy reconciliation" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/state", get(http::state_handler::<R>)) // GET /api/state
        .route(
            "/api/classification",
            get(http::classification_handler::<R>),
        ) // GET /api/classification
        .route("/api/policies", get(http::policies_handler::<R>)) // GET /api/policies
        .route("/api/plan", post(http::plan_handler::<R>)) // POST /api/plan
        .route(
            "/api/jobs",
            get(http::list_jobs_handler::<R>).post(http::create_job_handler::<R>),
        ) // GET, POST /api/jobs
        .route("/api/jobs/{id}", get(http::get_job_handler::<R>)) // GET /api/jobs/{id}
        .route(
            "/api/jobs/{id}/rollback",
            post(http::rollback_job_handler::<R>),
        ) // POST /api/jobs/{id}/rollback
        .route(
            "/api/snapshots",
            get(http::list_snapshots_handler::<R>).delete(http::cleanup_snapshots_handler::<R>),
        ) // GET, DELETE /api/snapshots
        .route(
            "/api/snapshots/{id}",
            get(http::get_snapshot_handler::<R>),
        ) // GET /api/snapshots/{id}
        .route(
            "/api/snapshots/{id}/restore-plan",
            post(http::restore_plan_handler::<R>),
        ) // POST /api/snapshots/{id}/restore-plan
        .route(
            "/api/snapshots/{id}/restore",
            post(http::restore_handler::<R>),
        ) // POST /api/snapshots/{id}/restore
        .route("/ws/jobs/{id}", get(ws::ws_job::<R>)) // WS /ws/jobs/{id}
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
