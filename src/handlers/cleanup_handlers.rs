//! Administrative HTTP handlers: per-project cleanup, audit, tracking and
//! whole-bucket purge jobs. All of them delegate to the services in `AppState`.

use crate::{
    errors::AppError,
    models::{
        deletion::{DeletionResult, StrategyMode},
        job::PurgeJob,
        project::ProjectIdentifier,
        tracked_file::{NewTrackedFile, TrackedFileRecord},
    },
    services::{deletion_coordinator::CleanupRequest, dry_run::AuditReport},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Query params accepted by the cleanup endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupQuery {
    #[serde(default)]
    pub dry_run: bool,
    pub mode: Option<String>,
    #[serde(default)]
    pub allow_full_scan: bool,
    /// Stop starting new batches after this many seconds.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub allow_full_scan: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeQuery {
    #[serde(default)]
    pub dry_run: bool,
}

/// Body of `POST /admin/projects/{project_id}/files`.
#[derive(Debug, Deserialize)]
pub struct TrackFileRequest {
    pub object_key: String,
    #[serde(flatten)]
    pub file: NewTrackedFile,
}

#[derive(Debug, Serialize)]
pub struct PurgeStarted {
    pub job_id: Uuid,
}

/// `POST /admin/projects/{project_id}/cleanup`
pub async fn cleanup_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<DeletionResult>, AppError> {
    let mode = match query.mode.as_deref() {
        Some(raw) => raw.parse::<StrategyMode>().map_err(AppError::bad_request)?,
        None => StrategyMode::Auto,
    };
    let mut request = CleanupRequest::new(project_id)
        .dry_run(query.dry_run)
        .mode(mode)
        .allow_full_scan(query.allow_full_scan);
    if let Some(secs) = query.timeout_secs {
        request = request.timeout(Duration::from_secs(secs));
    }

    let result = state.coordinator.cleanup(request).await?;
    Ok(Json(result))
}

/// `GET /admin/projects/{project_id}/audit`
pub async fn audit_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditReport>, AppError> {
    let report = state
        .reporter
        .audit(&project_id, query.allow_full_scan)
        .await?;
    Ok(Json(report))
}

/// `GET /admin/projects/{project_id}/files`
pub async fn list_tracked_files(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<TrackedFileRecord>>, AppError> {
    let project = ProjectIdentifier::normalize(&project_id)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(state.tracker.list_by_project(&project).await?))
}

/// `POST /admin/projects/{project_id}/files`
///
/// Called by the upload path after an object is stored. Tracking failures are
/// logged and reported in the body, never as an error status, so the upload
/// itself is never failed by this call.
pub async fn track_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<TrackFileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let project = ProjectIdentifier::normalize(&project_id)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let tracked = state
        .tracker
        .record_or_log(&project.with_prefix, &body.object_key, body.file)
        .await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "tracked": tracked }))))
}

/// `POST /admin/purge`
pub async fn start_purge(
    State(state): State<AppState>,
    Query(query): Query<PurgeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let job_id = state.purges.start(query.dry_run).await?;
    info!(%job_id, dry_run = query.dry_run, "Purge requested");
    Ok((StatusCode::ACCEPTED, Json(PurgeStarted { job_id })))
}

/// `GET /admin/purge/{job_id}`
pub async fn purge_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<PurgeJob>, AppError> {
    match state.purges.status(job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(AppError::not_found(format!("purge job {job_id} not found"))),
    }
}
