//! Defines routes for the health probes and the administrative surface.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Project endpoints**
//!   - `POST /admin/projects/{project_id}/cleanup` (dry_run, mode, allow_full_scan, timeout_secs)
//!   - `GET  /admin/projects/{project_id}/audit` (allow_full_scan)
//!   - `GET  /admin/projects/{project_id}/files` lists tracked records
//!   - `POST /admin/projects/{project_id}/files` records an uploaded object
//!
//! - **Purge endpoints**
//!   - `POST /admin/purge` (dry_run) starts a background job
//!   - `GET  /admin/purge/{job_id}` reports its state

use crate::{
    handlers::{
        cleanup_handlers::{
            audit_project, cleanup_project, list_tracked_files, purge_status, start_purge,
            track_file,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router carrying `AppState` to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Project-level routes
        .route("/admin/projects/{project_id}/cleanup", post(cleanup_project))
        .route("/admin/projects/{project_id}/audit", get(audit_project))
        .route(
            "/admin/projects/{project_id}/files",
            get(list_tracked_files).post(track_file),
        )
        // Bucket-level purge
        .route("/admin/purge", post(start_purge))
        .route("/admin/purge/{job_id}", get(purge_status))
}
