//! FileRecordTracker: the authoritative project to object key index.
//!
//! The upload path writes one row per stored object; the cleanup path reads
//! and deletes them. There is no locking across operations: an upload racing
//! a cleanup of the same project may leave a row behind, which the next
//! cleanup picks up.

use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    project::ProjectIdentifier,
    tracked_file::{NewTrackedFile, TrackedFileRecord},
};

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("object key is empty")]
    EmptyKey,
}

pub type TrackingResult<T> = Result<T, TrackingError>;

const SELECT_COLUMNS: &str = "SELECT id, project_id, object_key, scene_id, file_type, size_bytes, \
     content_type, uploaded_at, metadata FROM tracked_files";

#[derive(Clone)]
pub struct FileRecordTracker {
    db: Arc<SqlitePool>,
}

impl FileRecordTracker {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Record an uploaded object. Re-recording the same key updates the row.
    pub async fn record(
        &self,
        project_id: &str,
        key: &str,
        file: NewTrackedFile,
    ) -> TrackingResult<TrackedFileRecord> {
        if key.trim().is_empty() {
            return Err(TrackingError::EmptyKey);
        }
        let metadata = file
            .metadata
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        let record = sqlx::query_as::<_, TrackedFileRecord>(
            r#"
            INSERT INTO tracked_files (
                project_id, object_key, scene_id, file_type, size_bytes,
                content_type, uploaded_at, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id, object_key) DO UPDATE SET
                scene_id = excluded.scene_id,
                file_type = excluded.file_type,
                size_bytes = excluded.size_bytes,
                content_type = excluded.content_type,
                uploaded_at = excluded.uploaded_at,
                metadata = excluded.metadata
            RETURNING id, project_id, object_key, scene_id, file_type, size_bytes,
                      content_type, uploaded_at, metadata
            "#,
        )
        .bind(project_id)
        .bind(key)
        .bind(file.scene_id)
        .bind(file.file_type)
        .bind(file.size_bytes.max(0))
        .bind(file.content_type)
        .bind(Utc::now())
        .bind(Json(metadata))
        .fetch_one(&*self.db)
        .await?;

        debug!(project_id, key, id = record.id, "Tracked uploaded object");
        Ok(record)
    }

    /// Record an upload without ever failing the caller.
    ///
    /// Returns whether the row was written.
    pub async fn record_or_log(&self, project_id: &str, key: &str, file: NewTrackedFile) -> bool {
        match self.record(project_id, key, file).await {
            Ok(_) => true,
            Err(err) => {
                warn!(project_id, key, error = %err, "Failed to track uploaded object; continuing");
                false
            }
        }
    }

    /// Rows for every form of the project id, in insertion order.
    pub async fn list_by_project(
        &self,
        project: &ProjectIdentifier,
    ) -> TrackingResult<Vec<TrackedFileRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        push_project_filter(&mut builder, project);
        builder.push(" ORDER BY id ASC");

        let rows: Vec<TrackedFileRecord> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    pub async fn count_by_project(&self, project: &ProjectIdentifier) -> TrackingResult<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tracked_files");
        push_project_filter(&mut builder, project);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    /// Delete every row of the project. Idempotent.
    pub async fn delete_by_project(&self, project: &ProjectIdentifier) -> TrackingResult<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM tracked_files");
        push_project_filter(&mut builder, project);
        let result = builder.build().execute(&*self.db).await?;
        Ok(result.rows_affected())
    }

    /// Delete only the project's rows for the given keys.
    pub async fn delete_keys(
        &self,
        project: &ProjectIdentifier,
        keys: &[String],
    ) -> TrackingResult<u64> {
        let mut removed = 0;
        // Stay well below SQLite's bound-parameter limit.
        for chunk in keys.chunks(500) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM tracked_files");
            push_project_filter(&mut builder, project);
            builder.push(" AND object_key IN (");
            {
                let mut separated = builder.separated(", ");
                for key in chunk {
                    separated.push_bind(key);
                }
                separated.push_unseparated(")");
            }
            removed += builder.build().execute(&*self.db).await?.rows_affected();
        }
        Ok(removed)
    }

    /// Delete every row of every project. Used by the whole-bucket purge.
    pub async fn delete_all(&self) -> TrackingResult<u64> {
        let result = sqlx::query("DELETE FROM tracked_files")
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

fn push_project_filter(builder: &mut QueryBuilder<'_, Sqlite>, project: &ProjectIdentifier) {
    builder.push(" WHERE project_id IN (");
    let mut separated = builder.separated(", ");
    for form in project.candidate_forms() {
        separated.push_bind(form);
    }
    separated.push_unseparated(")");
}
