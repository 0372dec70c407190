//! Represents an uploaded object recorded against its project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

/// A row in `tracked_files`, written by the upload path when an object is stored.
///
/// The object existed when the row was written; it may since have been
/// deleted out of band.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct TrackedFileRecord {
    /// Autoincrement row id; defines insertion order.
    pub id: i64,

    /// Project id exactly as the upload path supplied it.
    pub project_id: String,

    /// Key of the object in the bucket.
    pub object_key: String,

    pub scene_id: Option<String>,

    /// Free-form type tag (e.g. "audio", "image").
    pub file_type: Option<String>,

    pub size_bytes: i64,

    pub content_type: Option<String>,

    pub uploaded_at: DateTime<Utc>,

    /// Arbitrary extra attributes from the uploader.
    pub metadata: Json<serde_json::Value>,
}

/// Attributes supplied when recording an upload.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct NewTrackedFile {
    pub scene_id: Option<String>,
    pub file_type: Option<String>,
    #[serde(default)]
    pub size_bytes: i64,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}
