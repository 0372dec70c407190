//! Object store views: listing pages and per-key delete outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The store's hard limit on keys per `DeleteObjects` call and per list page.
pub const MAX_KEYS_PER_REQUEST: usize = 1000;

/// An object as reported by a LIST call. Reflects store state at list time only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// When the store last saw a write to this key.
    pub last_modified: Option<DateTime<Utc>>,

    /// Entity tag without surrounding quotes.
    pub etag: Option<String>,
}

/// Parameters for a single ListObjectsV2 page.
#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

impl ListRequest {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            max_keys: MAX_KEYS_PER_REQUEST,
            ..Self::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }
}

/// One page of a listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    /// Token for the next page; `None` on the last page.
    pub next_continuation_token: Option<String>,
}

/// A per-key failure reported by the store (or synthesized for a failed call).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeletionErrorEntry {
    pub key: String,
    pub code: String,
    pub message: String,
}

impl DeletionErrorEntry {
    pub fn new(key: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result of one verbose `DeleteObjects` call.
#[derive(Clone, Debug, Default)]
pub struct BatchDeleteOutcome {
    pub deleted: Vec<String>,
    pub errors: Vec<DeletionErrorEntry>,
}
