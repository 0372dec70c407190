//! In-process object store with ListObjectsV2 semantics.
//!
//! Keys are held in a `BTreeMap` so listings come back in lexicographic
//! order, exactly like S3. Used by `backend = "memory"` for local runs and by
//! the test suite.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::RwLock,
};
use tracing::debug;

use crate::{
    models::object::{
        BatchDeleteOutcome, ListPage, ListRequest, MAX_KEYS_PER_REQUEST, ObjectSummary,
    },
    services::object_store::{ObjectStoreClient, StoreError, StoreResult},
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, overwriting any existing one under the same key.
    pub fn put(&self, key: impl Into<String>, data: impl Into<Bytes>) -> StoreResult<()> {
        let data = data.into();
        let etag = format!("{:x}", md5::compute(&data));
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StoreError::Request("memory store lock poisoned".into()))?;
        objects.insert(
            key.into(),
            StoredObject {
                data,
                etag,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key, in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryObjectStore {
    async fn list_page(&self, request: ListRequest) -> StoreResult<ListPage> {
        let max_keys = request.max_keys.clamp(1, MAX_KEYS_PER_REQUEST);
        let start_after = request
            .continuation_token
            .as_deref()
            .map(decode_continuation_token)
            .transpose()?;

        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::Request("memory store lock poisoned".into()))?;

        let mut page = ListPage::default();
        let mut common_prefixes = BTreeSet::new();
        let mut returned = 0usize;
        let mut last_key: Option<&String> = None;
        let mut truncated = false;

        let candidates = objects
            .iter()
            .filter(|(key, _)| key.starts_with(&request.prefix))
            .filter(|(key, _)| start_after.as_ref().is_none_or(|after| *key > after));

        for (key, obj) in candidates {
            if let Some(delim) = request.delimiter.as_deref() {
                if let Some(prefix) = compute_common_prefix(key, &request.prefix, delim) {
                    // A group counts once toward max-keys.
                    if !common_prefixes.contains(&prefix) {
                        if returned == max_keys {
                            truncated = true;
                            break;
                        }
                        common_prefixes.insert(prefix);
                        returned += 1;
                    }
                    last_key = Some(key);
                    continue;
                }
            }
            if returned == max_keys {
                truncated = true;
                break;
            }
            page.objects.push(ObjectSummary {
                key: key.clone(),
                size: obj.data.len() as u64,
                last_modified: Some(obj.last_modified),
                etag: Some(obj.etag.clone()),
            });
            returned += 1;
            last_key = Some(key);
        }

        if truncated {
            page.next_continuation_token = last_key.map(|k| encode_continuation_token(k));
        }
        page.common_prefixes = common_prefixes.into_iter().collect();
        Ok(page)
    }

    async fn delete_batch(&self, keys: &[String]) -> StoreResult<BatchDeleteOutcome> {
        if keys.len() > MAX_KEYS_PER_REQUEST {
            return Err(StoreError::BatchTooLarge(keys.len()));
        }
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StoreError::Request("memory store lock poisoned".into()))?;

        // Like S3, deleting a missing key is reported as a success.
        let mut outcome = BatchDeleteOutcome::default();
        for key in keys {
            if objects.remove(key).is_none() {
                debug!(key, "key already absent");
            }
            outcome.deleted.push(key.clone());
        }
        Ok(outcome)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::Request("memory store lock poisoned".into()))?;
        Ok(objects.contains_key(key))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Compute the "common prefix" a key rolls up into under a delimiter.
///
/// Returns `None` when the key has no delimiter past the requested prefix.
fn compute_common_prefix(key: &str, requested_prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(requested_prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!(
        "{}{}",
        requested_prefix,
        &after_prefix[..pos + delimiter.len()]
    ))
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_continuation_token(token: &str) -> StoreResult<String> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| StoreError::InvalidContinuationToken(token.to_string()))
}
