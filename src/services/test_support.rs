//! Fault-injecting store wrapper shared by service tests.

use async_trait::async_trait;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::{
    models::object::{BatchDeleteOutcome, DeletionErrorEntry, ListPage, ListRequest},
    services::{
        memory_store::MemoryObjectStore,
        object_store::{ObjectStoreClient, StoreError, StoreResult},
    },
};

/// Wraps a [`MemoryObjectStore`], recording delete calls and injecting failures.
pub struct FaultyStore {
    inner: Arc<MemoryObjectStore>,
    page_size: Option<usize>,
    failing_list_prefixes: Vec<String>,
    unreachable: bool,
    denied_keys: HashSet<String>,
    fail_batches: bool,
    dropped_keys: HashSet<String>,
    cancel_after: Option<(usize, CancellationToken)>,
    delete_calls: Mutex<Vec<usize>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryObjectStore>) -> Self {
        Self {
            inner,
            page_size: None,
            failing_list_prefixes: Vec::new(),
            unreachable: false,
            denied_keys: HashSet::new(),
            fail_batches: false,
            dropped_keys: HashSet::new(),
            cancel_after: None,
            delete_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn fail_list_prefix(mut self, prefix: &str) -> Self {
        self.failing_list_prefixes.push(prefix.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Report `AccessDenied` for `key` and leave it in place.
    pub fn deny(mut self, key: &str) -> Self {
        self.denied_keys.insert(key.to_string());
        self
    }

    /// Fail every DeleteObjects call as a whole.
    pub fn fail_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    /// Leave `key` out of the delete response entirely.
    pub fn drop_from_response(mut self, key: &str) -> Self {
        self.dropped_keys.insert(key.to_string());
        self
    }

    /// Cancel `token` once `calls` delete calls have completed.
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    /// Sizes of every delete batch received, in call order.
    pub fn delete_calls(&self) -> Vec<usize> {
        self.delete_calls.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.unreachable {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStoreClient for FaultyStore {
    async fn list_page(&self, mut request: ListRequest) -> StoreResult<ListPage> {
        self.check_reachable()?;
        if self
            .failing_list_prefixes
            .iter()
            .any(|p| request.prefix.starts_with(p.as_str()))
        {
            return Err(StoreError::Request(format!("InternalError: {}", request.prefix)));
        }
        if let Some(size) = self.page_size {
            request.max_keys = size;
        }
        self.inner.list_page(request).await
    }

    async fn delete_batch(&self, keys: &[String]) -> StoreResult<BatchDeleteOutcome> {
        self.check_reachable()?;
        let calls = {
            let mut calls = self.delete_calls.lock().unwrap();
            calls.push(keys.len());
            calls.len()
        };
        let result = if self.fail_batches {
            Err(StoreError::Request("InternalError: We encountered an internal error".into()))
        } else {
            let (denied, allowed): (Vec<String>, Vec<String>) = keys
                .iter()
                .cloned()
                .partition(|k| self.denied_keys.contains(k));
            let mut outcome = self.inner.delete_batch(&allowed).await?;
            outcome.deleted.retain(|k| !self.dropped_keys.contains(k));
            outcome.errors.extend(
                denied
                    .into_iter()
                    .map(|k| DeletionErrorEntry::new(k, "AccessDenied", "Access Denied")),
            );
            Ok(outcome)
        };

        if let Some((after, token)) = &self.cancel_after {
            if calls >= *after {
                token.cancel();
            }
        }
        result
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_reachable()?;
        self.inner.exists(key).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
