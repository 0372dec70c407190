//! Object store abstraction: paged LIST, verbose batch DELETE, HEAD.
//!
//! Backends implement the single-request primitives; [`ObjectStoreExt`]
//! builds continuation-token following listings on top of them.

use async_trait::async_trait;
use futures::{Stream, TryStreamExt, stream};
use std::{collections::BTreeSet, pin::Pin};
use thiserror::Error;

use crate::models::object::{BatchDeleteOutcome, ListPage, ListRequest, ObjectSummary};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Network, auth or bucket-level failure; the store cannot be used.
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    /// A single request failed; other requests may still succeed.
    #[error("object store request failed: {0}")]
    Request(String),
    #[error("invalid continuation token: {0}")]
    InvalidContinuationToken(String),
    #[error("batch of {0} keys exceeds the per-request limit")]
    BatchTooLarge(usize),
    #[error("object store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A boxed stream of listing pages.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = StoreResult<ListPage>> + Send + 'a>>;

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Fetch one ListObjectsV2 page.
    async fn list_page(&self, request: ListRequest) -> StoreResult<ListPage>;

    /// Delete up to 1000 keys in one verbose call, reporting every key.
    async fn delete_batch(&self, keys: &[String]) -> StoreResult<BatchDeleteOutcome>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> StoreResult<()> {
        let mut request = ListRequest::prefix("");
        request.max_keys = 1;
        self.list_page(request).await.map(|_| ())
    }

    fn backend_name(&self) -> &'static str;
}

/// Listing helpers that follow continuation tokens.
pub trait ObjectStoreExt: ObjectStoreClient {
    /// Stream every page under `prefix`, following continuation tokens.
    fn list_pages<'a>(&'a self, request: ListRequest) -> PageStream<'a> {
        let state = Some(request);
        Box::pin(stream::try_unfold(state, move |state| async move {
            let Some(request) = state else {
                return Ok::<_, StoreError>(None);
            };
            let page = self.list_page(request.clone()).await?;
            let next = page.next_continuation_token.clone().map(|token| ListRequest {
                continuation_token: Some(token),
                ..request
            });
            Ok::<_, StoreError>(Some((page, next)))
        }))
    }

    /// Collect every object under `prefix`.
    fn list_all<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<ObjectSummary>>> + Send + 'a>> {
        Box::pin(async move {
            let pages: Vec<ListPage> = self
                .list_pages(ListRequest::prefix(prefix))
                .try_collect()
                .await?;
            Ok(pages.into_iter().flat_map(|p| p.objects).collect())
        })
    }

    /// Collect the distinct common prefixes directly under `prefix`.
    fn list_common_prefixes<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let pages: Vec<ListPage> = self
                .list_pages(ListRequest::prefix(prefix).with_delimiter(delimiter))
                .try_collect()
                .await?;
            let prefixes: BTreeSet<String> =
                pages.into_iter().flat_map(|p| p.common_prefixes).collect();
            Ok(prefixes.into_iter().collect())
        })
    }
}

impl<T: ObjectStoreClient + ?Sized> ObjectStoreExt for T {}
