//! S3-compatible backend built on `aws-sdk-s3`.
//!
//! Works with AWS S3, MinIO, Cloudflare R2, DigitalOcean Spaces and any
//! other service speaking ListObjectsV2 / DeleteObjects.

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    error::{ProvideErrorMetadata, SdkError},
    types::{Delete, ObjectIdentifier},
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::StoreConfig,
    models::object::{
        BatchDeleteOutcome, DeletionErrorEntry, ListPage, ListRequest, MAX_KEYS_PER_REQUEST,
        ObjectSummary,
    },
    services::object_store::{ObjectStoreClient, StoreError, StoreResult},
};

/// Service error codes that mean the bucket cannot be used at all.
const FATAL_CODES: [&str; 5] = [
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "NoSuchBucket",
    "ExpiredToken",
];

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3ObjectStore {
    pub async fn new(config: &StoreConfig) -> StoreResult<Self> {
        if config.bucket.is_empty() {
            return Err(StoreError::Config("bucket name is empty".into()));
        }
        info!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing S3 object store");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "storage-reclaimer-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(s3_config_builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    #[instrument(skip(self, request), fields(bucket = %self.bucket, prefix = %request.prefix))]
    async fn list_page(&self, request: ListRequest) -> StoreResult<ListPage> {
        let max_keys = request.max_keys.clamp(1, MAX_KEYS_PER_REQUEST) as i32;
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.continuation_token.clone())
            .max_keys(max_keys)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                Some(ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())),
                    etag: obj.e_tag().map(|e| e.trim_matches('"').to_string()),
                })
            })
            .collect::<Vec<_>>();

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(str::to_string))
            .collect();

        let next_continuation_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        debug!(count = objects.len(), truncated = next_continuation_token.is_some(), "Listed page");

        Ok(ListPage {
            objects,
            common_prefixes,
            next_continuation_token,
        })
    }

    #[instrument(skip(self, keys), fields(bucket = %self.bucket, batch = keys.len()))]
    async fn delete_batch(&self, keys: &[String]) -> StoreResult<BatchDeleteOutcome> {
        if keys.len() > MAX_KEYS_PER_REQUEST {
            return Err(StoreError::BatchTooLarge(keys.len()));
        }
        if keys.is_empty() {
            return Ok(BatchDeleteOutcome::default());
        }

        let identifiers = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| StoreError::Request(e.to_string()))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(false)
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let deleted = output
            .deleted()
            .iter()
            .filter_map(|d| d.key().map(str::to_string))
            .collect();
        let errors: Vec<DeletionErrorEntry> = output
            .errors()
            .iter()
            .map(|e| {
                DeletionErrorEntry::new(
                    e.key().unwrap_or_default(),
                    e.code().unwrap_or("Unknown"),
                    e.message().unwrap_or_default(),
                )
            })
            .collect();
        if !errors.is_empty() {
            warn!(failed = errors.len(), "Store reported per-key delete failures");
        }

        Ok(BatchDeleteOutcome { deleted, errors })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let SdkError::ServiceError(service_err) = &err {
                    if service_err.err().is_not_found() {
                        return Ok(false);
                    }
                }
                Err(map_sdk_error(err))
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Classify an SDK failure.
///
/// Transport failures and credential/bucket errors make the store unusable;
/// anything else is a failure of one request.
fn map_sdk_error<E>(err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StoreError::Unavailable(err.to_string())
        }
        SdkError::ServiceError(service_err) => {
            let code = service_err.err().code().unwrap_or("Unknown");
            let message = service_err.err().message().unwrap_or_default();
            if FATAL_CODES.contains(&code) {
                StoreError::Unavailable(format!("{code}: {message}"))
            } else {
                StoreError::Request(format!("{code}: {message}"))
            }
        }
        _ => StoreError::Request(err.to_string()),
    }
}
