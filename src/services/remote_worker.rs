//! RemoteWorkerDelegate hands a key list to an external bulk-deletion service.
//!
//! Contract: `POST {url}` with bearer auth and `{"objectKeys": [...]}`; the
//! worker answers with per-key results. Any failure here is recoverable:
//! the coordinator falls back to deleting through the store itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::WorkerConfig;

#[derive(Debug, Error)]
pub enum RemoteWorkerError {
    #[error("remote worker is not configured")]
    NotConfigured,
    #[error("remote worker request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote worker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest<'a> {
    object_keys: &'a [String],
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkerKeyResult {
    pub key: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkerResponse {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(default)]
    pub results: Vec<WorkerKeyResult>,
}

#[derive(Debug, Clone)]
pub struct RemoteWorkerDelegate {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    enabled: bool,
}

impl RemoteWorkerDelegate {
    pub fn new(config: &WorkerConfig) -> Result<Self, RemoteWorkerError> {
        let url = config.url.clone().ok_or(RemoteWorkerError::NotConfigured)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            url,
            token: config.token.clone(),
            enabled: config.enabled,
        })
    }

    /// Whether the worker joins the `auto` chain. A disabled delegate still
    /// serves an explicit `worker` mode.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Ask the worker to delete `keys`.
    #[instrument(skip(self, keys), fields(url = %self.url, keys = keys.len()))]
    pub async fn delete_keys(&self, keys: &[String]) -> Result<WorkerResponse, RemoteWorkerError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&WorkerRequest { object_keys: keys });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteWorkerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: WorkerResponse = response.json().await?;
        debug!(
            total = parsed.total,
            successful = parsed.successful,
            failed = parsed.failed,
            "Remote worker responded"
        );
        info!(successful = parsed.successful, failed = parsed.failed, "Remote worker deletion finished");
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path},
    };

    fn config(url: String) -> WorkerConfig {
        WorkerConfig {
            enabled: true,
            url: Some(url),
            token: Some("secret-token".into()),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn posts_keys_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/delete"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(serde_json::json!({ "objectKeys": ["a.mp3", "b.mp3"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 2,
                "successful": 1,
                "failed": 1,
                "results": [
                    { "key": "a.mp3", "success": true },
                    { "key": "b.mp3", "success": false, "error": "AccessDenied" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let worker = RemoteWorkerDelegate::new(&config(format!("{}/delete", server.uri()))).unwrap();
        let response = worker
            .delete_keys(&["a.mp3".to_string(), "b.mp3".to_string()])
            .await
            .unwrap();

        assert_eq!(response.total, 2);
        assert_eq!(response.results[1].error.as_deref(), Some("AccessDenied"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let worker = RemoteWorkerDelegate::new(&config(server.uri())).unwrap();
        let err = worker.delete_keys(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, RemoteWorkerError::Status { status: 502, .. }));
    }

    #[test]
    fn requires_a_url() {
        let cfg = WorkerConfig {
            enabled: false,
            url: None,
            token: None,
            timeout_secs: 5,
        };
        assert!(matches!(
            RemoteWorkerDelegate::new(&cfg),
            Err(RemoteWorkerError::NotConfigured)
        ));
    }
}
