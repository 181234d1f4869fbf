//! The Callback Client: HTTP PUT to the tenant platform with three
//! status verbs. Client construction follows a `reqwest::Client::builder()`
//! with default headers, a user agent, and a bounded timeout; the
//! `outputFile` artifact case builds a `reqwest::multipart::{Form, Part}`
//! request body.

use std::time::Duration;

use reqwest::header;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::job_store::{JobStatus, JobStore, JobStoreError};

#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("job store error: {0}")]
    JobStoreError(#[from] JobStoreError),
}

/// What shape `set_completed`'s `result` should be delivered in, resolved
/// per-flavor via the Flavor Registry's `produces_artifact` flag.
pub enum CompletedPayload {
    Inline(Value),
    Artifact { path: String },
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CallbackClient {
    client: reqwest::Client,
    base_url: String,
}

impl CallbackClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("aihive-callback-client")
            .timeout(timeout)
            .build()
            .expect("failed to construct reqwest client for callback client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, id: Uuid) -> String {
        format!("{}/api/Request/{}", self.base_url.trim_end_matches('/'), id)
    }

    /// `set_inprogress(id)`: PUT `status=1, output="{}"`. Never
    /// increments `webhook_retry_count` — only `completed`/`failed` do.
    pub async fn set_inprogress(&self, store: &JobStore, id: Uuid) -> Result<bool, CallbackError> {
        let url = self.url_for(id);
        let status_code = self
            .client
            .put(&url)
            .query(&[
                ("status", JobStatus::InProgress.as_webhook_code().to_string()),
                ("output", "{}".to_owned()),
        ])
            .send()
            .await
            .ok()
            .map(|response| response.status().as_u16());

        store
            .record_webhook_attempt(id, status_code, false)
            .await?;

        Ok(status_code == Some(200))
    }

    /// `set_completed(id, result)`: inline JSON query parameter or, for
    /// byte artifacts, a multipart `outputFile` body.
    pub async fn set_completed(
        &self,
        store: &JobStore,
        id: Uuid,
        payload: CompletedPayload,
    ) -> Result<bool, CallbackError> {
        let url = self.url_for(id);
        let status_code = match payload {
            CompletedPayload::Inline(value) => self
                .client
                .put(&url)
                .query(&[
                    ("status", JobStatus::Completed.as_webhook_code().to_string()),
                    ("output", value.to_string()),
            ])
                .send()
                .await
                .ok()
                .map(|response| response.status().as_u16()),
            CompletedPayload::Artifact { path } => match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let filename = path
                        .rsplit('/')
                        .next()
                        .unwrap_or("outputFile")
                        .to_owned();
                    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
                    let form = reqwest::multipart::Form::new().part("outputFile", part);

                    self.client
                        .put(&url)
                        .query(&[
                            ("status", JobStatus::Completed.as_webhook_code().to_string()),
                            ("output", "{}".to_owned()),
                    ])
                        .multipart(form)
                        .send()
                        .await
                        .ok()
                        .map(|response| response.status().as_u16())
                }
                Err(error) => {
                    warn!(%error, %path, "failed to read artifact for webhook delivery");
                    None
                }
            },
        };

        store
            .record_webhook_attempt(id, status_code, true)
            .await?;

        Ok(status_code == Some(200))
    }

    /// `set_failed(id)`: PUT `status=3, output="{}"`.
    pub async fn set_failed(&self, store: &JobStore, id: Uuid) -> Result<bool, CallbackError> {
        let url = self.url_for(id);
        let status_code = self
            .client
            .put(&url)
            .query(&[
                ("status", JobStatus::Failed.as_webhook_code().to_string()),
                ("output", "{}".to_owned()),
        ])
            .send()
            .await
            .ok()
            .map(|response| response.status().as_u16());

        store
            .record_webhook_attempt(id, status_code, true)
            .await?;

        Ok(status_code == Some(200))
    }
}
