use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use aihive_common::broker::BrokerError;
use aihive_common::job_store::JobStoreError;
use aihive_common::messages::StatusEnvelope;

/// Errors surfaced by the Ingress API handlers. Maps to the
/// validation-error taxonomy: these become 4xx/5xx responses, never panics.
#[derive(Error, Debug)]
pub enum IngressError {
    #[error("duplicate job id")]
    DuplicateId,
    #[error("unknown flavor")]
    UnknownFlavor,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("failed to stage uploaded input: {0}")]
    StagingIoError(std::io::Error),
    #[error("job store error: {0}")]
    JobStoreError(#[from] JobStoreError),
    #[error("broker unavailable: {0}")]
    BrokerError(#[from] BrokerError),
    #[error("job not found")]
    NotFound,
    #[error("artifact not ready")]
    ArtifactNotReady,
}

impl IngressError {
    /// Stable machine token for the envelope's `code` field.
    fn code(&self) -> &'static str {
        match self {
            IngressError::DuplicateId => "duplicate-id",
            IngressError::UnknownFlavor => "unknown-flavor",
            IngressError::MissingField(_) => "missing-field",
            IngressError::StagingIoError(_) => "io-write-failure",
            IngressError::JobStoreError(JobStoreError::DuplicateId(_)) => "duplicate-id",
            IngressError::JobStoreError(_) => "job-store-error",
            IngressError::BrokerError(_) => "broker-unavailable",
            IngressError::NotFound => "not-found",
            IngressError::ArtifactNotReady => "artifact-not-ready",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            IngressError::DuplicateId
            | IngressError::UnknownFlavor
            | IngressError::MissingField(_)
            | IngressError::ArtifactNotReady => StatusCode::BAD_REQUEST,
            IngressError::JobStoreError(JobStoreError::DuplicateId(_)) => StatusCode::CONFLICT,
            IngressError::NotFound | IngressError::JobStoreError(JobStoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            IngressError::StagingIoError(_)
            | IngressError::JobStoreError(_)
            | IngressError::BrokerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let envelope = StatusEnvelope::<()>::error(self.code(), &self.to_string());
        (status, Json(envelope)).into_response()
    }
}
