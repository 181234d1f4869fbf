//! Artifact fetch: returns the produced file's bytes, but only once
//! the job is `completed` and a `result_path` was recorded.

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use uuid::Uuid;

use aihive_common::job_store::{JobStatus, JobStoreError};

use crate::error::IngressError;
use crate::state::AppState;

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, IngressError> {
    let job = match state.store.get(id).await {
        Ok(job) => job,
        Err(JobStoreError::NotFound(_)) => return Err(IngressError::NotFound),
        Err(error) => return Err(error.into()),
    };

    if job.status != JobStatus::Completed {
        return Err(IngressError::ArtifactNotReady);
    }

    let path = job.result_path.ok_or(IngressError::ArtifactNotReady)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(IngressError::StagingIoError)?;

    let content_type = state
        .flavor
        .artifact_extension
        .map(content_type_for_extension)
        .unwrap_or("application/octet-stream");

    Ok(([(CONTENT_TYPE, content_type)], bytes))
}

fn content_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}
