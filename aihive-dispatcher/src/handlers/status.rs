//! Status: look up a Job by id and return it as a `StatusResult`
//! wrapped in the standard envelope.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use aihive_common::job_store::JobStoreError;
use aihive_common::messages::{StatusEnvelope, StatusResult};

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

    let envelope = StatusEnvelope::ok("ok", "job status", StatusResult::from(&job));
    Ok(Json(envelope))
}
