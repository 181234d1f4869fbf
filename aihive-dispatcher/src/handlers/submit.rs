//! Submit: accepts multipart uploads or a JSON body, stages any
//! binary inputs, inserts a `pending` Job row, and publishes a task message.
//! On any success path exactly one row exists and exactly one message has
//! been published; on a duplicate id the staged files are removed.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::Request;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use aihive_common::flavor::{FieldKind, FlavorDescriptor};
use aihive_common::job_store::NewJob;
use aihive_common::messages::{StatusEnvelope, SubmitResult, TaskInputs, TaskMessage};
use aihive_common::staging;

use crate::error::IngressError;
use crate::state::AppState;

const MIN_PRIORITY: i32 = 1;
const MAX_PRIORITY: i32 = 10;
const DEFAULT_PRIORITY: i32 = 5;

/// Fields parsed out of either submission shape before they're turned into
/// a `NewJob` + `TaskMessage` pair.
struct ParsedSubmission {
    id: Uuid,
    priority: i32,
    model: Option<String>,
    inputs: TaskInputs,
}

pub async fn post(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<impl IntoResponse, IngressError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let staged_root = state.staging_root.clone();
    let (parsed, staged_files) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|_| IngressError::MissingField("multipart body"))?;
        parse_multipart(multipart, &staged_root).await?
    } else {
        let Json(body): Json<Value> = Json::from_request(request, &state)
            .await
            .map_err(|_| IngressError::MissingField("json body"))?;
        (parse_json(body)?, Vec::new())
    };

    if let Err(error) = validate_against_schema(state.flavor, &parsed.inputs) {
        cleanup_staged(&staged_files).await;
        return Err(error);
    }

    let new_job = NewJob {
        id: parsed.id,
        flavor: state.flavor.tag.to_owned(),
        priority: parsed.priority,
        inputs: parsed.inputs.clone(),
        model: parsed.model.clone(),
    };

    let job = match state.store.insert(new_job).await {
        Ok(job) => job,
        Err(error) => {
            cleanup_staged(&staged_files).await;
            return Err(error.into());
        }
    };

    let task = TaskMessage {
        id: job.id,
        flavor: job.flavor.clone(),
        inputs: parsed.inputs,
        model: parsed.model,
        priority: Some(parsed.priority),
    };

    {
        let mut broker = state.broker.lock().await;
        if let Err(error) = broker.publish_task(&task).await {
            // The job row stays `pending` for the Janitor's stale-pending
            // sweep to reconcile; only the staged file is ours to clean up.
            cleanup_staged(&staged_files).await;
            return Err(error.into());
        }
    }

    let envelope = StatusEnvelope::ok(
        "ok",
        "job accepted",
        SubmitResult { request_id: job.id },
    );

    Ok(Json(envelope))
}

async fn parse_multipart(
    mut multipart: Multipart,
    staging_root: &std::path::Path,
) -> Result<(ParsedSubmission, Vec<std::path::PathBuf>), IngressError> {
    let now = Utc::now();
    let mut id: Option<Uuid> = None;
    let mut priority: Option<i32> = None;
    let mut model: Option<String> = None;
    let mut params: HashMap<String, Value> = HashMap::new();
    let mut staged_files = Vec::new();
    let mut primary_path: Option<String> = None;
    let mut secondary_path: Option<String> = None;

    // The job id must be known before any file can be staged (it's part of
    // the staged filename), so multipart forms that set `id` MUST send that
    // field before any file field (id first, payload last).
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| IngressError::StagingIoError(std::io::Error::new(std::io::ErrorKind::Other, error)))?
    {
        let name = field.name().unwrap_or("").to_owned();
        let filename = field.file_name().map(str::to_owned);

        if let Some(filename) = filename {
            let job_id = *id.get_or_insert_with(Uuid::new_v4);
            let bytes = field
                .bytes()
                .await
                .map_err(|error| IngressError::StagingIoError(std::io::Error::new(std::io::ErrorKind::Other, error)))?;

            let path = staging::staging_path(staging_root, now, job_id, &filename);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(IngressError::StagingIoError)?;
            }
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(IngressError::StagingIoError)?;

            let path_str = path.to_string_lossy().into_owned();
            if primary_path.is_none() {
                primary_path = Some(path_str);
            } else if secondary_path.is_none() {
                secondary_path = Some(path_str);
            }
            staged_files.push(path);
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|error| IngressError::StagingIoError(std::io::Error::new(std::io::ErrorKind::Other, error)))?;

        match name.as_str() {
            "id" => id = Uuid::parse_str(&text).ok().or(id),
            "priority" => priority = text.parse::<i32>().ok(),
            "model" => model = Some(text),
            _ => {
                let value = serde_json::from_str::<Value>(&text)
                    .unwrap_or_else(|_| Value::String(text.clone()));
                params.insert(name, value);
            }
        }
    }

    let parsed = ParsedSubmission {
        id: id.unwrap_or_else(Uuid::new_v4),
        priority: clamp_priority(priority),
        model,
        inputs: TaskInputs {
            primary_path,
            secondary_path,
            params: if params.is_empty() { None } else { Some(params) },
        },
    };

    Ok((parsed, staged_files))
}

fn parse_json(body: Value) -> Result<ParsedSubmission, IngressError> {
    let mut object = match body {
        Value::Object(map) => map,
        _ => return Err(IngressError::MissingField("json body must be an object")),
    };

    let id = object
        .remove("id")
        .and_then(|value| value.as_str().and_then(|s| Uuid::parse_str(s).ok()))
        .unwrap_or_else(Uuid::new_v4);

    let priority = object
        .remove("priority")
        .and_then(|value| value.as_i64())
        .map(|value| value as i32);

    let model = object
        .remove("model")
        .and_then(|value| value.as_str().map(str::to_owned));

    let params: HashMap<String, Value> = object.into_iter().collect();

    Ok(ParsedSubmission {
            id,
            priority: clamp_priority(priority),
            model,
            inputs: TaskInputs {
                primary_path: None,
                secondary_path: None,
                params: if params.is_empty() { None } else { Some(params) },
            },
    })
}

fn clamp_priority(priority: Option<i32>) -> i32 {
    priority
        .unwrap_or(DEFAULT_PRIORITY)
        .clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Checks the submission against the flavor's advertised schema:
/// every required field must be present either as a staged file (`File`
/// fields) or in `params` (everything else).
fn validate_against_schema(
    flavor: &'static FlavorDescriptor,
    inputs: &TaskInputs,
) -> Result<(), IngressError> {
    let has_file = inputs.primary_path.is_some() || inputs.secondary_path.is_some();

    for field in flavor.schema {
        if !field.required {
            continue;
        }
        let present = match field.kind {
            FieldKind::File => has_file,
            _ => inputs
                .params
                .as_ref()
                .is_some_and(|params| params.contains_key(field.name)),
        };
        if !present {
            return Err(IngressError::MissingField(field.name));
        }
    }

    Ok(())
}

async fn cleanup_staged(paths: &[std::path::PathBuf]) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_is_clamped_to_the_advisory_range() {
        assert_eq!(clamp_priority(None), DEFAULT_PRIORITY);
        assert_eq!(clamp_priority(Some(0)), MIN_PRIORITY);
        assert_eq!(clamp_priority(Some(99)), MAX_PRIORITY);
        assert_eq!(clamp_priority(Some(7)), 7);
    }

    #[test]
    fn json_submission_without_id_gets_a_fresh_uuid() {
        let parsed = parse_json(serde_json::json!({"text": "hello"})).unwrap();
        assert_ne!(parsed.id, Uuid::nil());
        assert_eq!(
            parsed.inputs.params.unwrap().get("text").unwrap(),
            "hello"
        );
    }

    #[test]
    fn json_submission_honors_a_caller_supplied_id() {
        let id = Uuid::new_v4();
        let parsed =
        parse_json(serde_json::json!({"id": id.to_string(), "text": "hi"})).unwrap();
        assert_eq!(parsed.id, id);
    }
}
