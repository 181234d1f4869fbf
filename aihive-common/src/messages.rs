//! Closed set of envelope types exchanged between components: everything
//! that crosses a process boundary (HTTP response, broker message)
//! round-trips through one of these rather than an untyped
//! `serde_json::Value` map.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::job_store::{Job, JobStatus};

/// A task message published by the Ingress API and consumed by the
/// Worker Loop. Durable, JSON UTF-8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    pub flavor: String,
    pub inputs: TaskInputs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// The `inputs` shape of a Job, shared between the task message and the Job
/// Store row.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TaskInputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<HashMap<String, Value>>,
}

/// A result message published by the Worker Loop and consumed by the
/// Result Consumer. Durable, JSON UTF-8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: Uuid,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The subset of `JobStatus` a result message may carry; `pending` never
/// appears on the result queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    InProgress,
    Completed,
    Failed,
}

impl From<ResultStatus> for JobStatus {
    fn from(value: ResultStatus) -> Self {
        match value {
            ResultStatus::InProgress => JobStatus::InProgress,
            ResultStatus::Completed => JobStatus::Completed,
            ResultStatus::Failed => JobStatus::Failed,
        }
    }
}

/// The stable machine-readable status envelope returned by every Ingress API
/// endpoint: `{status, message, code, data}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusEnvelope<T> {
    pub status: bool,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> StatusEnvelope<T> {
    pub fn ok(code: &str, message: &str, data: T) -> Self {
        Self {
            status: true,
            message: message.to_owned(),
            code: code.to_owned(),
            data: Some(data),
        }
    }

    pub fn error(code: &str, message: &str) -> StatusEnvelope<T> {
        StatusEnvelope {
            status: false,
            message: message.to_owned(),
            code: code.to_owned(),
            data: None,
        }
    }
}

/// `data` payload of a successful Submit response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResult {
    pub request_id: Uuid,
}

/// `data` payload of a Status response: the Job record as seen by the caller.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResult {
    pub id: Uuid,
    pub flavor: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub itime: DateTime<Utc>,
    pub utime: DateTime<Utc>,
}

impl From<&Job> for StatusResult {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            flavor: job.flavor.clone(),
            status: job.status,
            result: job.result.clone().map(|json| json.0),
            error: job.error.clone(),
            itime: job.itime,
            utime: job.utime,
        }
    }
}
