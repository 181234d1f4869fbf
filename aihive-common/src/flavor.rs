//! The Job Flavor Registry: a static table mapping each flavor tag to
//! its queue names, ingress schema, artifact shape, and `Executor`.
//!
//! The `Executor` trait is `async_trait`, with a single async method, and
//! object-safe so the registry can hold `Box<dyn Executor>`.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;

use crate::messages::TaskInputs;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("{message}")]
    Failed {
        message: String,
        /// Path to an artifact file the executor had partially written
        /// before failing, if any. The worker loop deletes this on the
        /// executor's behalf so a failed job never leaves a stray file
        /// under the result root (P4 Artifact-absent-on-failure).
        partial_artifact_path: Option<String>,
    },
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutorError::Failed {
            message: message.into(),
            partial_artifact_path: None,
        }
    }

    pub fn failed_with_artifact(message: impl Into<String>, partial_artifact_path: impl Into<String>) -> Self {
        ExecutorError::Failed {
            message: message.into(),
            partial_artifact_path: Some(partial_artifact_path.into()),
        }
    }

    /// The partial artifact path to clean up, if this failure left one
    /// behind.
    pub fn partial_artifact_path(&self) -> Option<&str> {
        match self {
            ExecutorError::Failed { partial_artifact_path, .. } => partial_artifact_path.as_deref(),
        }
    }
}

/// Outcome of a successful `Executor::execute` call: either an inline
/// payload suitable for the status endpoint and a `completed` webhook, or a
/// path to a produced artifact file.
#[derive(Debug, Clone)]
pub enum ExecutorOutput {
    Inline(Value),
    Artifact(String),
}

/// The opaque AI task. Everything flavor-specific is reduced to this one
/// async method; the core pipeline never inspects what happens inside it.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        inputs: &TaskInputs,
        model: Option<&str>,
    ) -> Result<ExecutorOutput, ExecutorError>;
}

/// A typed ingress field descriptor, used to validate/describe a flavor's
/// JSON submission schema.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    File,
}

/// A registered flavor: everything the core pipeline needs to treat
/// a flavor generically.
pub struct FlavorDescriptor {
    pub tag: &'static str,
    pub schema: &'static [FieldDescriptor],
    pub produces_artifact: bool,
    pub artifact_extension: Option<&'static str>,
    pub executor: fn() -> Box<dyn Executor>,
}

impl FlavorDescriptor {
    pub fn queue_names(&self) -> crate::broker::QueueNames {
        crate::broker::QueueNames::for_flavor(self.tag)
    }
}

struct NotImplementedExecutor {
    flavor: &'static str,
}

#[async_trait]
impl Executor for NotImplementedExecutor {
    async fn execute(
        &self,
        _inputs: &TaskInputs,
        _model: Option<&str>,
    ) -> Result<ExecutorOutput, ExecutorError> {
        Err(ExecutorError::failed(format!(
                    "no executor registered for flavor '{}'",
                    self.flavor
        )))
    }
}

macro_rules! not_implemented_executor {
    ($flavor:literal) => {
        || -> Box<dyn Executor> { Box::new(NotImplementedExecutor { flavor: $flavor }) }
    };
}

static REGISTRY: Lazy<Vec<FlavorDescriptor>> = Lazy::new(|| {
        vec![
            FlavorDescriptor {
                tag: "tts",
                schema: &[
                    FieldDescriptor {
                        name: "text",
                        kind: FieldKind::Text,
                        required: true,
                    },
                    FieldDescriptor {
                        name: "model",
                        kind: FieldKind::Text,
                        required: false,
                    },
                ],
                produces_artifact: true,
                artifact_extension: Some("wav"),
                executor: crate::tts::make_executor,
            },
            FlavorDescriptor {
                tag: "asr",
                schema: &[FieldDescriptor {
                        name: "audio",
                        kind: FieldKind::File,
                        required: true,
                }],
                produces_artifact: false,
                artifact_extension: None,
                executor: not_implemented_executor!("asr"),
            },
            FlavorDescriptor {
                tag: "ocr",
                schema: &[FieldDescriptor {
                        name: "image",
                        kind: FieldKind::File,
                        required: true,
                }],
                produces_artifact: false,
                artifact_extension: None,
                executor: not_implemented_executor!("ocr"),
            },
            FlavorDescriptor {
                tag: "pose",
                schema: &[FieldDescriptor {
                        name: "image",
                        kind: FieldKind::File,
                        required: true,
                }],
                produces_artifact: false,
                artifact_extension: None,
                executor: not_implemented_executor!("pose"),
            },
            FlavorDescriptor {
                tag: "face",
                schema: &[FieldDescriptor {
                        name: "image",
                        kind: FieldKind::File,
                        required: true,
                }],
                produces_artifact: false,
                artifact_extension: None,
                executor: not_implemented_executor!("face"),
            },
            FlavorDescriptor {
                tag: "hand",
                schema: &[FieldDescriptor {
                        name: "image",
                        kind: FieldKind::File,
                        required: true,
                }],
                produces_artifact: false,
                artifact_extension: None,
                executor: not_implemented_executor!("hand"),
            },
            FlavorDescriptor {
                tag: "llm_analysis",
                schema: &[FieldDescriptor {
                        name: "prompt",
                        kind: FieldKind::Text,
                        required: true,
                }],
                produces_artifact: false,
                artifact_extension: None,
                executor: not_implemented_executor!("llm_analysis"),
            },
        ]
});

static REGISTRY_BY_TAG: Lazy<HashMap<&'static str, &'static FlavorDescriptor>> =
Lazy::new(|| REGISTRY.iter().map(|d| (d.tag, d)).collect());

pub fn all() -> &'static [FlavorDescriptor] {
    &REGISTRY
}

pub fn lookup(tag: &str) -> Option<&'static FlavorDescriptor> {
    REGISTRY_BY_TAG.get(tag).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_flavor_is_lookup_able() {
        for descriptor in all() {
            assert!(lookup(descriptor.tag).is_some());
        }
    }

    #[test]
    fn unknown_flavor_is_not_registered() {
        assert!(lookup("carrier-pigeon-ocr").is_none());
    }

    #[tokio::test]
    async fn unregistered_flavor_executors_fail_immediately() {
        let descriptor = lookup("asr").expect("asr is registered");
        let executor = (descriptor.executor)();
        let result = executor.execute(&TaskInputs::default(), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tts_flavor_has_a_real_executor() {
        let descriptor = lookup("tts").expect("tts is registered");
        assert!(descriptor.produces_artifact);
        assert_eq!(descriptor.artifact_extension, Some("wav"));
    }
}
