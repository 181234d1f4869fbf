//! The one real `Executor` this repo ships: text-to-speech, chosen because
//! it exercises the artifact-producing path end-to-end. The actual model
//! invocation is out of scope, so this produces a small valid placeholder
//! WAV body instead of invoking a real synthesizer.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::path::PathBuf;

use crate::flavor::{Executor, ExecutorError, ExecutorOutput};
use crate::messages::TaskInputs;

static RESULT_ROOT: OnceCell<String> = OnceCell::new();

/// Must be called once at worker startup, before the Flavor Registry's
/// `tts` executor is constructed.
pub fn init_result_root(path: String) {
    let _ = RESULT_ROOT.set(path);
}

fn result_root() -> &'static str {
    RESULT_ROOT.get().map(String::as_str).unwrap_or("./var/result")
}

pub struct TtsExecutor {
    result_root: String,
}

impl TtsExecutor {
    pub fn new(result_root: impl Into<String>) -> Self {
        Self {
            result_root: result_root.into(),
        }
    }
}

pub fn make_executor() -> Box<dyn Executor> {
    Box::new(TtsExecutor::new(result_root()))
}

/// A minimal, valid 16-bit PCM WAV header wrapping silence, standing in for
/// the absent model invocation.
fn placeholder_wav_bytes(text: &str) -> Vec<u8> {
    let sample_count = (text.len() * 200).clamp(800, 48_000) as u32;
    let data_size = sample_count * 2;
    let mut bytes = Vec::with_capacity(44 + data_size as usize);

    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_size).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&16_000u32.to_le_bytes());
    bytes.extend_from_slice(&32_000u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_size.to_le_bytes());
    bytes.resize(bytes.len() + data_size as usize, 0);

    bytes
}

#[async_trait]
impl Executor for TtsExecutor {
    async fn execute(
        &self,
        inputs: &TaskInputs,
        model: Option<&str>,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let text = inputs
            .params
            .as_ref()
            .and_then(|params| params.get("text"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| ExecutorError::failed("missing required field 'text'"))?;

        if text.trim().is_empty() {
            return Err(ExecutorError::failed("'text' must not be empty"));
        }

        let _ = model;

        let artifact_path = PathBuf::from(&self.result_root).join(format!(
                "{}.wav",
                uuid::Uuid::new_v4()
        ));

        if let Some(parent) = artifact_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| ExecutorError::failed(format!("staging artifact dir: {error}")))?;
        }

        let artifact_path_str = artifact_path.to_string_lossy().into_owned();

        tokio::fs::write(&artifact_path, placeholder_wav_bytes(text))
            .await
            .map_err(|error| {
                ExecutorError::failed_with_artifact(format!("writing artifact: {error}"), &artifact_path_str)
            })?;

        Ok(ExecutorOutput::Artifact(
                artifact_path.to_string_lossy().into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn inputs_with_text(text: &str) -> TaskInputs {
        let mut params = HashMap::new();
        params.insert("text".to_owned(), serde_json::json!(text));
        TaskInputs {
            params: Some(params),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_text_fails() {
        let executor = TtsExecutor::new(std::env::temp_dir().to_string_lossy().into_owned());
        let result = executor.execute(&TaskInputs::default(), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn produces_a_wav_artifact() {
        let dir = std::env::temp_dir().join(format!("aihive-tts-test-{}", uuid::Uuid::new_v4()));
        let executor = TtsExecutor::new(dir.to_string_lossy().into_owned());

        let inputs = inputs_with_text("hello world");
        let output = executor
            .execute(&inputs, Some("female1-en"))
            .await
            .expect("executor should succeed");

        match output {
            ExecutorOutput::Artifact(path) => {
                assert!(path.ends_with(".wav"));
                let bytes = tokio::fs::read(&path).await.expect("artifact should exist");
                assert_eq!(&bytes[0..4], b"RIFF");
                tokio::fs::remove_file(&path).await.ok();
            }
            ExecutorOutput::Inline(_) => panic!("tts executor should produce an artifact"),
        }
    }
}
