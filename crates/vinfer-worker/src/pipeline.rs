//! Inference pipeline abstraction.
//!
//! The pipeline is an opaque collaborator: it receives a stored video and the
//! processing parameters and produces an artifact. [`CommandPipeline`] runs an
//! external program; tests and embedders can implement the trait directly.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use vinfer_models::{Artifact, ProcessingParams, VideoFingerprint, DEFAULT_ARTIFACT_CONTENT_TYPE};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Placeholder replaced by the video path in pipeline arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Bytes of stderr kept in failure messages.
const STDERR_TAIL_BYTES: usize = 2048;

/// A stored video ready for inference.
#[derive(Debug, Clone)]
pub struct VideoInput {
    pub fingerprint: VideoFingerprint,
    pub path: PathBuf,
    pub params: ProcessingParams,
}

/// Produces an artifact from a video.
#[async_trait]
pub trait InferencePipeline: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str {
        "pipeline"
    }

    async fn run(&self, input: &VideoInput) -> WorkerResult<Artifact>;
}

/// Pipeline backed by an external program.
///
/// The program receives the video path through its arguments and the
/// parameters as `VINFER_*` environment variables. Whatever it writes to
/// stdout becomes the artifact.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    program: PathBuf,
    args: Vec<String>,
    content_type: String,
}

impl CommandPipeline {
    /// Resolve `program` on `PATH` (or as a path) and build a pipeline.
    pub fn new<I, S>(program: &str, args: I) -> WorkerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let resolved = which::which(program).map_err(|e| {
            WorkerError::config_error(format!("Pipeline program {:?} not found: {}", program, e))
        })?;

        Ok(Self {
            program: resolved,
            args: args.into_iter().map(Into::into).collect(),
            content_type: DEFAULT_ARTIFACT_CONTENT_TYPE.to_string(),
        })
    }

    /// Build the configured pipeline, if any.
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Option<Self>> {
        config
            .pipeline_command
            .as_deref()
            .map(|program| Self::new(program, config.pipeline_args.iter().cloned()))
            .transpose()
    }

    /// Set the content type recorded for produced artifacts.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn build_args(&self, input: &VideoInput) -> Vec<String> {
        let path = input.path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, &path))
            .collect()
    }

    fn build_env(input: &VideoInput) -> Vec<(String, String)> {
        let params = &input.params;
        let mut env = vec![
            ("VINFER_FINGERPRINT".to_string(), input.fingerprint.to_string()),
            ("VINFER_MODEL_VERSION".to_string(), params.model_version.clone()),
            (
                "VINFER_PARAMS".to_string(),
                String::from_utf8_lossy(&params.canonical_bytes()).into_owned(),
            ),
        ];
        if let Some(width) = params.target_width {
            env.push(("VINFER_TARGET_WIDTH".to_string(), width.to_string()));
        }
        if let Some(height) = params.target_height {
            env.push(("VINFER_TARGET_HEIGHT".to_string(), height.to_string()));
        }
        if let Some(stride) = params.frame_stride {
            env.push(("VINFER_FRAME_STRIDE".to_string(), stride.to_string()));
        }
        for (key, value) in &params.options {
            env.push((format!("VINFER_OPT_{}", env_key(key)), value.clone()));
        }
        env
    }
}

#[async_trait]
impl InferencePipeline for CommandPipeline {
    fn name(&self) -> &str {
        "command"
    }

    async fn run(&self, input: &VideoInput) -> WorkerResult<Artifact> {
        let args = self.build_args(input);
        debug!(
            fingerprint = %input.fingerprint,
            "Running pipeline: {} {}",
            self.program.display(),
            args.join(" ")
        );

        let output = Command::new(&self.program)
            .args(&args)
            .envs(Self::build_env(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                WorkerError::computation(format!(
                    "Failed to start pipeline {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let tail = stderr_tail(&output.stderr);
            warn!(
                fingerprint = %input.fingerprint,
                code = ?output.status.code(),
                stderr = %tail,
                "Pipeline exited with failure"
            );
            return Err(WorkerError::computation(match output.status.code() {
                Some(code) => format!("pipeline exited with status {}: {}", code, tail),
                None => format!("pipeline terminated by signal: {}", tail),
            }));
        }

        if output.stdout.is_empty() {
            return Err(WorkerError::computation("pipeline produced no output"));
        }

        Ok(Artifact::with_content_type(output.stdout, self.content_type.clone()))
    }
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
