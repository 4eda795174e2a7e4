use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::{DiagnosticResult, LintConfig, Target};
use crate::error::DispatchError;

/// Runs the ruleset on one file. Must be pure with respect to the dispatch:
/// it may be called from any task, thread or process.
pub trait Evaluator: Send + Sync + 'static {
    fn evaluate(
        &self,
        config: &LintConfig,
        path: &Path,
        contents: &str,
    ) -> anyhow::Result<DiagnosticResult>;
}

impl<F> Evaluator for F
where
    F: Fn(&LintConfig, &Path, &str) -> anyhow::Result<DiagnosticResult> + Send + Sync + 'static,
{
    fn evaluate(
        &self,
        config: &LintConfig,
        path: &Path,
        contents: &str,
    ) -> anyhow::Result<DiagnosticResult> {
        self(config, path, contents)
    }
}

/// Loads the source text of a target.
pub trait SourceReader: Send + Sync + 'static {
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads targets from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl SourceReader for FsReader {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// What to do when reading or evaluating a single file fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Fail the whole dispatch with the first per-file error.
    #[default]
    Abort,
    /// Turn the failure into a fatal diagnostic for that file and keep going.
    Report,
}

/// Read + evaluate + error policy for one target, shared by every strategy.
#[derive(Clone)]
pub struct EvaluationJob {
    evaluator: Arc<dyn Evaluator>,
    reader: Arc<dyn SourceReader>,
    policy: ErrorPolicy,
}

impl EvaluationJob {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        reader: Arc<dyn SourceReader>,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            evaluator,
            reader,
            policy,
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Evaluate a target, blocking on the file read.
    pub fn run(&self, target: &Target) -> Result<DiagnosticResult, DispatchError> {
        let contents = self.reader.read(&target.path);
        self.finish(target, contents)
    }

    /// Evaluate a target, suspending while the file is read.
    pub async fn run_async(&self, target: &Target) -> Result<DiagnosticResult, DispatchError> {
        let reader = Arc::clone(&self.reader);
        let path = target.path.clone();
        let contents = tokio::task::spawn_blocking(move || reader.read(&path))
            .await
            .unwrap_or_else(|join_error| Err(io::Error::other(join_error.to_string())));
        self.finish(target, contents)
    }

    fn finish(
        &self,
        target: &Target,
        contents: io::Result<String>,
    ) -> Result<DiagnosticResult, DispatchError> {
        let outcome = match contents {
            Ok(contents) => self
                .evaluator
                .evaluate(&target.config, &target.path, &contents)
                .map_err(|e| DispatchError::Evaluation {
                    path: target.path.clone(),
                    message: format!("{e:#}"),
                }),
            Err(e) => Err(DispatchError::Read {
                path: target.path.clone(),
                message: e.to_string(),
            }),
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(error) if self.policy == ErrorPolicy::Report => {
                tracing::debug!(path = %target.path.display(), %error, "reporting failure as diagnostic");
                Ok(DiagnosticResult::from_failure(
                    target.path.clone(),
                    error.to_string(),
                ))
            }
            Err(error) => Err(error),
        }
    }
}
