use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;

use crate::lint::{ErrorPolicy, EvaluationJob, FsReader, TextRules};
use crate::parallel::isolated::serve_stdio;

/// Serve one coordinator over stdin/stdout until it stops every slot.
///
/// The error policy here is only a placeholder: the coordinator sends the
/// real one in its initial message.
pub async fn execute() -> Result<ExitCode> {
    let job = EvaluationJob::new(Arc::new(TextRules::new()), Arc::new(FsReader), ErrorPolicy::Abort);
    let outcome = tokio::task::spawn_blocking(move || serve_stdio(job)).await?;
    match outcome {
        Ok(evaluated) => {
            tracing::debug!(evaluated, "worker done");
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            tracing::debug!(error = %error, "worker stopped");
            Ok(ExitCode::from(1))
        }
    }
}
