use std::sync::Arc;

use futures::future::try_join_all;

use super::cursor::Cursor;
use super::stream::Pusher;
use crate::error::DispatchError;
use crate::lint::{DiagnosticResult, EvaluationJob};

/// Runs `workers` cooperative workers inside the producer task.
///
/// The workers are joined in a single future, so they interleave at their
/// suspension points (file reads) but never run in parallel. Claims go
/// through the [`Cursor`], never through locks.
pub struct InProcessDispatcher {
    workers: usize,
}

impl InProcessDispatcher {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Evaluate every target reachable through `cursor`, pushing each result.
    ///
    /// The first error aborts the remaining workers; evaluations already in
    /// flight are abandoned at their next suspension point.
    pub async fn run(
        &self,
        job: EvaluationJob,
        cursor: Arc<Cursor>,
        push: Pusher<DiagnosticResult>,
    ) -> Result<(), DispatchError> {
        let workers = self.workers.min(cursor.len().max(1));
        tracing::debug!(files = cursor.len(), workers, "verify files in process");

        let tasks = (0..workers).map(|worker_id| worker(worker_id, &job, &cursor, &push));
        try_join_all(tasks).await?;
        Ok(())
    }
}

async fn worker(
    worker_id: usize,
    job: &EvaluationJob,
    cursor: &Cursor,
    push: &Pusher<DiagnosticResult>,
) -> Result<(), DispatchError> {
    let mut evaluated = 0usize;
    while !push.is_cancelled() {
        let Some(target) = cursor.claim() else {
            break;
        };
        tracing::trace!(worker_id, path = %target.path.display(), "claimed target");
        let result = job.run_async(target).await?;
        push.push(result);
        evaluated += 1;
    }
    tracing::trace!(worker_id, evaluated, "worker finished");
    Ok(())
}
