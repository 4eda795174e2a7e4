use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::cursor::Cursor;
use super::estimator::{Capabilities, estimate, host_parallelism};
use super::in_process::InProcessDispatcher;
use super::isolated::{
    ContextKind, ContextSpawner, IsolatedDispatcher, ProcessSpawner, ThreadSpawner, WorkerOptions,
};
use super::stream::{ResultStream, StreamHooks};
use crate::config::{Concurrency, DispatchSettings, Strategy};
use crate::error::{DispatchError, UsageError};
use crate::lint::{DiagnosticResult, EvaluationJob, Evaluator, FsReader, SourceReader, Target};

/// How a dispatch will run once concurrency is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// One evaluation at a time in the dispatching task.
    Sequential,
    InProcess { workers: usize },
    Isolated { contexts: usize, kind: ContextKind },
}

impl Plan {
    pub fn concurrency(&self) -> usize {
        match self {
            Plan::Sequential => 1,
            Plan::InProcess { workers } => *workers,
            Plan::Isolated { contexts, .. } => *contexts,
        }
    }
}

/// Entry point of the dispatch engine.
///
/// Resolves the requested concurrency, picks a strategy and returns the
/// [`ResultStream`] the chosen dispatcher feeds. Only one dispatch may be in
/// flight per coordinator; the slot frees up when its producer stops.
pub struct Coordinator {
    evaluator: Arc<dyn Evaluator>,
    reader: Arc<dyn SourceReader>,
    settings: DispatchSettings,
    capabilities: Capabilities,
    spawner: Option<Arc<dyn ContextSpawner>>,
    worker_command: Option<ProcessSpawner>,
    in_flight: Arc<AtomicBool>,
}

impl Coordinator {
    /// `evaluator` runs in-process and on thread contexts.
    ///
    /// Process contexts cannot receive it: they run whatever evaluator the
    /// worker program was built with (the `batchlint` binary runs
    /// [`TextRules`](crate::lint::TextRules)). Use
    /// [`with_worker_command`](Self::with_worker_command) to point them at a
    /// program serving the same evaluator, or avoid [`Strategy::Processes`].
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            evaluator,
            reader: Arc::new(FsReader),
            settings: DispatchSettings::default(),
            capabilities: Capabilities::probe(),
            spawner: None,
            worker_command: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Use `spawner` for every isolated dispatch instead of threads/processes.
    pub fn with_spawner(mut self, spawner: Arc<dyn ContextSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Program used for process-backed contexts (default: this executable).
    ///
    /// The program must answer the `__worker` subcommand with
    /// [`serve_stdio`](crate::parallel::isolated::serve_stdio); its own
    /// evaluator decides the results, not the one given to [`new`](Self::new).
    pub fn with_worker_command(mut self, command: ProcessSpawner) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// True while a dispatch from this coordinator is still producing.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Resolve `requested` for `target_count` files and pick a strategy.
    pub fn plan(&self, target_count: usize, requested: Concurrency) -> Plan {
        let kind = self.isolated_kind();
        let concurrency = match requested {
            Concurrency::Off => 1,
            Concurrency::Fixed(n) => n.get(),
            Concurrency::Auto => {
                let host = host_parallelism(self.settings.max_threads, self.settings.thread_percentage);
                let threads = match self.settings.strategy {
                    Strategy::InProcess => true,
                    _ => kind == ContextKind::Thread,
                };
                estimate(target_count, host, threads)
            }
        };

        if concurrency <= 1 {
            Plan::Sequential
        } else if self.settings.strategy == Strategy::InProcess {
            Plan::InProcess {
                workers: concurrency,
            }
        } else {
            Plan::Isolated {
                contexts: concurrency,
                kind,
            }
        }
    }

    fn isolated_kind(&self) -> ContextKind {
        if let Some(spawner) = &self.spawner {
            return spawner.kind();
        }
        match self.settings.strategy {
            Strategy::Processes => ContextKind::Process,
            Strategy::Threads | Strategy::InProcess => ContextKind::Thread,
            Strategy::Auto if self.capabilities.isolated_threads => ContextKind::Thread,
            Strategy::Auto => ContextKind::Process,
        }
    }

    /// Evaluate every target and stream the results as they complete.
    pub fn dispatch(
        &self,
        targets: Vec<Target>,
        concurrency: Concurrency,
        hooks: StreamHooks<DiagnosticResult>,
    ) -> ResultStream<DiagnosticResult> {
        self.dispatch_with_cached(Vec::new(), targets, concurrency, hooks)
    }

    /// Like [`dispatch`](Self::dispatch), with `cached` results queued first.
    ///
    /// Cached results were not produced by this dispatch, so they do not
    /// fire `on_each_result`.
    pub fn dispatch_with_cached(
        &self,
        cached: Vec<DiagnosticResult>,
        targets: Vec<Target>,
        concurrency: Concurrency,
        hooks: StreamHooks<DiagnosticResult>,
    ) -> ResultStream<DiagnosticResult> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("reject overlapping dispatch");
            return ResultStream::failed(UsageError::DispatchInFlight.into(), hooks);
        }
        let guard = InFlight(Arc::clone(&self.in_flight));

        if targets.is_empty() {
            tracing::debug!(cached = cached.len(), "nothing to verify");
            drop(guard);
            return ResultStream::finished(cached, hooks);
        }

        let plan = self.plan(targets.len(), concurrency);
        tracing::debug!(
            files = targets.len(),
            cached = cached.len(),
            concurrency = plan.concurrency(),
            strategy = self.settings.strategy.as_str(),
            "verify {} files in {} contexts",
            targets.len(),
            plan.concurrency()
        );

        let policy = self.settings.on_evaluation_error;
        let job = EvaluationJob::new(Arc::clone(&self.evaluator), Arc::clone(&self.reader), policy);
        let cursor = Arc::new(Cursor::new(targets));
        let chunk_size = self.settings.chunk_size;
        let spawner = match plan {
            Plan::Isolated { kind, .. } => match self.spawner_for(kind, &job) {
                Ok(spawner) => Some(spawner),
                Err(error) => {
                    drop(guard);
                    return ResultStream::failed(error, hooks);
                }
            },
            _ => None,
        };

        ResultStream::spawn(cached, hooks, move |push| async move {
            let _guard = guard;
            match (plan, spawner) {
                (Plan::Isolated { contexts, .. }, Some(spawner)) => {
                    let options = WorkerOptions {
                        on_evaluation_error: policy,
                    };
                    IsolatedDispatcher::new(spawner, contexts, chunk_size, options)
                        .run(cursor, push)
                        .await
                }
                (plan, _) => {
                    InProcessDispatcher::new(plan.concurrency())
                        .run(job, cursor, push)
                        .await
                }
            }
        })
    }

    fn spawner_for(
        &self,
        kind: ContextKind,
        job: &EvaluationJob,
    ) -> Result<Arc<dyn ContextSpawner>, DispatchError> {
        if let Some(spawner) = &self.spawner {
            return Ok(Arc::clone(spawner));
        }
        Ok(match kind {
            ContextKind::Thread => Arc::new(ThreadSpawner::new(job.clone())),
            ContextKind::Process => match &self.worker_command {
                Some(command) => Arc::new(command.clone()),
                None => Arc::new(ProcessSpawner::current_exe()?),
            },
        })
    }
}

/// Clears the coordinator's in-flight flag when dropped.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
