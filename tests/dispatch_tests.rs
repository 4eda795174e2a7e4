//! End-to-end behavior of the dispatch engine across strategies

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use batchlint::config::{Concurrency, DispatchSettings, Strategy};
use batchlint::lint::{
    Diagnostic, DiagnosticResult, ErrorPolicy, LintConfig, Severity, Target, TextRules,
};
use batchlint::parallel::isolated::{FromWorker, ToWorker};
use batchlint::parallel::{
    ContextEvent, ContextId, ContextKind, ContextSpawner, Coordinator, EventSink, ExecutionContext,
    ProcessSpawner, StreamHooks,
};
use batchlint::{DispatchError, UsageError};
use parking_lot::Mutex;
use tempfile::TempDir;

fn fixed(n: usize) -> Concurrency {
    Concurrency::Fixed(NonZeroUsize::new(n).unwrap())
}

fn write_targets(dir: &TempDir, files: &[(&str, &str)], config: serde_json::Value) -> Vec<Target> {
    let config = Arc::new(LintConfig::new(config));
    files
        .iter()
        .map(|(name, contents)| {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            Target::new(path, Arc::clone(&config))
        })
        .collect()
}

fn numbered(dir: &TempDir, count: usize) -> Vec<Target> {
    let names: Vec<String> = (0..count).map(|i| format!("f{i:03}.js")).collect();
    let files: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "ok\n")).collect();
    write_targets(dir, &files, serde_json::json!({}))
}

/// Fails for `bad.js`, panics for `panic.js`, two errors for `b.js`.
fn scripted_evaluator(_: &LintConfig, path: &Path, _: &str) -> anyhow::Result<DiagnosticResult> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some("bad.js") => anyhow::bail!("rule crashed"),
        Some("panic.js") => panic!("evaluator exploded"),
        Some("b.js") => Ok(DiagnosticResult::new(
            path,
            vec![
                Diagnostic::new("x", Severity::Error, "one", 1, 1),
                Diagnostic::new("x", Severity::Error, "two", 2, 1),
            ],
        )),
        _ => Ok(DiagnosticResult::clean(path)),
    }
}

fn coordinator(strategy: Strategy) -> Coordinator {
    Coordinator::new(Arc::new(scripted_evaluator)).with_settings(DispatchSettings {
        strategy,
        max_threads: 4,
        ..Default::default()
    })
}

fn worker_binary() -> ProcessSpawner {
    ProcessSpawner::new(env!("CARGO_BIN_EXE_batchlint"), ["__worker"])
}

fn counting_hooks(results: &Arc<AtomicUsize>, ends: &Arc<AtomicUsize>) -> StreamHooks<DiagnosticResult> {
    let results = Arc::clone(results);
    let ends = Arc::clone(ends);
    StreamHooks::new()
        .on_each_result(move |_| {
            results.fetch_add(1, Ordering::SeqCst);
        })
        .on_end(move || {
            ends.fetch_add(1, Ordering::SeqCst);
        })
}

fn paths(results: &[DiagnosticResult]) -> BTreeSet<PathBuf> {
    results.iter().map(|r| r.file_path.clone()).collect()
}

#[tokio::test]
async fn test_one_result_per_target_for_every_concurrency() {
    let dir = TempDir::new().unwrap();
    for count in [1, 5, 13] {
        let targets = numbered(&dir, count);
        let expected: BTreeSet<PathBuf> = targets.iter().map(|t| t.path.clone()).collect();

        for strategy in [Strategy::InProcess, Strategy::Threads] {
            for c in 1..=count + 2 {
                let coordinator = coordinator(strategy);
                let results = coordinator
                    .dispatch(targets.clone(), fixed(c), StreamHooks::new())
                    .collect_all()
                    .await
                    .unwrap();
                assert_eq!(results.len(), count, "{strategy:?} c={c}");
                assert_eq!(paths(&results), expected, "{strategy:?} c={c}");
            }
        }
    }
}

#[tokio::test]
async fn test_error_counts_independent_of_strategy() {
    let dir = TempDir::new().unwrap();
    let targets = write_targets(
        &dir,
        &[("a.js", "ok\n"), ("b.js", "x \ny \n"), ("c.js", "ok\n")],
        serde_json::json!({ "no_trailing_spaces": true }),
    );

    for strategy in [Strategy::Auto, Strategy::InProcess, Strategy::Threads, Strategy::Processes] {
        for concurrency in [Concurrency::Auto, fixed(2), fixed(3)] {
            let coordinator = Coordinator::new(Arc::new(TextRules::new()))
                .with_settings(DispatchSettings {
                    strategy,
                    max_threads: 4,
                    chunk_size: 1,
                    ..Default::default()
                })
                .with_worker_command(worker_binary());
            let results = coordinator
                .dispatch(targets.clone(), concurrency, StreamHooks::new())
                .collect_all()
                .await
                .unwrap();
            assert_eq!(results.len(), 3, "{strategy:?} {concurrency}");
            let errors: usize = results.iter().map(|r| r.error_count).sum();
            assert_eq!(errors, 2, "{strategy:?} {concurrency}");
        }
    }
}

#[tokio::test]
async fn test_evaluation_error_rejects_and_ends_once() {
    let dir = TempDir::new().unwrap();
    let targets = write_targets(
        &dir,
        &[("a.js", ""), ("bad.js", ""), ("c.js", ""), ("d.js", "")],
        serde_json::json!({}),
    );

    for strategy in [Strategy::InProcess, Strategy::Threads] {
        for concurrency in [Concurrency::Off, fixed(2)] {
            let results = Arc::new(AtomicUsize::new(0));
            let ends = Arc::new(AtomicUsize::new(0));
            let coordinator = coordinator(strategy);
            let stream = coordinator.dispatch(targets.clone(), concurrency, counting_hooks(&results, &ends));

            let err = stream.collect_all().await.unwrap_err();
            assert!(err.is_evaluation_error(), "{strategy:?}: {err}");
            assert_eq!(err.path().and_then(Path::file_name).unwrap(), "bad.js");
            assert!(err.to_string().contains("rule crashed"));
            // sticky
            assert_eq!(stream.pull().await.unwrap_err(), err);
            assert_eq!(ends.load(Ordering::SeqCst), 1);
        }
    }
}

#[tokio::test]
async fn test_report_policy_degrades_failures() {
    let dir = TempDir::new().unwrap();
    let targets = write_targets(&dir, &[("a.js", ""), ("bad.js", ""), ("c.js", "")], serde_json::json!({}));

    for strategy in [Strategy::InProcess, Strategy::Threads] {
        let coordinator = Coordinator::new(Arc::new(scripted_evaluator)).with_settings(DispatchSettings {
            strategy,
            on_evaluation_error: ErrorPolicy::Report,
            ..Default::default()
        });
        let mut results = coordinator
            .dispatch(targets.clone(), fixed(2), StreamHooks::new())
            .collect_all()
            .await
            .unwrap();
        results.sort_by(DiagnosticResult::compare_by_file_path);
        assert_eq!(results.len(), 3);
        let bad = &results[1];
        assert!(bad.file_path.ends_with("bad.js"));
        assert_eq!((bad.error_count, bad.fatal_error_count), (1, 1));
        assert_eq!(DiagnosticResult::errors_only(&results).len(), 1);
    }
}

#[tokio::test]
async fn test_thread_panic_fails_dispatch() {
    let dir = TempDir::new().unwrap();
    let targets = write_targets(
        &dir,
        &[("a.js", ""), ("panic.js", ""), ("c.js", ""), ("d.js", "")],
        serde_json::json!({}),
    );

    let err = coordinator(Strategy::Threads)
        .dispatch(targets, fixed(2), StreamHooks::new())
        .collect_all()
        .await
        .unwrap_err();
    assert!(err.is_context_error(), "{err}");
    assert!(err.to_string().contains("evaluator exploded"));
}

#[tokio::test]
async fn test_in_process_panic_is_caught() {
    let dir = TempDir::new().unwrap();
    let targets = write_targets(&dir, &[("a.js", ""), ("panic.js", "")], serde_json::json!({}));

    let err = coordinator(Strategy::InProcess)
        .dispatch(targets, fixed(2), StreamHooks::new())
        .collect_all()
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Panicked(ref message) if message.contains("evaluator exploded")));
}

#[tokio::test]
async fn test_cancel_mid_iteration() {
    let dir = TempDir::new().unwrap();
    let targets = numbered(&dir, 60);

    for strategy in [Strategy::InProcess, Strategy::Threads] {
        let results = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(strategy);
        let stream = coordinator.dispatch(targets.clone(), fixed(3), counting_hooks(&results, &ends));

        for _ in 0..3 {
            assert!(stream.pull().await.unwrap().is_some());
        }
        stream.cancel();
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert_eq!(stream.pull().await.unwrap(), None);
        assert_eq!(stream.pull().await.unwrap(), None);

        // production stops; the coordinator becomes free again
        while coordinator.is_busy() {
            tokio::task::yield_now().await;
        }
        assert!(results.load(Ordering::SeqCst) >= 3, "{strategy:?}");
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert_eq!(stream.pull().await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_empty_targets_finish_immediately() {
    let results = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(AtomicUsize::new(0));
    let coordinator = coordinator(Strategy::Auto);
    let stream = coordinator.dispatch(Vec::new(), Concurrency::Auto, counting_hooks(&results, &ends));

    assert!(stream.is_ended());
    assert_eq!(ends.load(Ordering::SeqCst), 1);
    assert_eq!(stream.pull().await.unwrap(), None);
    assert_eq!(results.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pull_after_collect_and_mixed_modes() {
    let dir = TempDir::new().unwrap();
    let targets = numbered(&dir, 4);
    let coordinator = coordinator(Strategy::InProcess);

    let stream = coordinator.dispatch(targets.clone(), fixed(2), StreamHooks::new());
    assert_eq!(stream.collect_all().await.unwrap().len(), 4);
    assert_eq!(stream.pull().await.unwrap(), None);
    assert_eq!(
        stream.collect_all().await.unwrap_err(),
        DispatchError::Usage(UsageError::CollectTwice)
    );

    let stream = coordinator.dispatch(targets, fixed(2), StreamHooks::new());
    assert!(stream.pull().await.unwrap().is_some());
    assert_eq!(
        stream.collect_all().await.unwrap_err(),
        DispatchError::Usage(UsageError::CollectAfterPull)
    );
}

#[tokio::test]
async fn test_cached_results_come_first_without_hook() {
    let dir = TempDir::new().unwrap();
    let targets = numbered(&dir, 3);
    let results = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(AtomicUsize::new(0));
    let coordinator = coordinator(Strategy::InProcess);

    let stream = coordinator.dispatch_with_cached(
        vec![DiagnosticResult::clean("cached.js")],
        targets,
        fixed(2),
        counting_hooks(&results, &ends),
    );
    let first = stream.pull().await.unwrap().unwrap();
    assert_eq!(first.file_path, Path::new("cached.js"));
    let mut rest = 0;
    while stream.pull().await.unwrap().is_some() {
        rest += 1;
    }
    assert_eq!(rest, 3);
    assert_eq!(results.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn test_overlapping_dispatch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let targets = numbered(&dir, 8);
    let coordinator = coordinator(Strategy::InProcess);

    let ends = Arc::new(AtomicUsize::new(0));
    let first = coordinator.dispatch(targets.clone(), fixed(2), StreamHooks::new());
    let second = coordinator.dispatch(
        targets.clone(),
        fixed(2),
        counting_hooks(&Arc::new(AtomicUsize::new(0)), &ends),
    );
    assert_eq!(
        second.collect_all().await.unwrap_err(),
        DispatchError::Usage(UsageError::DispatchInFlight)
    );
    assert_eq!(ends.load(Ordering::SeqCst), 1);

    assert_eq!(first.collect_all().await.unwrap().len(), 8);
    while coordinator.is_busy() {
        tokio::task::yield_now().await;
    }
    let third = coordinator.dispatch(targets, fixed(2), StreamHooks::new());
    assert_eq!(third.collect_all().await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_process_contexts_through_worker_binary() {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..9).map(|i| format!("p{i}.js")).collect();
    let mut files: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "fine\n")).collect();
    files.push(("tabs.js", "\tindented\n"));
    let targets = write_targets(&dir, &files, serde_json::json!({ "no_tabs": true }));

    let coordinator = Coordinator::new(Arc::new(TextRules::new()))
        .with_settings(DispatchSettings {
            strategy: Strategy::Processes,
            chunk_size: 2,
            ..Default::default()
        })
        .with_worker_command(worker_binary());
    let results = coordinator
        .dispatch(targets.clone(), fixed(3), StreamHooks::new())
        .collect_all()
        .await
        .unwrap();

    assert_eq!(results.len(), 10);
    let expected: BTreeSet<PathBuf> = targets.iter().map(|t| t.path.clone()).collect();
    assert_eq!(paths(&results), expected);
    let errors = DiagnosticResult::errors_only(&results);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].messages[0].rule_id.as_deref(), Some("no-tabs"));
}

#[tokio::test]
async fn test_process_contexts_use_the_worker_program_evaluator() {
    let dir = TempDir::new().unwrap();
    let targets = write_targets(&dir, &[("a.js", "ok\n"), ("b.js", "ok\n")], serde_json::json!({}));

    let in_process = coordinator(Strategy::InProcess)
        .dispatch(targets.clone(), fixed(2), StreamHooks::new())
        .collect_all()
        .await
        .unwrap();
    let total: usize = in_process.iter().map(|r| r.error_count).sum();
    assert_eq!(total, 2);

    // the batchlint worker runs TextRules, not the scripted evaluator
    let processes = coordinator(Strategy::Processes)
        .with_worker_command(worker_binary())
        .dispatch(targets, fixed(2), StreamHooks::new())
        .collect_all()
        .await
        .unwrap();
    assert_eq!(processes.len(), 2);
    assert!(processes.iter().all(|r| r.error_count == 0));
}

#[tokio::test]
async fn test_missing_worker_program_fails_dispatch() {
    let dir = TempDir::new().unwrap();
    let targets = numbered(&dir, 4);
    let ends = Arc::new(AtomicUsize::new(0));
    let coordinator = coordinator(Strategy::Processes)
        .with_worker_command(ProcessSpawner::new("/nonexistent/batchlint", ["__worker"]));

    let err = coordinator
        .dispatch(targets, fixed(2), counting_hooks(&Arc::new(AtomicUsize::new(0)), &ends))
        .collect_all()
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Spawn { .. }), "{err}");
    assert_eq!(ends.load(Ordering::SeqCst), 1);
}

/// Context 0 reports a result for each initial file except the last, then
/// dies. Every other context waits silently until it is terminated.
#[derive(Default)]
struct CrashingContexts {
    terminated: Mutex<Vec<ContextId>>,
}

struct Scripted {
    id: ContextId,
    events: EventSink,
    journal: Arc<CrashingContexts>,
}

impl ExecutionContext for Scripted {
    fn id(&self) -> ContextId {
        self.id
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Process
    }

    fn send(&mut self, message: ToWorker) -> Result<(), DispatchError> {
        if let (ContextId(0), ToWorker::Initial { files, .. }) = (self.id, message) {
            for (sender_id, target) in files.iter().enumerate().take(files.len() - 1) {
                self.events.emit(ContextEvent::Message(FromWorker::Result {
                    sender_id,
                    payload: DiagnosticResult::clean(&target.path),
                }));
            }
            self.events.emit(ContextEvent::Exit(Some(139)));
        }
        Ok(())
    }

    fn terminate(&mut self) {
        self.journal.terminated.lock().push(self.id);
        self.events.emit(ContextEvent::Exit(None));
    }
}

struct CrashingSpawner(Arc<CrashingContexts>);

impl ContextSpawner for CrashingSpawner {
    fn kind(&self) -> ContextKind {
        ContextKind::Process
    }

    fn spawn(&self, events: EventSink) -> Result<Box<dyn ExecutionContext>, DispatchError> {
        Ok(Box::new(Scripted {
            id: events.id(),
            events,
            journal: Arc::clone(&self.0),
        }))
    }
}

#[tokio::test]
async fn test_context_crash_terminates_siblings() {
    let dir = TempDir::new().unwrap();
    let targets = write_targets(
        &dir,
        &[("a.js", ""), ("b.js", ""), ("c.js", ""), ("d.js", ""), ("e.js", ""), ("f.js", "")],
        serde_json::json!({}),
    );
    let journal = Arc::new(CrashingContexts::default());
    let results = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(AtomicUsize::new(0));

    let coordinator = Coordinator::new(Arc::new(scripted_evaluator))
        .with_settings(DispatchSettings {
            chunk_size: 3,
            ..Default::default()
        })
        .with_spawner(Arc::new(CrashingSpawner(Arc::clone(&journal))));
    let err = coordinator
        .dispatch(targets, fixed(2), counting_hooks(&results, &ends))
        .collect_all()
        .await
        .unwrap_err();

    assert_eq!(
        err,
        DispatchError::ContextExit {
            context: ContextId(0),
            code: 139
        }
    );
    assert_eq!(err.to_string(), "execution context #0 stopped with exit code 139");
    // a.js and b.js were produced before the crash
    assert_eq!(results.load(Ordering::SeqCst), 2);
    assert_eq!(ends.load(Ordering::SeqCst), 1);
    assert_eq!(*journal.terminated.lock(), vec![ContextId(1)]);
}
