//! BatchRunner: drives one audit run over an ordered list of records.
//!
//! Records go through Prompt → Inference → Extraction strictly one at a
//! time, in input order. Progress lives in a shared `RunState` that an
//! observer on another thread can read at any moment; the only thing the
//! observer may change is the cancellation flag.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use super::cancel::CancellationToken;
use super::error::InferenceError;
use super::extractor::parse_model_output;
use super::prompt::build_prompt;
use super::traits::InferenceBackend;
use super::types::*;
use crate::pipeline::diagnostic;

pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

// ═══════════════════════════════════════════
// Shared run state
// ═══════════════════════════════════════════

/// Mutable state of one run.
///
/// Counters, flags and results are written by the worker only. The result
/// list and `rows_processed` are updated under the same lock, so the list
/// length always equals the counter.
#[derive(Debug)]
pub struct RunState {
    rows_processed: AtomicUsize,
    total_rows: AtomicUsize,
    processing_done: AtomicBool,
    phase: AtomicU8,
    cancel: CancellationToken,
    results: Mutex<Vec<AuditResult>>,
}

impl RunState {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            rows_processed: AtomicUsize::new(0),
            total_rows: AtomicUsize::new(0),
            processing_done: AtomicBool::new(false),
            phase: AtomicU8::new(RunPhase::NotStarted.as_u8()),
            cancel,
            results: Mutex::new(Vec::new()),
        }
    }

    /// Lock-free read of counters and flags.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            rows_processed: self.rows_processed.load(Ordering::SeqCst),
            total_rows: self.total_rows.load(Ordering::SeqCst),
            cancel_requested: self.cancel.is_cancelled(),
            processing_done: self.processing_done.load(Ordering::SeqCst),
            phase: RunPhase::from_u8(self.phase.load(Ordering::SeqCst)),
        }
    }

    /// Ask the worker to stop at the next record boundary.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Copy of the results collected so far, in input order.
    pub fn results(&self) -> Vec<AuditResult> {
        self.lock_results().clone()
    }

    fn lock_results(&self) -> MutexGuard<'_, Vec<AuditResult>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, total: usize) {
        self.total_rows.store(total, Ordering::SeqCst);
        self.phase.store(RunPhase::Running.as_u8(), Ordering::SeqCst);
    }

    fn push(&self, result: AuditResult) {
        let mut results = self.lock_results();
        results.push(result);
        self.rows_processed.store(results.len(), Ordering::SeqCst);
    }

    fn finish(&self, phase: RunPhase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
        self.processing_done.store(true, Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Base directory for per-record diagnostic artifacts.
    pub dump_dir: Option<PathBuf>,
}

pub type ProgressFn = Box<dyn Fn(AuditStatusEvent) + Send + Sync>;

/// Orchestrates a single audit run. Consumed by `run`.
pub struct BatchRunner {
    backend: Box<dyn InferenceBackend>,
    config: RunnerConfig,
    state: Arc<RunState>,
    progress_fn: Option<ProgressFn>,
}

impl BatchRunner {
    pub fn new(backend: Box<dyn InferenceBackend>, config: RunnerConfig) -> Self {
        Self::with_cancel_token(backend, config, CancellationToken::new())
    }

    /// Build a runner that observes an existing token, e.g. one already
    /// wired to a signal handler.
    pub fn with_cancel_token(
        backend: Box<dyn InferenceBackend>,
        config: RunnerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            config,
            state: Arc::new(RunState::new(cancel)),
            progress_fn: None,
        }
    }

    /// Push status events to `progress` as the run advances.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress_fn = Some(progress);
        self
    }

    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    /// Run every record to completion or until cancelled. Blocks.
    pub fn run(self, records: &[Record]) -> RunReport {
        let run_id = new_run_id();
        let started_at = Utc::now();
        let start = Instant::now();
        let total = records.len();
        let cancel = self.state.cancel_token();

        self.state.begin(total);
        self.emit(AuditStatusEvent::Started {
            run_id: run_id.clone(),
            total,
        });
        tracing::info!(run_id = %run_id, total, "Fall audit run started");

        let dump = self
            .config
            .dump_dir
            .as_deref()
            .and_then(|base| diagnostic::dump_dir_for(base, &run_id));

        let mut phase = RunPhase::Completed;
        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                phase = RunPhase::Cancelled;
                break;
            }

            let record_start = Instant::now();
            let Some(verdict) = self.audit_record(index, record, &cancel, dump.as_deref()) else {
                phase = RunPhase::Cancelled;
                break;
            };

            tracing::debug!(
                index,
                outcome = verdict.kind(),
                duration_ms = record_start.elapsed().as_millis() as u64,
                "Record audited"
            );

            self.state.push(AuditResult::new(record.text(), verdict));
            self.emit(AuditStatusEvent::Progress {
                completed: index + 1,
                total,
            });
        }

        self.state.finish(phase);
        let duration_ms = start.elapsed().as_millis() as u64;
        let processed = self.state.snapshot().rows_processed;

        match phase {
            RunPhase::Cancelled => {
                tracing::info!(run_id = %run_id, processed, total, "Fall audit run cancelled");
                self.emit(AuditStatusEvent::Cancelled { processed, total });
            }
            _ => {
                tracing::info!(run_id = %run_id, processed, duration_ms, "Fall audit run completed");
                self.emit(AuditStatusEvent::Completed {
                    processed,
                    duration_ms,
                });
            }
        }

        RunReport {
            run_id,
            phase,
            total_rows: total,
            results: self.state.results(),
            started_at,
            duration_ms,
        }
    }

    /// Audit one record. `None` means the invocation was killed by a cancel
    /// request and the record must not be counted.
    fn audit_record(
        &self,
        index: usize,
        record: &Record,
        cancel: &CancellationToken,
        dump: Option<&Path>,
    ) -> Option<Verdict> {
        if record.is_empty() {
            return Some(Verdict::Empty);
        }

        let prompt = build_prompt(record.text());
        if let Some(dir) = dump {
            diagnostic::dump_text(dir, &diagnostic::artifact_name(index, "prompt.txt"), &prompt);
        }

        let verdict = match self.backend.generate(&prompt, cancel) {
            Ok(output) => {
                if let Some(dir) = dump {
                    diagnostic::dump_text(
                        dir,
                        &diagnostic::artifact_name(index, "response.txt"),
                        &output,
                    );
                }
                parse_model_output(&output)
            }
            Err(InferenceError::Cancelled) => return None,
            Err(e) => {
                tracing::warn!(index, error = %e, "Inference failed, recording error for row");
                Verdict::InvocationError(e.diagnostic())
            }
        };

        if let Some(dir) = dump {
            diagnostic::dump_json(dir, &diagnostic::artifact_name(index, "verdict.json"), &verdict);
        }

        Some(verdict)
    }

    fn emit(&self, event: AuditStatusEvent) {
        if let Some(progress) = &self.progress_fn {
            progress(event);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Backend that replies with the same canned text and records prompts.
    pub(crate) struct MockLlm {
        response: Result<String, fn() -> InferenceError>,
        pub(crate) prompts: Arc<Mutex<Vec<String>>>,
    }

    impl MockLlm {
        pub(crate) fn answering(response: &str) -> Self {
            Self {
                response: Ok(response.to_string()),
                prompts: Arc::default(),
            }
        }

        pub(crate) fn failing(err: fn() -> InferenceError) -> Self {
            Self {
                response: Err(err),
                prompts: Arc::default(),
            }
        }
    }

    impl InferenceBackend for MockLlm {
        fn generate(&self, prompt: &str, _: &CancellationToken) -> Result<String, InferenceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    /// Backend that requests cancellation right after its Nth call returns.
    struct CancelAfter {
        calls: AtomicUsize,
        after: usize,
        token: CancellationToken,
    }

    impl InferenceBackend for CancelAfter {
        fn generate(&self, _: &str, _: &CancellationToken) -> Result<String, InferenceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.after {
                self.token.cancel();
            }
            Ok("```json{\"falls\": \"false\"}```".to_string())
        }
    }

    fn records(texts: &[&str]) -> Vec<Record> {
        texts.iter().map(|t| Record::new(*t)).collect()
    }

    #[test]
    fn completes_all_records_in_order() {
        let runner = BatchRunner::new(
            Box::new(MockLlm::answering("```json{\"falls\": \"true\"}```")),
            RunnerConfig::default(),
        );
        let state = runner.state();

        let report = runner.run(&records(&["note A", "note B", "note C"]));

        assert_eq!(report.phase, RunPhase::Completed);
        let notes: Vec<&str> = report.results.iter().map(|r| r.note.as_str()).collect();
        assert_eq!(notes, vec!["note A", "note B", "note C"]);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.rows_processed, 3);
        assert_eq!(snapshot.total_rows, 3);
        assert!(snapshot.processing_done);
        assert_eq!(snapshot.phase, RunPhase::Completed);
    }

    #[test]
    fn cancel_after_third_record_stops_run() {
        let token = CancellationToken::new();
        let backend = CancelAfter {
            calls: AtomicUsize::new(0),
            after: 3,
            token: token.clone(),
        };
        let runner =
            BatchRunner::with_cancel_token(Box::new(backend), RunnerConfig::default(), token);
        let state = runner.state();

        let report = runner.run(&records(&["1", "2", "3", "4", "5"]));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.rows_processed, 3);
        assert!(snapshot.processing_done);
        assert!(snapshot.cancel_requested);
        assert_eq!(snapshot.phase, RunPhase::Cancelled);
        assert_eq!(report.phase, RunPhase::Cancelled);
        assert_eq!(report.results.len(), 3);
        assert_eq!(state.results().len(), 3);
    }

    #[test]
    fn cancel_after_last_record_still_completes() {
        let token = CancellationToken::new();
        let backend = CancelAfter {
            calls: AtomicUsize::new(0),
            after: 2,
            token: token.clone(),
        };
        let runner =
            BatchRunner::with_cancel_token(Box::new(backend), RunnerConfig::default(), token);

        let report = runner.run(&records(&["1", "2"]));

        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.results.len(), 2);
    }

    #[test]
    fn cancel_before_start_processes_nothing() {
        let runner = BatchRunner::new(Box::new(MockLlm::answering("")), RunnerConfig::default());
        runner.state().request_cancel();
        let state = runner.state();

        let report = runner.run(&records(&["1", "2"]));

        assert_eq!(report.phase, RunPhase::Cancelled);
        assert!(report.results.is_empty());
        assert!(state.snapshot().processing_done);
    }

    #[test]
    fn empty_record_skips_inference() {
        let llm = MockLlm::answering("```json{\"falls\": \"true\"}```");
        let prompts = Arc::clone(&llm.prompts);
        let runner = BatchRunner::new(Box::new(llm), RunnerConfig::default());

        let report = runner.run(&records(&["first", "   ", "third", "fourth"]));

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.results[1], AuditResult::new("", Verdict::Empty));
        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts.iter().all(|p| !p.contains("Here is the note: \n")));
    }

    #[test]
    fn invocation_failure_is_recorded_and_run_continues() {
        let runner = BatchRunner::new(
            Box::new(MockLlm::failing(|| InferenceError::NonZeroExit {
                code: 1,
                signal: None,
                stderr: "gguf load failed".into(),
            })),
            RunnerConfig::default(),
        );

        let report = runner.run(&records(&["a", "b"]));

        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.results.len(), 2);
        assert_eq!(
            report.results[0].verdict,
            Verdict::InvocationError("Error: LLM execution failed. gguf load failed".into())
        );
    }

    #[test]
    fn hard_cancelled_invocation_is_not_counted() {
        let runner = BatchRunner::new(
            Box::new(MockLlm::failing(|| InferenceError::Cancelled)),
            RunnerConfig::default(),
        );
        let state = runner.state();

        let report = runner.run(&records(&["a", "b"]));

        assert_eq!(report.phase, RunPhase::Cancelled);
        assert!(report.results.is_empty());
        assert_eq!(state.snapshot().rows_processed, 0);
    }

    #[test]
    fn extraction_failure_becomes_diagnostic() {
        let runner = BatchRunner::new(
            Box::new(MockLlm::answering("I think there was a fall.")),
            RunnerConfig::default(),
        );

        let report = runner.run(&records(&["note"]));

        assert_eq!(
            report.results[0].verdict,
            Verdict::Diagnostic("No JSON found in response".into())
        );
    }

    #[test]
    fn progress_events_follow_run() {
        let events: Arc<Mutex<Vec<AuditStatusEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        let runner = BatchRunner::new(
            Box::new(MockLlm::answering("```json{\"falls\": true}```")),
            RunnerConfig::default(),
        )
        .with_progress(Box::new(move |e| sink.lock().unwrap().push(e)));

        runner.run(&records(&["a", "b"]));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], AuditStatusEvent::Started { total: 2, .. }));
        assert!(matches!(events[2], AuditStatusEvent::Progress { completed: 2, total: 2 }));
        assert!(matches!(events[3], AuditStatusEvent::Completed { processed: 2, .. }));
    }

    #[test]
    fn empty_input_completes_immediately() {
        let runner = BatchRunner::new(Box::new(MockLlm::answering("")), RunnerConfig::default());
        let state = runner.state();

        let report = runner.run(&[]);

        assert_eq!(report.phase, RunPhase::Completed);
        assert!(state.snapshot().processing_done);
    }

    #[test]
    fn dump_dir_receives_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = BatchRunner::new(
            Box::new(MockLlm::answering("```json{\"falls\": \"true\"}```")),
            RunnerConfig {
                dump_dir: Some(tmp.path().to_path_buf()),
            },
        );

        let report = runner.run(&records(&["Found on floor"]));

        let run_dir = tmp.path().join(&report.run_id);
        assert!(run_dir.join("0000-prompt.txt").exists());
        assert!(run_dir.join("0000-response.txt").exists());
        let verdict = std::fs::read_to_string(run_dir.join("0000-verdict.json")).unwrap();
        assert!(verdict.contains("structured"));
    }
}
