//! Background audit worker: runs the batch off the caller's thread.
//!
//! The caller keeps an `AuditHandle`: it polls progress snapshots, may
//! request cancellation, and finally joins the worker for the `RunReport`.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::error::AuditError;
use super::runner::{BatchRunner, RunState};
use super::types::{ProgressSnapshot, Record, RunReport};

/// Poll interval an interactive observer should use.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const WORKER_THREAD_NAME: &str = "fall-audit-worker";

/// Handle for a running audit.
///
/// Dropping the handle without joining requests cancellation and waits for
/// the worker to reach the next record boundary.
pub struct AuditHandle {
    state: Arc<RunState>,
    handle: Option<JoinHandle<RunReport>>,
}

impl AuditHandle {
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    /// Takes effect at the next record boundary.
    pub fn request_cancel(&self) {
        self.state.request_cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Poll every `interval` until the run is done or the worker has exited,
    /// then join. A worker that panicked yields `AuditError::WorkerPanicked`.
    ///
    /// `on_tick` sees every snapshot, including the final one.
    pub fn wait(
        self,
        interval: Duration,
        mut on_tick: impl FnMut(&ProgressSnapshot),
    ) -> Result<RunReport, AuditError> {
        loop {
            let snapshot = self.snapshot();
            on_tick(&snapshot);
            if snapshot.processing_done || self.is_finished() {
                break;
            }
            std::thread::sleep(interval);
        }
        self.join()
    }

    pub fn join(mut self) -> Result<RunReport, AuditError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| AuditError::WorkerPanicked),
            None => Err(AuditError::WorkerPanicked),
        }
    }
}

impl Drop for AuditHandle {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            self.state.request_cancel();
            let _ = h.join();
        }
    }
}

/// Start `runner` over `records` on a dedicated worker thread.
pub fn start_audit(runner: BatchRunner, records: Vec<Record>) -> Result<AuditHandle, AuditError> {
    let state = runner.state();

    let handle = std::thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            tracing::debug!(records = records.len(), "Audit worker started");
            runner.run(&records)
        })?;

    Ok(AuditHandle {
        state,
        handle: Some(handle),
    })
}
