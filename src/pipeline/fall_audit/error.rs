//! Error types for the fall audit pipeline.
//!
//! Per-record problems never leave the runner as `Err`: an `InferenceError`
//! is folded into that record's `Verdict`. `AuditError` is reserved for
//! run-level I/O around the run (reading notes, writing the report) and
//! for a worker thread that died.

use thiserror::Error;

/// Prefix carried by every invocation-failure verdict string.
pub const INVOCATION_FAILURE_PREFIX: &str = "Error: LLM execution failed.";

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("prompt is {len} bytes, limit is {max} bytes")]
    PromptTooLong { len: usize, max: usize },

    #[error("failed to launch {executable}: {source}")]
    Launch {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", describe_exit(.code, .signal, .stderr))]
    NonZeroExit {
        code: i32,
        /// Terminating signal when the process was killed (unix only).
        signal: Option<i32>,
        stderr: String,
    },

    #[error("timed out after {after_secs}s: {stderr}")]
    Timeout { after_secs: u64, stderr: String },

    #[error("I/O error while supervising inference process: {0}")]
    Io(#[from] std::io::Error),

    #[error("Inference cancelled")]
    Cancelled,
}

impl InferenceError {
    /// The string recorded as this record's verdict.
    ///
    /// A non-zero exit carries the process's standard error verbatim, the
    /// same text an operator would see running the command by hand. With
    /// nothing on stderr the exit status or signal is reported instead.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::NonZeroExit { stderr, .. } if !stderr.is_empty() => {
                format!("{INVOCATION_FAILURE_PREFIX} {stderr}")
            }
            other => format!("{INVOCATION_FAILURE_PREFIX} {other}"),
        }
    }
}

fn describe_exit(code: &i32, signal: &Option<i32>, stderr: &str) -> String {
    let status = match signal {
        Some(sig) => format!("killed by signal {sig}"),
        None => format!("exited with status {code}"),
    };
    if stderr.is_empty() {
        status
    } else {
        format!("{status}: {stderr}")
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to persist report to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit worker panicked")]
    WorkerPanicked,
}
