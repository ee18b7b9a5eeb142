//! Audit diagnostic dump: writes per-record artifacts to disk.
//!
//! Enables inspection of what the model actually saw and said for any row
//! of the report.
//!
//! **Activation**: disabled unless a dump directory is configured
//! (`FALL_AUDIT_DUMP_DIR`, resolved once at startup and passed to the runner).
//!
//! **Output structure**:
//! ```text
//! {dump_dir}/{run_id}/
//!   0000-prompt.txt
//!   0000-response.txt
//!   0000-verdict.json
//!   0001-prompt.txt
//!   ...
//! ```

use std::path::{Path, PathBuf};

/// Environment variable naming the base dump directory.
pub const DUMP_DIR_ENV: &str = "FALL_AUDIT_DUMP_DIR";

/// Read the dump directory from the environment, if set and non-empty.
pub fn dump_dir_from_env() -> Option<PathBuf> {
    std::env::var_os(DUMP_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Returns the dump directory for a run, creating it.
///
/// Returns `None` (with a warning) if directory creation fails; never
/// panics, never blocks the run.
pub fn dump_dir_for(base: &Path, run_id: &str) -> Option<PathBuf> {
    let dir = base.join(run_id);

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "Diagnostic dump: failed to create directory"
        );
        return None;
    }

    Some(dir)
}

/// File name for one record's artifact, e.g. `0007-prompt.txt`.
pub fn artifact_name(index: usize, artifact: &str) -> String {
    format!("{index:04}-{artifact}")
}

/// Write a JSON artifact (any serde-serializable value).
///
/// Uses pretty-printing for human readability. Never panics.
pub fn dump_json<T: serde::Serialize>(dir: &Path, filename: &str, value: &T) {
    let path = dir.join(filename);
    match serde_json::to_string_pretty(value) {
        Ok(json) => write_artifact(&path, json.as_bytes()),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Diagnostic dump: failed to serialize JSON"
        ),
    }
}

/// Write a text artifact (prompt, raw model output). Never panics.
pub fn dump_text(dir: &Path, filename: &str, text: &str) {
    write_artifact(&dir.join(filename), text.as_bytes());
}

fn write_artifact(path: &Path, data: &[u8]) {
    match std::fs::write(path, data) {
        Ok(()) => tracing::debug!(
            path = %path.display(),
            size = data.len(),
            "Diagnostic dump: artifact written"
        ),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Diagnostic dump: failed to write artifact"
        ),
    }
}
