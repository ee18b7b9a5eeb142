//! Result Sink: writes the two-column audit report.
//!
//! The header text (typo included) is what downstream spreadsheets expect.
//! The file is written to a sibling temp file and renamed into place.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use super::error::AuditError;
use super::types::AuditResult;

pub const REPORT_HEADER: [&str; 2] = ["Progres note", "Falls Detected?"];

/// Render the report into any writer.
pub fn render_report<W: Write>(writer: W, results: &[AuditResult]) -> Result<(), AuditError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(REPORT_HEADER)?;
    for result in results {
        csv.write_record([result.note.as_str(), result.verdict.report_value().as_str()])?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the report to `path`, replacing any existing file.
pub fn write_report(path: &Path, results: &[AuditResult]) -> Result<(), AuditError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    render_report(tmp.as_file_mut(), results)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AuditError::Persist {
        path: path.display().to_string(),
        source: e.error,
    })?;

    tracing::info!(path = %path.display(), rows = results.len(), "Audit report written");
    Ok(())
}
