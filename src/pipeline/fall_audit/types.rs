//! Core types for the fall audit pipeline.
//!
//! These types model the full lifecycle:
//! Record → Prompt → Raw output → Verdict → Report row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known key the model is asked to answer under.
pub const FALLS_KEY: &str = "falls";

// ═══════════════════════════════════════════
// Record
// ═══════════════════════════════════════════

/// One progress note, collapsed from its source row to a single string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    text: String,
}

impl Record {
    /// Join a row's fields with single spaces and trim the ends.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Self {
        let joined = fields
            .iter()
            .map(|f| f.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            text: joined.trim().to_string(),
        }
    }

    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

// ═══════════════════════════════════════════
// Verdict
// ═══════════════════════════════════════════

/// The per-record outcome. Exactly one shape per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Verdict {
    /// Parsed JSON answer from the model, normally `{"falls": ...}`.
    Structured(serde_json::Value),
    /// Model output could not be turned into a structured answer.
    Diagnostic(String),
    /// The inference process itself failed.
    InvocationError(String),
    /// Placeholder for an empty note; inference was never invoked.
    Empty,
}

impl Verdict {
    /// The `falls` value when this is a structured answer carrying one.
    pub fn falls(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(value) => value.get(FALLS_KEY),
            _ => None,
        }
    }

    /// Text written to the report's second column.
    ///
    /// A structured answer with a `falls` key contributes only that value;
    /// everything else is written whole.
    pub fn report_value(&self) -> String {
        match self {
            Self::Structured(value) => match value.get(FALLS_KEY) {
                Some(falls) => json_scalar_text(falls),
                None => value.to_string(),
            },
            Self::Diagnostic(text) | Self::InvocationError(text) => text.clone(),
            Self::Empty => String::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structured(_) => "structured",
            Self::Diagnostic(_) => "diagnostic",
            Self::InvocationError(_) => "invocation_error",
            Self::Empty => "empty",
        }
    }
}

/// Strings are written without their JSON quotes; anything else as compact JSON.
fn json_scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One row of the final report, index-aligned with the input records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub note: String,
    pub verdict: Verdict,
}

impl AuditResult {
    pub fn new(note: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            note: note.into(),
            verdict,
        }
    }
}

// ═══════════════════════════════════════════
// Run lifecycle
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    NotStarted,
    Running,
    Completed,
    Cancelled,
}

impl RunPhase {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Cancelled => 3,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::NotStarted,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// Read-only view of a run's progress, safe to take from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub rows_processed: usize,
    pub total_rows: usize,
    pub cancel_requested: bool,
    pub processing_done: bool,
    pub phase: RunPhase,
}

impl ProgressSnapshot {
    /// Status line in the form operators are used to seeing.
    pub fn status_line(&self) -> String {
        if self.processing_done {
            return "Done. The AI has reviewed the progress notes.".to_string();
        }
        if self.total_rows == 0 {
            return "Reading file...".to_string();
        }
        let mut line = format!("Processed {}/{} lines", self.rows_processed, self.total_rows);
        if self.cancel_requested {
            line.push_str(" (Cancel requested...)");
        }
        line
    }
}

/// Events pushed to an optional observer while a run progresses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AuditStatusEvent {
    Started {
        run_id: String,
        total: usize,
    },
    Progress {
        completed: usize,
        total: usize,
    },
    Completed {
        processed: usize,
        duration_ms: u64,
    },
    Cancelled {
        processed: usize,
        total: usize,
    },
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub phase: RunPhase,
    pub total_rows: usize,
    pub results: Vec<AuditResult>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn rows_processed(&self) -> usize {
        self.results.len()
    }

    /// Number of records the model answered with `falls` = true.
    pub fn falls_detected(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.verdict.falls().is_some_and(is_truthy))
            .count()
    }
}

/// Accepts `true` and boolean-like strings (`"true"`, `"True"`, `"yes"`).
pub fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_joins_fields_with_single_spaces() {
        let record = Record::from_fields(&["Resident found", "on floor", ""]);
        assert_eq!(record.text(), "Resident found on floor");
    }

    #[test]
    fn record_of_blank_fields_is_empty() {
        assert!(Record::from_fields(&["", "  ", ""]).is_empty());
        assert!(Record::from_fields::<&str>(&[]).is_empty());
    }

    #[test]
    fn report_value_extracts_falls_string() {
        let verdict = Verdict::Structured(json!({"falls": "true"}));
        assert_eq!(verdict.report_value(), "true");
    }

    #[test]
    fn report_value_extracts_falls_bool() {
        let verdict = Verdict::Structured(json!({"falls": false}));
        assert_eq!(verdict.report_value(), "false");
    }

    #[test]
    fn report_value_writes_whole_object_without_falls() {
        let verdict = Verdict::Structured(json!({"fall": true}));
        assert_eq!(verdict.report_value(), r#"{"fall":true}"#);
    }

    #[test]
    fn report_value_passes_diagnostics_through() {
        let verdict = Verdict::Diagnostic("No JSON found in response".into());
        assert_eq!(verdict.report_value(), "No JSON found in response");
        assert_eq!(Verdict::Empty.report_value(), "");
    }

    #[test]
    fn truthy_accepts_boolean_like_strings() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("True")));
        assert!(!is_truthy(&json!("false")));
        assert!(!is_truthy(&json!("true/false")));
        assert!(!is_truthy(&json!(1)));
    }

    #[test]
    fn run_phase_round_trips_through_u8() {
        for phase in [
            RunPhase::NotStarted,
            RunPhase::Running,
            RunPhase::Completed,
            RunPhase::Cancelled,
        ] {
            assert_eq!(RunPhase::from_u8(phase.as_u8()), phase);
        }
    }

    #[test]
    fn status_line_mentions_cancel_request() {
        let snapshot = ProgressSnapshot {
            rows_processed: 2,
            total_rows: 5,
            cancel_requested: true,
            processing_done: false,
            phase: RunPhase::Running,
        };
        assert_eq!(snapshot.status_line(), "Processed 2/5 lines (Cancel requested...)");
    }

    #[test]
    fn status_event_serializes_with_type_tag() {
        let event = AuditStatusEvent::Progress {
            completed: 3,
            total: 7,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Progress\""));
        assert!(json.contains("\"completed\":3"));
    }

    #[test]
    fn falls_detected_counts_truthy_answers() {
        let report = RunReport {
            run_id: "run".into(),
            phase: RunPhase::Completed,
            total_rows: 3,
            results: vec![
                AuditResult::new("a", Verdict::Structured(json!({"falls": "true"}))),
                AuditResult::new("b", Verdict::Structured(json!({"falls": false}))),
                AuditResult::new("c", Verdict::Diagnostic("No JSON found in response".into())),
            ],
            started_at: Utc::now(),
            duration_ms: 0,
        };
        assert_eq!(report.falls_detected(), 1);
        assert_eq!(report.rows_processed(), 3);
    }
}
