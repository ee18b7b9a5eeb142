//! Fall Audit Pipeline
//!
//! Reads aged-care progress notes and asks a locally-run model, one note at
//! a time, whether the note shows evidence of a fall.
//!
//! ## Architecture
//!
//! ```text
//! Source → BatchRunner { Prompt → Invoker → Extractor } → Sink
//!              ↑ RunState (progress, cancel) ↓
//!           observer thread (AuditHandle polling)
//! ```
//!
//! ## Design Principles
//! - Per-record failures become verdicts; a run never aborts on one bad note
//! - Results keep input order, including after cancellation
//! - Cancellation is cooperative at record boundaries unless the invoker is
//!   configured to hard-cancel its child process

pub mod error;
pub mod types;
pub mod traits;
pub mod cancel;
pub mod prompt;
pub mod invoker;
pub mod extractor;
pub mod runner;
pub mod background;
pub mod sink;
pub mod source;

pub use error::{AuditError, InferenceError};
pub use types::*;
pub use traits::InferenceBackend;
pub use cancel::CancellationToken;
pub use prompt::build_prompt;
pub use invoker::{InvokerConfig, LlamafileInvoker};
pub use extractor::parse_model_output;
pub use runner::{BatchRunner, RunState, RunnerConfig};
pub use background::{start_audit, AuditHandle, DEFAULT_POLL_INTERVAL};
pub use sink::write_report;
pub use source::{read_records, SourceOptions};
