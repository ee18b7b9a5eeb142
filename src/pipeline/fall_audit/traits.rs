//! Seam between the batch runner and whatever performs inference.

use super::cancel::CancellationToken;
use super::error::InferenceError;

/// Runs the model once for a rendered prompt (allows mocking).
///
/// Implementations return the model's raw text, trimmed. `cancel` is the
/// run's token; backends that cannot interrupt themselves may ignore it.
pub trait InferenceBackend: Send + Sync {
    fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, InferenceError>;
}
