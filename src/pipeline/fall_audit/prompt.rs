//! Prompt rendering for the falls audit.
//!
//! ChatML layout: a system turn with the auditing persona, a user turn
//! holding the note and the reply contract, then an open assistant turn
//! where generation starts. The note is embedded verbatim.

pub const ROLE_START: &str = "<|im_start|>";
pub const ROLE_END: &str = "<|im_end|>";

pub const SYSTEM_INSTRUCTION: &str = "\
You are a helpful auditing assistant with extensive aged care nursing \
experience and care about elderly people";

const TASK_INSTRUCTION: &str = "\
Please check this progress note for evidence of falls.
Your response will be in JSON format with 'true' where there is evidence \
and 'false' where there is not evidence.";

/// Example of the expected reply, shown to the model inside the user turn.
pub const REPLY_FORMAT_EXAMPLE: &str = "```json{\"falls\": \"true/false\"}```";

/// Render the prompt for one note.
///
/// Notes containing ChatML markers are not escaped and may corrupt the
/// prompt structure; a warning is logged so the row can be reviewed.
pub fn build_prompt(note: &str) -> String {
    if contains_role_markers(note) {
        tracing::warn!(
            note_len = note.len(),
            "Progress note contains ChatML role markers; prompt structure may be corrupted"
        );
    }

    format!(
        "{ROLE_START}system\n{SYSTEM_INSTRUCTION}{ROLE_END}\n\n\
         {ROLE_START}user\n{TASK_INSTRUCTION}\n\
         Here is the note: {note}\n\
         Example reply format: {REPLY_FORMAT_EXAMPLE}{ROLE_END}\n\n\
         {ROLE_START}assistant\n"
    )
}

pub fn contains_role_markers(text: &str) -> bool {
    text.contains(ROLE_START) || text.contains(ROLE_END)
}
