pub mod fall_audit;
pub mod diagnostic; // Per-record dump of prompts and raw model output (FALL_AUDIT_DUMP_DIR)
