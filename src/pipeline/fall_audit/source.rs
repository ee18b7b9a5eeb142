//! Reads progress notes from a comma-delimited export.
//!
//! Every row is a note unless the caller asks to skip a header row. Rows
//! may have different field counts; fields are joined with single spaces.

use std::io::Read;
use std::path::Path;

use super::error::AuditError;
use super::types::Record;

#[derive(Debug, Clone, Copy, Default)]
pub struct SourceOptions {
    pub skip_header: bool,
}

pub fn read_records(path: &Path, options: SourceOptions) -> Result<Vec<Record>, AuditError> {
    let file = std::fs::File::open(path)?;
    let records = parse_records(file, options)?;
    tracing::info!(path = %path.display(), rows = records.len(), "Progress notes loaded");
    Ok(records)
}

pub fn parse_records<R: Read>(reader: R, options: SourceOptions) -> Result<Vec<Record>, AuditError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(options.skip_header)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in csv.records() {
        let row = row?;
        let fields: Vec<&str> = row.iter().collect();
        records.push(Record::from_fields(&fields));
    }
    Ok(records)
}
