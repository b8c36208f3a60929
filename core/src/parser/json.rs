use std::io::BufRead;

use crate::error::CoreError;
use crate::models::BackupRecord;

use super::{BackupFormat, ParsedBackup};

/// Decodes the whole document or nothing; there is no per-record recovery.
pub(super) fn parse_json<R: BufRead>(input: R) -> Result<ParsedBackup, CoreError> {
    let records: Vec<BackupRecord> = serde_json::from_reader(input).map_err(|e| {
        if e.is_io() {
            CoreError::Io(e.into())
        } else {
            CoreError::InvalidFormat(e.to_string())
        }
    })?;
    let mut parsed = ParsedBackup::new(BackupFormat::Json);
    parsed.records = records;
    Ok(parsed)
}
