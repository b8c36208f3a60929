use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::importer::ImportReport;

const MAX_LOG_BYTES: u64 = 1_000_000;
const LOG_FILE: &str = "import-diagnostics.log";

#[derive(Debug, Serialize)]
pub struct LogEvent {
    pub ts: String,
    pub kind: String,
    pub message: String,
}

/// Strips things that identify people: home paths, phone numbers and
/// email addresses.
fn sanitize(input: &str) -> String {
    let mut out = input.to_string();
    for prefix in ["/home/", "/Users/", "/root/", "C:\\Users\\"] {
        if let Some(idx) = out.find(prefix) {
            out.replace_range(idx.., "[redacted]");
            break;
        }
    }
    out.split_whitespace()
        .map(|token| {
            let digits = token.chars().filter(|c| c.is_ascii_digit()).count();
            if digits >= 7 || (token.contains('@') && token.contains('.')) {
                "[redacted]".to_string()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn log_event(log_dir: &Path, kind: &str, message: &str) -> io::Result<()> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(LOG_FILE);
    trim_log(&path)?;
    let event = LogEvent {
        ts: Utc::now().to_rfc3339(),
        kind: kind.to_string(),
        message: sanitize(message),
    };
    let line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Counters only; never message content.
pub fn log_report(log_dir: &Path, report: &ImportReport) -> io::Result<()> {
    let s = &report.stats;
    log_event(
        log_dir,
        "import_success",
        &format!(
            "format={} outcome={:?} imported={} failed={} skipped={} duplicates={} payload_failures={}",
            report.format.as_str(),
            report.outcome,
            s.imported,
            s.failed,
            s.skipped_no_identity,
            s.duplicates,
            s.payload_failures
        ),
    )
}

fn trim_log(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if fs::metadata(path)?.len() <= MAX_LOG_BYTES {
        return Ok(());
    }
    let data = fs::read(path)?;
    let mut keep_from = data.len().saturating_sub((MAX_LOG_BYTES / 2) as usize);
    // restart on a line boundary
    if let Some(offset) = data[keep_from..].iter().position(|b| *b == b'\n') {
        keep_from += offset + 1;
    }
    fs::write(path, &data[keep_from..])?;
    Ok(())
}
