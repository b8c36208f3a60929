use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::ImportConfig;
use crate::db::SqliteStore;
use crate::dedup::MAX_BATCH;
use crate::error::CoreError;
use crate::models::{BackupRecord, ImportOutcome, MmsBackup, SmsBackup};
use crate::parser::{parse_backup, BackupFormat};
use crate::store::MessageStore;
use crate::threads::ImportContext;
use crate::writer::{MessagesWriter, MmsWrite, SmsWrite};

#[path = "importer/journal.rs"]
pub mod journal;

const PROGRESS_EVERY: u64 = 5000;

#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub source_path: String,
    pub source_filename: String,
    pub source_hash: String,
    pub size_bytes: u64,
}

pub fn plan_import(source_path: &Path) -> Result<ImportPlan, CoreError> {
    plan_import_with_progress(source_path, |_| {})
}

pub fn plan_import_with_progress<F>(source_path: &Path, progress: F) -> Result<ImportPlan, CoreError>
where
    F: Fn(&str),
{
    if !source_path.exists() {
        return Err(CoreError::InvalidArgument("backup file not found".to_string()));
    }
    let metadata = fs::metadata(source_path)
        .map_err(|e| CoreError::InvalidArgument(e.to_string()))?;
    if metadata.len() == 0 {
        return Err(CoreError::InvalidFormat("backup file is empty".to_string()));
    }
    progress(&format!("Preparing import of {}...", format_bytes(metadata.len())));
    let source_hash = hash_file_sha256_with_progress(source_path, &progress)?;
    let source_filename = source_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("backup")
        .to_string();
    Ok(ImportPlan {
        source_path: source_path.display().to_string(),
        source_filename,
        source_hash,
        size_bytes: metadata.len(),
    })
}

fn hash_file_sha256_with_progress<F>(path: &Path, progress: F) -> Result<String, CoreError>
where
    F: Fn(&str),
{
    let mut file = fs::File::open(path)
        .map_err(|e| CoreError::InvalidArgument(format!("backup open failed: {}", e)))?;
    let total = fs::metadata(path)
        .map_err(|e| CoreError::InvalidArgument(format!("backup stat failed: {}", e)))?
        .len()
        .max(1);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    let mut processed: u64 = 0;
    let mut last_percent: u64 = 0;
    loop {
        let n = std::io::Read::read(&mut file, &mut buf)
            .map_err(|e| CoreError::InvalidArgument(format!("backup read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        processed = processed.saturating_add(n as u64);
        let percent = (processed * 100) / total;
        if percent > last_percent {
            last_percent = percent;
            if percent <= 100 && percent % 10 == 0 {
                progress(&format!("Hashing backup... {}%", percent));
            }
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Declared MIME type for a backup file, judged by extension only.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("xml") => Some("application/xml"),
        Some("json") => Some("application/json"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Parsing,
    WritingSms,
    WritingMms,
    Finalizing,
    Done,
}

/// Per-run counters. `imported + failed + skipped_no_identity` equals the
/// number of records offered to the writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Records processed without error, duplicates included.
    pub imported: u64,
    pub failed: u64,
    pub skipped_no_identity: u64,
    pub duplicates: u64,
    pub rows_inserted: u64,
    pub parts_inserted: u64,
    pub addresses_inserted: u64,
    pub payload_failures: u64,
    /// Streaming records that could not be decoded; also counted in `failed`.
    pub decode_failures: u64,
    pub skipped_tags: u64,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub format: BackupFormat,
    pub outcome: ImportOutcome,
    pub stats: ImportStats,
    pub threads_repaired: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmsMode {
    /// One existence check and insert per message.
    Single,
    /// Chunks of `MAX_BATCH` with one query and one bulk insert each.
    Bulk,
}

pub fn import_backup<S, R>(
    store: &mut S,
    reader: R,
    content_type: Option<&str>,
    config: &ImportConfig,
) -> Result<ImportReport, CoreError>
where
    S: MessageStore + ?Sized,
    R: BufRead,
{
    import_backup_with_progress(store, reader, content_type, config, |_| {})
}

/// Parses the whole input, then writes it. Only a format error (or failing
/// to read the input) is returned as `Err`; every store failure is counted.
pub fn import_backup_with_progress<S, R, F>(
    store: &mut S,
    reader: R,
    content_type: Option<&str>,
    config: &ImportConfig,
    progress: F,
) -> Result<ImportReport, CoreError>
where
    S: MessageStore + ?Sized,
    R: BufRead,
    F: Fn(&str),
{
    enter_phase(ImportPhase::Parsing, &progress);
    let parsed = parse_backup(reader, content_type, config)?;
    let stats = ImportStats {
        decode_failures: parsed.decode_failures.len() as u64,
        failed: parsed.decode_failures.len() as u64,
        skipped_tags: parsed.skipped_tags as u64,
        ..ImportStats::default()
    };
    for failure in &parsed.decode_failures {
        warn!(index = failure.index, reason = %failure.reason, "skipping undecodable record");
    }
    let mode = match parsed.format {
        BackupFormat::Xml => SmsMode::Single,
        BackupFormat::Json => SmsMode::Bulk,
    };
    if parsed.format == BackupFormat::Json && parsed.records.is_empty() {
        progress("No entries for importing");
    }
    Ok(run(store, parsed.format, parsed.records, mode, config, stats, &progress))
}

/// Writes already decoded batch-format records.
pub fn restore_messages<S, F>(
    store: &mut S,
    records: Vec<BackupRecord>,
    config: &ImportConfig,
    progress: F,
) -> ImportReport
where
    S: MessageStore + ?Sized,
    F: Fn(&str),
{
    run(store, BackupFormat::Json, records, SmsMode::Bulk, config, ImportStats::default(), &progress)
}

fn run<S, F>(
    store: &mut S,
    format: BackupFormat,
    records: Vec<BackupRecord>,
    mode: SmsMode,
    config: &ImportConfig,
    mut stats: ImportStats,
    progress: &F,
) -> ImportReport
where
    S: MessageStore + ?Sized,
    F: Fn(&str),
{
    let mut sms: Vec<SmsBackup> = Vec::new();
    let mut mms: Vec<MmsBackup> = Vec::new();
    for record in records {
        match record {
            BackupRecord::Sms(record) => sms.push(record),
            BackupRecord::Mms(record) => mms.push(record),
        }
    }

    info!(format = format.as_str(), sms = sms.len(), mms = mms.len(), "importing backup");

    let mut ctx = ImportContext::new();
    let mut writer = MessagesWriter::new(store, &mut ctx);

    if config.import_sms && !sms.is_empty() {
        enter_phase(ImportPhase::WritingSms, progress);
        match mode {
            SmsMode::Single => write_sms_single(&mut writer, &sms, &mut stats, progress),
            SmsMode::Bulk => write_sms_bulk(&mut writer, &sms, &mut stats, progress),
        }
    }

    if config.import_mms && !mms.is_empty() {
        enter_phase(ImportPhase::WritingMms, progress);
        write_mms_all(&mut writer, &mms, &mut stats, progress);
    }

    enter_phase(ImportPhase::Finalizing, progress);
    let outcome = ImportOutcome::from_counts(stats.imported, stats.failed);
    let threads_repaired = writer.fix_conversation_dates();
    info!(
        ?outcome,
        imported = stats.imported,
        failed = stats.failed,
        skipped = stats.skipped_no_identity,
        duplicates = stats.duplicates,
        threads_repaired,
        "finished import"
    );
    enter_phase(ImportPhase::Done, progress);
    ImportReport {
        format,
        outcome,
        stats,
        threads_repaired,
    }
}

fn enter_phase<F: Fn(&str)>(phase: ImportPhase, progress: &F) {
    let msg = match phase {
        ImportPhase::Parsing => "Reading backup...",
        ImportPhase::WritingSms => "Importing SMS messages...",
        ImportPhase::WritingMms => "Importing MMS messages...",
        ImportPhase::Finalizing => "Updating conversations...",
        ImportPhase::Done => "Import finished",
    };
    info!(?phase, "import phase");
    progress(msg);
}

fn write_sms_single<S, F>(
    writer: &mut MessagesWriter<'_, S>,
    messages: &[SmsBackup],
    stats: &mut ImportStats,
    progress: &F,
) where
    S: MessageStore + ?Sized,
    F: Fn(&str),
{
    let total = messages.len() as u64;
    for (idx, sms) in messages.iter().enumerate() {
        match writer.write_sms(sms) {
            Ok(SmsWrite::Inserted) => {
                stats.imported += 1;
                stats.rows_inserted += 1;
            }
            Ok(SmsWrite::Duplicate) => {
                stats.imported += 1;
                stats.duplicates += 1;
            }
            Err(err) => {
                warn!(error = %err, "sms import failed");
                stats.failed += 1;
            }
        }
        let done = idx as u64 + 1;
        if done % PROGRESS_EVERY == 0 {
            progress(&format!("Importing SMS messages... {}/{}", done, total));
        }
    }
}

fn write_sms_bulk<S, F>(
    writer: &mut MessagesWriter<'_, S>,
    messages: &[SmsBackup],
    stats: &mut ImportStats,
    progress: &F,
) where
    S: MessageStore + ?Sized,
    F: Fn(&str),
{
    let total = messages.len();
    let mut done = 0usize;
    for chunk in messages.chunks(MAX_BATCH) {
        match writer.bulk_write_sms(chunk) {
            Ok(write) => {
                stats.imported += chunk.len() as u64;
                stats.rows_inserted += write.inserted as u64;
                stats.duplicates += write.duplicates as u64;
            }
            Err(err) => {
                warn!(error = %err, messages = chunk.len(), "sms batch failed");
                stats.failed += chunk.len() as u64;
            }
        }
        done += chunk.len();
        progress(&format!("Importing SMS messages... {}/{}", done, total));
    }
}

fn write_mms_all<S, F>(
    writer: &mut MessagesWriter<'_, S>,
    messages: &[MmsBackup],
    stats: &mut ImportStats,
    progress: &F,
) where
    S: MessageStore + ?Sized,
    F: Fn(&str),
{
    let total = messages.len() as u64;
    for (idx, mms) in messages.iter().enumerate() {
        match writer.write_mms(mms) {
            Ok(MmsWrite::Written(report)) => {
                stats.imported += 1;
                if report.message_inserted {
                    stats.rows_inserted += 1;
                } else {
                    stats.duplicates += 1;
                }
                stats.parts_inserted += report.parts_inserted() as u64;
                stats.addresses_inserted += report.addresses_inserted as u64;
                stats.payload_failures += report.payload_failures() as u64;
            }
            Ok(MmsWrite::MissingMessageId { thread_id }) => {
                warn!(thread_id, date = mms.date, "mms row not found after insert; parts and addresses skipped");
                stats.imported += 1;
            }
            Ok(MmsWrite::NoThreadAddress) => {
                stats.skipped_no_identity += 1;
            }
            Err(err) => {
                warn!(error = %err, date = mms.date, "mms import failed");
                stats.failed += 1;
            }
        }
        let done = idx as u64 + 1;
        if done % PROGRESS_EVERY == 0 {
            progress(&format!("Importing MMS messages... {}/{}", done, total));
        }
    }
}

/// Imports a planned backup file into a SQLite store and records the run in
/// the import journal.
pub fn import_backup_file<F>(
    store: &mut SqliteStore,
    plan: &ImportPlan,
    config: &ImportConfig,
    progress: F,
) -> Result<ImportReport, CoreError>
where
    F: Fn(&str),
{
    if let Some(previous) = journal::previous_success(&store.conn, &plan.source_hash)? {
        info!(previous = %previous, "backup was imported before; only missing records will be written");
    }
    let import_id = journal::begin(&store.conn, plan)?;
    let result = fs::File::open(&plan.source_path)
        .map_err(CoreError::from)
        .and_then(|file| {
            let content_type = content_type_for_path(Path::new(&plan.source_path));
            import_backup_with_progress(store, BufReader::new(file), content_type, config, &progress)
        });
    match result {
        Ok(report) => {
            // rows are already written; a journal failure must not hide the report
            if let Err(err) = journal::finish(&store.conn, &import_id, &report) {
                warn!(import_id = %import_id, error = %err, "could not record import result");
            }
            Ok(report)
        }
        Err(err) => {
            let _ = journal::fail(&store.conn, &import_id, &err.to_string());
            Err(err)
        }
    }
}
