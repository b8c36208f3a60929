use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::ImportOutcome;

use super::{ImportPlan, ImportReport};

#[derive(Debug, Clone, Serialize)]
pub struct ImportRecord {
    pub id: String,
    pub imported_at: i64,
    pub source_filename: String,
    pub source_hash: String,
    pub status: String,
    pub stats_json: Option<String>,
}

/// Records a run as `running`. A store reopened while a run is still
/// `running` marks it failed.
pub fn begin(conn: &Connection, plan: &ImportPlan) -> Result<String, CoreError> {
    let import_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO imports (id, imported_at, source_filename, source_hash, status, stats_json)
         VALUES (?1, ?2, ?3, ?4, 'running', NULL);",
        params![
            import_id,
            Utc::now().timestamp_millis(),
            plan.source_filename,
            plan.source_hash
        ],
    )?;
    Ok(import_id)
}

pub fn finish(conn: &Connection, import_id: &str, report: &ImportReport) -> Result<(), CoreError> {
    let status = match report.outcome {
        ImportOutcome::Fail => "failed",
        ImportOutcome::Partial => "partial",
        ImportOutcome::Ok | ImportOutcome::NothingNew => "success",
    };
    let stats_json = serde_json::json!({
        "format": report.format.as_str(),
        "outcome": report.outcome,
        "threads_repaired": report.threads_repaired,
        "stats": report.stats,
    })
    .to_string();
    conn.execute(
        "UPDATE imports SET status = ?2, stats_json = ?3 WHERE id = ?1;",
        params![import_id, status, stats_json],
    )?;
    Ok(())
}

pub fn fail(conn: &Connection, import_id: &str, message: &str) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE imports SET status = 'failed', stats_json = ?2 WHERE id = ?1;",
        params![import_id, serde_json::json!({ "error": message }).to_string()],
    )?;
    Ok(())
}

/// Id of an earlier fully successful run of the same backup, if any.
pub fn previous_success(conn: &Connection, source_hash: &str) -> Result<Option<String>, CoreError> {
    let id = conn
        .query_row(
            "SELECT id FROM imports WHERE source_hash = ?1 AND status = 'success'
             ORDER BY imported_at DESC LIMIT 1;",
            params![source_hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn list_imports(conn: &Connection, limit: i64) -> Result<Vec<ImportRecord>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, imported_at, source_filename, source_hash, status, stats_json
         FROM imports
         ORDER BY imported_at DESC, id ASC
         LIMIT ?1;",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(ImportRecord {
            id: row.get(0)?,
            imported_at: row.get(1)?,
            source_filename: row.get(2)?,
            source_hash: row.get(3)?,
            status: row.get(4)?,
            stats_json: row.get(5)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
