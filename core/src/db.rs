use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use tempfile::NamedTempFile;

use crate::error::CoreError;
use crate::migrations::MIGRATIONS;
use crate::models::{RowId, ThreadId};
use crate::store::{MessageStore, StoreRow, Table};

/// SQLite-backed message store laid out like a telephony provider.
pub struct SqliteStore {
    pub path: Option<PathBuf>,
    pub conn: Connection,
    pub parts_dir: PathBuf,
}

pub fn open_store(path: impl AsRef<Path>, parts_dir: impl AsRef<Path>) -> Result<SqliteStore, CoreError> {
    let path = path.as_ref().to_path_buf();
    let conn = Connection::open(&path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA temp_store = MEMORY;",
    )?;
    apply_migrations(&conn)?;
    conn.execute(
        "UPDATE imports \
         SET status = 'failed', \
             stats_json = COALESCE(stats_json, '{\"error\":\"import interrupted\"}') \
         WHERE status = 'running';",
        [],
    )?;
    Ok(SqliteStore {
        path: Some(path),
        conn,
        parts_dir: parts_dir.as_ref().to_path_buf(),
    })
}

impl SqliteStore {
    pub fn open_in_memory(parts_dir: impl AsRef<Path>) -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(SqliteStore {
            path: None,
            conn,
            parts_dir: parts_dir.as_ref().to_path_buf(),
        })
    }

    pub fn count(&self, table: Table) -> Result<i64, CoreError> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(1) FROM {};", table.name()), [], |row| row.get(0))?;
        Ok(count)
    }
}

pub fn apply_migrations(conn: &Connection) -> Result<(), CoreError> {
    let current_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let mut version = current_version as usize;
    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let next_version = idx + 1;
        if next_version <= version {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", next_version))?;
        version = next_version;
    }
    Ok(())
}

fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 3);
    for idx in 0..count {
        if idx > 0 {
            out.push_str(", ");
        }
        out.push('?');
    }
    out
}

impl MessageStore for SqliteStore {
    fn insert(&mut self, table: Table, row: &StoreRow) -> Result<Option<RowId>, CoreError> {
        if row.is_empty() {
            return Err(CoreError::InvalidArgument(format!("empty row for {}", table.name())));
        }
        let columns: Vec<&str> = row.iter().map(|(col, _)| *col).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            table.name(),
            columns.join(", "),
            placeholders(columns.len())
        );
        self.conn
            .execute(&sql, rusqlite::params_from_iter(row.iter().map(|(_, v)| v)))?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// One cached single-row statement inside a transaction, so each
    /// execution binds one row's worth of parameters.
    fn bulk_insert(&mut self, table: Table, rows: &[StoreRow]) -> Result<usize, CoreError> {
        let first = match rows.first() {
            Some(first) => first,
            None => return Ok(0),
        };
        let columns: Vec<&str> = first.iter().map(|(col, _)| *col).collect();
        for (idx, row) in rows.iter().enumerate() {
            let same_shape = row.len() == columns.len()
                && row.iter().zip(&columns).all(|((col, _), expected)| col == expected);
            if !same_shape {
                return Err(CoreError::InvalidArgument(format!(
                    "bulk insert row {} into {} has a different column set",
                    idx,
                    table.name()
                )));
            }
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            table.name(),
            columns.join(", "),
            placeholders(columns.len())
        );
        let tx = self.conn.transaction()?;
        let mut changes = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                changes += stmt.execute(rusqlite::params_from_iter(row.iter().map(|(_, v)| v)))?;
            }
        }
        tx.commit()?;
        Ok(changes)
    }

    fn query(
        &self,
        table: Table,
        projection: &[&str],
        selection: &str,
        args: &[Value],
    ) -> Result<Vec<Vec<Value>>, CoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {};",
            projection.join(", "),
            table.name(),
            selection
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let width = projection.len();
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(row.get::<_, Value>(idx)?);
            }
            Ok(values)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_or_create_thread_id(&mut self, address: &str) -> Result<ThreadId, CoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT _id FROM canonical_addresses WHERE address = ?1;",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        let address_id = match existing {
            Some(id) => id,
            None => {
                self.conn.execute(
                    "INSERT INTO canonical_addresses (address) VALUES (?1);",
                    params![address],
                )?;
                self.conn.last_insert_rowid()
            }
        };
        let recipient_ids = address_id.to_string();
        let thread: Option<i64> = self
            .conn
            .query_row(
                "SELECT _id FROM threads WHERE recipient_ids = ?1;",
                params![recipient_ids],
                |row| row.get(0),
            )
            .optional()?;
        match thread {
            Some(id) => Ok(id),
            None => {
                self.conn.execute(
                    "INSERT INTO threads (recipient_ids, date, message_count) VALUES (?1, 0, 0);",
                    params![recipient_ids],
                )?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    fn write_part_data(&mut self, part_id: RowId, data: &[u8]) -> Result<(), CoreError> {
        fs::create_dir_all(&self.parts_dir)?;
        let mut temp = NamedTempFile::new_in(&self.parts_dir)?;
        temp.write_all(data)?;
        let dest = self.parts_dir.join(format!("PART_{}", part_id));
        temp.persist(&dest)
            .map_err(|e| CoreError::Store(format!("part persist failed: {}", e)))?;
        let changes = self.conn.execute(
            "UPDATE part SET _data = ?1 WHERE _id = ?2;",
            params![dest.to_string_lossy().to_string(), part_id],
        )?;
        if changes == 0 {
            return Err(CoreError::Store(format!("part {} not found", part_id)));
        }
        Ok(())
    }

    fn update_thread_metadata(&mut self, thread_id: ThreadId) -> Result<(), CoreError> {
        // mms dates are seconds, sms dates milliseconds
        let latest: Option<(i64, Option<String>)> = self
            .conn
            .query_row(
                "SELECT date, body FROM (
                   SELECT date AS date, body AS body FROM sms WHERE thread_id = ?1
                   UNION ALL
                   SELECT m.date * 1000 AS date,
                          (SELECT p.text FROM part p
                           WHERE p.mid = m._id AND p.ct = 'text/plain'
                           ORDER BY p.seq LIMIT 1) AS body
                   FROM mms m WHERE m.thread_id = ?1
                 )
                 ORDER BY date DESC
                 LIMIT 1;",
                params![thread_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (date, snippet) = latest.unwrap_or((0, None));
        self.conn.execute(
            "UPDATE threads
             SET date = ?2,
                 snippet = ?3,
                 message_count = (SELECT COUNT(1) FROM sms WHERE thread_id = ?1)
                               + (SELECT COUNT(1) FROM mms WHERE thread_id = ?1)
             WHERE _id = ?1;",
            params![thread_id, date, snippet],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_create_schema() {
        let conn = Connection::open_in_memory().expect("memory db");
        apply_migrations(&conn).expect("migrate");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('sms', 'mms', 'part', 'addr');",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(count, 4);
    }

    #[test]
    fn thread_ids_are_stable_per_address() {
        let dir = tempfile::tempdir().expect("temp");
        let mut store = SqliteStore::open_in_memory(dir.path()).expect("store");
        let first = store.get_or_create_thread_id("555").expect("thread");
        let again = store.get_or_create_thread_id("555").expect("thread");
        let other = store.get_or_create_thread_id("556").expect("thread");
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn bulk_insert_rejects_mixed_columns() {
        let dir = tempfile::tempdir().expect("temp");
        let mut store = SqliteStore::open_in_memory(dir.path()).expect("store");
        let rows = vec![
            vec![("address", Value::from("1".to_string())), ("date", Value::from(1i64))],
            vec![("address", Value::from("2".to_string()))],
        ];
        let err = store.bulk_insert(Table::Sms, &rows).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(store.count(Table::Sms).expect("count"), 0);
    }

    #[test]
    fn bulk_insert_stays_within_a_small_variable_limit() {
        let dir = tempfile::tempdir().expect("temp");
        let mut store = SqliteStore::open_in_memory(dir.path()).expect("store");
        store
            .conn
            .set_limit(rusqlite::limits::Limit::SQLITE_LIMIT_VARIABLE_NUMBER, 999);
        let rows: Vec<StoreRow> = (0..999i64)
            .map(|i| {
                vec![
                    ("address", Value::from(format!("+1555{:07}", i))),
                    ("body", Value::from("hello".to_string())),
                    ("date", Value::from(i)),
                    ("date_sent", Value::from(i)),
                    ("locked", Value::from(0)),
                    ("protocol", Value::Null),
                    ("read", Value::from(1)),
                    ("status", Value::from(-1)),
                    ("type", Value::from(1)),
                    ("service_center", Value::Null),
                    ("sub_id", Value::from(0)),
                    ("thread_id", Value::from(1i64)),
                ]
            })
            .collect();
        assert_eq!(store.bulk_insert(Table::Sms, &rows).expect("bulk"), 999);
        assert_eq!(store.count(Table::Sms).expect("count"), 999);
    }

    #[test]
    fn bulk_insert_is_all_or_nothing() {
        let dir = tempfile::tempdir().expect("temp");
        let mut store = SqliteStore::open_in_memory(dir.path()).expect("store");
        let rows = vec![
            vec![("mid", Value::from(1i64)), ("ct", Value::from("text/plain".to_string()))],
            vec![("mid", Value::Null), ("ct", Value::from("text/plain".to_string()))],
        ];
        assert!(store.bulk_insert(Table::Part, &rows).is_err());
        assert_eq!(store.count(Table::Part).expect("count"), 0);
    }

    #[test]
    fn part_data_is_persisted_to_parts_dir() {
        let dir = tempfile::tempdir().expect("temp");
        let mut store = SqliteStore::open_in_memory(dir.path().join("parts")).expect("store");
        let part_id = store
            .insert(
                Table::Part,
                &vec![("mid", Value::from(1i64)), ("ct", Value::from("image/png".to_string()))],
            )
            .expect("insert")
            .expect("row id");
        store.write_part_data(part_id, b"png").expect("write");
        let stored: String = store
            .conn
            .query_row("SELECT _data FROM part WHERE _id = ?1;", params![part_id], |row| row.get(0))
            .expect("path");
        assert_eq!(fs::read(stored).expect("read"), b"png");
    }

    #[test]
    fn part_data_for_unknown_part_fails() {
        let dir = tempfile::tempdir().expect("temp");
        let mut store = SqliteStore::open_in_memory(dir.path()).expect("store");
        assert!(store.write_part_data(42, b"x").is_err());
    }

    #[test]
    fn interrupted_imports_are_marked_failed_on_open() {
        let dir = tempfile::tempdir().expect("temp");
        let path = dir.path().join("store.sqlite");
        {
            let store = open_store(&path, dir.path()).expect("open");
            store
                .conn
                .execute(
                    "INSERT INTO imports (id, imported_at, source_filename, source_hash, status) \
                     VALUES ('i1', 0, 'b.json', 'h', 'running');",
                    [],
                )
                .expect("insert");
        }
        let store = open_store(&path, dir.path()).expect("reopen");
        let status: String = store
            .conn
            .query_row("SELECT status FROM imports WHERE id = 'i1';", [], |row| row.get(0))
            .expect("status");
        assert_eq!(status, "failed");
    }
}
