use std::cell::Cell;
use std::fs;
use std::io::Cursor;

use msgrestore_core::importer::{
    format_bytes, import_backup, import_backup_file, journal, plan_import, restore_messages,
};
use msgrestore_core::models::{BackupRecord, ImportOutcome, MmsBackup, RowId, ThreadId};
use msgrestore_core::threads::ImportContext;
use msgrestore_core::writer::{MessagesWriter, MmsWrite};
use msgrestore_core::{open_store, CoreError, ImportConfig, MessageStore, SqliteStore, StoreRow, Table};
use rusqlite::types::Value;
use serde_json::json;
use tempfile::tempdir;

/// Delegates to SQLite, counting queries and optionally failing or
/// dropping writes.
struct ProbeStore {
    inner: SqliteStore,
    sms_queries: Cell<usize>,
    fail_address: Option<String>,
    fail_all_sms: bool,
    /// MMS inserts report success but write nothing.
    drop_mms_inserts: bool,
    /// Number of upcoming `addr` inserts that fail.
    failing_addr_inserts: usize,
}

impl ProbeStore {
    fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            sms_queries: Cell::new(0),
            fail_address: None,
            fail_all_sms: false,
            drop_mms_inserts: false,
            failing_addr_inserts: 0,
        }
    }

    fn rejects(&self, table: Table, row: &StoreRow) -> bool {
        if table != Table::Sms {
            return false;
        }
        if self.fail_all_sms {
            return true;
        }
        match &self.fail_address {
            Some(bad) => row
                .iter()
                .any(|(col, value)| *col == "address" && *value == Value::from(bad.clone())),
            None => false,
        }
    }
}

impl MessageStore for ProbeStore {
    fn insert(&mut self, table: Table, row: &StoreRow) -> Result<Option<RowId>, CoreError> {
        if self.rejects(table, row) {
            return Err(CoreError::Store("insert rejected".to_string()));
        }
        if table == Table::Mms && self.drop_mms_inserts {
            return Ok(None);
        }
        if table == Table::Addr && self.failing_addr_inserts > 0 {
            self.failing_addr_inserts -= 1;
            return Err(CoreError::Store("addr insert rejected".to_string()));
        }
        self.inner.insert(table, row)
    }

    fn bulk_insert(&mut self, table: Table, rows: &[StoreRow]) -> Result<usize, CoreError> {
        if rows.iter().any(|row| self.rejects(table, row)) {
            return Err(CoreError::Store("bulk insert rejected".to_string()));
        }
        self.inner.bulk_insert(table, rows)
    }

    fn query(
        &self,
        table: Table,
        projection: &[&str],
        selection: &str,
        args: &[Value],
    ) -> Result<Vec<Vec<Value>>, CoreError> {
        if table == Table::Sms {
            self.sms_queries.set(self.sms_queries.get() + 1);
        }
        self.inner.query(table, projection, selection, args)
    }

    fn get_or_create_thread_id(&mut self, address: &str) -> Result<ThreadId, CoreError> {
        self.inner.get_or_create_thread_id(address)
    }

    fn write_part_data(&mut self, part_id: RowId, data: &[u8]) -> Result<(), CoreError> {
        self.inner.write_part_data(part_id, data)
    }

    fn update_thread_metadata(&mut self, thread_id: ThreadId) -> Result<(), CoreError> {
        self.inner.update_thread_metadata(thread_id)
    }
}

fn sms_json(address: &str, date: i64) -> serde_json::Value {
    json!({
        "backupType": "sms",
        "sub_id": 0,
        "address": address,
        "body": format!("message {}", date),
        "date": date,
        "date_sent": date,
        "locked": 0,
        "protocol": null,
        "read": 1,
        "status": -1,
        "type": 1,
        "service_center": null
    })
}

fn mms_json(addresses: serde_json::Value) -> serde_json::Value {
    json!({
        "backupType": "mms",
        "creator": null,
        "ct_t": "application/vnd.wap.multipart.related",
        "d_rpt": 129,
        "date": 1_700_000_000,
        "date_sent": 1_700_000_000,
        "locked": 0,
        "m_type": 132,
        "msg_box": 1,
        "read": 1,
        "rr": 129,
        "seen": 1,
        "text_only": 1,
        "st": null,
        "sub": null,
        "sub_cs": null,
        "sub_id": 1,
        "tr_id": null,
        "addresses": addresses,
        "parts": [{
            "cd": null, "chset": "106", "cid": null, "cl": "txt000.txt", "ct": "text/plain",
            "ctt_s": null, "ctt_t": null, "fn": null, "name": null, "seq": 0,
            "text": "picture caption", "data": null
        }]
    })
}

fn records(values: Vec<serde_json::Value>) -> Vec<BackupRecord> {
    serde_json::from_value(serde_json::Value::Array(values)).expect("records")
}

fn memory_store() -> (tempfile::TempDir, SqliteStore) {
    let tmp = tempdir().expect("temp");
    let store = SqliteStore::open_in_memory(tmp.path().join("parts")).expect("store");
    (tmp, store)
}

#[test]
fn xml_backup_with_one_sms_succeeds() {
    let (_tmp, mut store) = memory_store();
    let raw = r#"<?xml version='1.0' encoding='UTF-8'?>
<smses count="1">
  <sms address="+15550001111" date="1600000000000" type="1" body="hi" read="1" status="-1" locked="0"/>
</smses>"#;
    let report = import_backup(&mut store, Cursor::new(raw), None, &ImportConfig::default()).expect("import");
    assert_eq!(report.outcome, ImportOutcome::Ok);
    assert_eq!(report.stats.imported, 1);
    assert_eq!(report.threads_repaired, 1);
    assert_eq!(store.count(Table::Sms).expect("count"), 1);
}

#[test]
fn empty_json_backup_has_nothing_new() {
    let (_tmp, mut store) = memory_store();
    let report = import_backup(&mut store, Cursor::new("[]"), Some("application/json"), &ImportConfig::default())
        .expect("import");
    assert_eq!(report.outcome, ImportOutcome::NothingNew);
    assert_eq!(report.threads_repaired, 0);
}

#[test]
fn malformed_backup_writes_nothing() {
    let (_tmp, mut store) = memory_store();
    let raw = r#"<?xml version='1.0'?><smses><sms address="1" date="1" type="1" read="1" status="-1" locked="0"/>"#;
    let err = import_backup(&mut store, Cursor::new(raw), None, &ImportConfig::default()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidFormat(_)));
    assert_eq!(store.count(Table::Sms).expect("count"), 0);
}

#[test]
fn thousand_messages_need_two_existence_queries() {
    let (_tmp, store) = memory_store();
    let mut probe = ProbeStore::new(store);
    let batch = records((0..1000).map(|i| sms_json(&format!("+1555{:07}", i % 40), 1_000_000 + i)).collect());
    let report = restore_messages(&mut probe, batch, &ImportConfig::default(), |_| {});
    assert_eq!(report.outcome, ImportOutcome::Ok);
    assert_eq!(report.stats.imported, 1000);
    assert_eq!(report.stats.rows_inserted, 1000);
    assert_eq!(probe.sms_queries.get(), 2);
    assert_eq!(report.threads_repaired, 40);
    assert_eq!(probe.inner.count(Table::Sms).expect("count"), 1000);
}

#[test]
fn second_run_adds_no_rows() {
    let (_tmp, mut store) = memory_store();
    let values = vec![
        sms_json("555", 1_000),
        sms_json("555", 2_000),
        mms_json(json!([{ "address": "555", "type": 137, "charset": 106 }])),
    ];
    let first = restore_messages(&mut store, records(values.clone()), &ImportConfig::default(), |_| {});
    assert_eq!(first.stats.rows_inserted, 3);
    assert_eq!(first.stats.parts_inserted, 1);
    assert_eq!(first.stats.addresses_inserted, 1);

    let second = restore_messages(&mut store, records(values), &ImportConfig::default(), |_| {});
    assert_eq!(second.outcome, ImportOutcome::Ok);
    assert_eq!(second.stats.rows_inserted, 0);
    assert_eq!(second.stats.duplicates, 3);
    assert_eq!(second.stats.parts_inserted, 0);
    assert_eq!(store.count(Table::Sms).expect("count"), 2);
    assert_eq!(store.count(Table::Mms).expect("count"), 1);
    assert_eq!(store.count(Table::Part).expect("count"), 1);
    assert_eq!(store.count(Table::Addr).expect("count"), 1);
}

#[test]
fn every_offered_record_is_accounted_for() {
    let (_tmp, store) = memory_store();
    let mut probe = ProbeStore::new(store);
    probe.fail_address = Some("bad".to_string());
    let raw = r#"<?xml version='1.0'?>
<smses>
  <sms address="good" date="1" type="1" read="1" status="-1" locked="0"/>
  <sms address="bad" date="2" type="1" read="1" status="-1" locked="0"/>
  <sms address="good" date="oops" type="1" read="1" status="-1" locked="0"/>
  <sms address="good" date="3" type="1" read="1" status="-1" locked="0"/>
</smses>"#;
    let report = import_backup(&mut probe, Cursor::new(raw), None, &ImportConfig::default()).expect("import");
    let s = &report.stats;
    assert_eq!(s.imported, 2);
    assert_eq!(s.failed, 2);
    assert_eq!(s.decode_failures, 1);
    assert_eq!(s.imported + s.failed + s.skipped_no_identity, 4);
    assert_eq!(report.outcome, ImportOutcome::Partial);
}

#[test]
fn mms_without_identity_is_skipped_not_failed() {
    let (_tmp, mut store) = memory_store();
    let batch = records(vec![
        sms_json("555", 1_000),
        mms_json(json!([{ "address": "555", "type": 151, "charset": 106 }])),
    ]);
    let report = restore_messages(&mut store, batch, &ImportConfig::default(), |_| {});
    assert_eq!(report.stats.imported, 1);
    assert_eq!(report.stats.skipped_no_identity, 1);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.outcome, ImportOutcome::Ok);
    assert_eq!(store.count(Table::Mms).expect("count"), 0);
}

#[test]
fn failing_batch_counts_every_message_in_it() {
    let (_tmp, store) = memory_store();
    let mut probe = ProbeStore::new(store);
    probe.fail_all_sms = true;
    let batch = records((0..5).map(|i| sms_json("555", i)).collect());
    let report = restore_messages(&mut probe, batch, &ImportConfig::default(), |_| {});
    assert_eq!(report.stats.failed, 5);
    assert_eq!(report.stats.imported, 0);
    assert_eq!(report.outcome, ImportOutcome::Fail);
}

#[test]
fn disabled_record_types_are_left_alone() {
    let (_tmp, mut store) = memory_store();
    let values = vec![
        sms_json("555", 1_000),
        mms_json(json!([{ "address": "555", "type": 137, "charset": 106 }])),
    ];
    let sms_only = ImportConfig {
        import_sms: true,
        import_mms: false,
    };
    let report = restore_messages(&mut store, records(values.clone()), &sms_only, |_| {});
    assert_eq!(report.stats.imported, 1);
    assert_eq!(store.count(Table::Mms).expect("count"), 0);

    let mms_only = ImportConfig {
        import_sms: false,
        import_mms: true,
    };
    let report = restore_messages(&mut store, records(values), &mms_only, |_| {});
    assert_eq!(report.stats.imported, 1);
    assert_eq!(report.stats.rows_inserted, 1);
    assert_eq!(store.count(Table::Mms).expect("count"), 1);
    assert_eq!(store.count(Table::Sms).expect("count"), 1);
}

#[test]
fn mms_snippet_lands_on_thread() {
    let (_tmp, mut store) = memory_store();
    let batch = records(vec![
        sms_json("555", 1_000),
        mms_json(json!([{ "address": "555", "type": 137, "charset": 106 }])),
    ]);
    restore_messages(&mut store, batch, &ImportConfig::default(), |_| {});
    let (date, count, snippet): (i64, i64, Option<String>) = store
        .conn
        .query_row("SELECT date, message_count, snippet FROM threads;", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .expect("thread");
    assert_eq!(date, 1_700_000_000_000);
    assert_eq!(count, 2);
    assert_eq!(snippet.as_deref(), Some("picture caption"));
}

#[test]
fn progress_reports_phases() {
    let (_tmp, mut store) = memory_store();
    let seen = std::cell::RefCell::new(Vec::new());
    let batch = records(vec![sms_json("555", 1_000)]);
    restore_messages(&mut store, batch, &ImportConfig::default(), |msg| {
        seen.borrow_mut().push(msg.to_string())
    });
    let seen = seen.into_inner();
    assert!(seen.iter().any(|m| m.starts_with("Importing SMS messages")));
    assert_eq!(seen.last().map(String::as_str), Some("Import finished"));
}

#[test]
fn file_import_is_journaled() {
    let tmp = tempdir().expect("temp");
    let backup = tmp.path().join("backup.json");
    let payload = serde_json::Value::Array(vec![sms_json("555", 1_000), sms_json("556", 2_000)]);
    fs::write(&backup, payload.to_string()).expect("write backup");

    let mut store = open_store(tmp.path().join("store.sqlite"), tmp.path().join("parts")).expect("store");
    let plan = plan_import(&backup).expect("plan");
    assert_eq!(plan.source_filename, "backup.json");
    assert_eq!(plan.source_hash.len(), 64);

    let report = import_backup_file(&mut store, &plan, &ImportConfig::default(), |_| {}).expect("import");
    assert_eq!(report.stats.rows_inserted, 2);
    import_backup_file(&mut store, &plan, &ImportConfig::default(), |_| {}).expect("reimport");

    let history = journal::list_imports(&store.conn, 10).expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.status == "success"));
    let stats: serde_json::Value =
        serde_json::from_str(history[0].stats_json.as_deref().expect("stats")).expect("json");
    assert_eq!(stats["format"], "json");
    assert!(journal::previous_success(&store.conn, &plan.source_hash)
        .expect("lookup")
        .is_some());
    assert_eq!(store.count(Table::Sms).expect("count"), 2);
}

#[test]
fn bad_file_import_is_journaled_as_failed() {
    let tmp = tempdir().expect("temp");
    let backup = tmp.path().join("backup.xml");
    fs::write(&backup, "<?xml version='1.0'?><messages/>").expect("write backup");
    let mut store = open_store(tmp.path().join("store.sqlite"), tmp.path().join("parts")).expect("store");
    let plan = plan_import(&backup).expect("plan");
    let err = import_backup_file(&mut store, &plan, &ImportConfig::default(), |_| {}).unwrap_err();
    assert!(matches!(err, CoreError::InvalidFormat(_)));
    let history = journal::list_imports(&store.conn, 10).expect("history");
    assert_eq!(history[0].status, "failed");
}

#[test]
fn planning_rejects_missing_and_empty_files() {
    let tmp = tempdir().expect("temp");
    assert!(matches!(
        plan_import(&tmp.path().join("nope.json")),
        Err(CoreError::InvalidArgument(_))
    ));
    let empty = tmp.path().join("empty.json");
    fs::write(&empty, b"").expect("write");
    assert!(matches!(plan_import(&empty), Err(CoreError::InvalidFormat(_))));
}

#[test]
fn empty_input_is_a_format_error() {
    let (_tmp, mut store) = memory_store();
    let err = import_backup(&mut store, Cursor::new(""), None, &ImportConfig::default()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidFormat(_)));
}

#[test]
fn journal_failure_keeps_the_report() {
    let tmp = tempdir().expect("temp");
    let backup = tmp.path().join("backup.json");
    fs::write(&backup, serde_json::Value::Array(vec![sms_json("555", 1_000)]).to_string())
        .expect("write backup");
    let mut store = open_store(tmp.path().join("store.sqlite"), tmp.path().join("parts")).expect("store");
    store
        .conn
        .execute_batch(
            "CREATE TRIGGER imports_frozen BEFORE UPDATE ON imports
             BEGIN SELECT RAISE(ABORT, 'imports are read-only'); END;",
        )
        .expect("trigger");
    let plan = plan_import(&backup).expect("plan");
    let report = import_backup_file(&mut store, &plan, &ImportConfig::default(), |_| {}).expect("import");
    assert_eq!(report.stats.rows_inserted, 1);
    assert_eq!(store.count(Table::Sms).expect("count"), 1);
    let history = journal::list_imports(&store.conn, 10).expect("history");
    assert_eq!(history[0].status, "running");
}

#[test]
fn mms_lost_after_insert_abandons_parts_and_addresses() {
    let (_tmp, store) = memory_store();
    let mut probe = ProbeStore::new(store);
    probe.drop_mms_inserts = true;
    let message: MmsBackup =
        serde_json::from_value(mms_json(json!([{ "address": "555", "type": 137, "charset": 106 }]))).expect("mms");

    let mut ctx = ImportContext::new();
    let write = MessagesWriter::new(&mut probe, &mut ctx).write_mms(&message).expect("write");
    let thread_id = match write {
        MmsWrite::MissingMessageId { thread_id } => thread_id,
        other => panic!("unexpected write {:?}", other),
    };
    assert!(ctx.modified_threads.contains(&thread_id));

    let batch = records(vec![mms_json(json!([{ "address": "555", "type": 137, "charset": 106 }]))]);
    let report = restore_messages(&mut probe, batch, &ImportConfig::default(), |_| {});
    assert_eq!(report.stats.imported, 1);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.stats.rows_inserted, 0);
    assert_eq!(report.stats.parts_inserted, 0);
    assert_eq!(report.outcome, ImportOutcome::Ok);
    assert_eq!(probe.inner.count(Table::Part).expect("count"), 0);
    assert_eq!(probe.inner.count(Table::Addr).expect("count"), 0);
}

#[test]
fn rerun_completes_a_partially_written_mms() {
    let (_tmp, store) = memory_store();
    let mut probe = ProbeStore::new(store);
    probe.failing_addr_inserts = 1;
    let mut value = mms_json(json!([
        { "address": "555", "type": 137, "charset": 106 },
        { "address": "777", "type": 151, "charset": 106 }
    ]));
    value["parts"]
        .as_array_mut()
        .expect("parts")
        .push(json!({
            "cd": null, "chset": null, "cid": "<image000>", "cl": "image000.png", "ct": "image/png",
            "ctt_s": null, "ctt_t": null, "fn": null, "name": "image000.png", "seq": 0,
            "text": null, "data": "iVBORw0K"
        }));

    let first = restore_messages(&mut probe, records(vec![value.clone()]), &ImportConfig::default(), |_| {});
    assert_eq!(first.stats.failed, 1);
    assert_eq!(first.outcome, ImportOutcome::Fail);
    assert_eq!(probe.inner.count(Table::Mms).expect("count"), 1);
    assert_eq!(probe.inner.count(Table::Part).expect("count"), 2);
    assert_eq!(probe.inner.count(Table::Addr).expect("count"), 0);

    let second = restore_messages(&mut probe, records(vec![value]), &ImportConfig::default(), |_| {});
    assert_eq!(second.outcome, ImportOutcome::Ok);
    assert_eq!(second.stats.duplicates, 1);
    assert_eq!(second.stats.parts_inserted, 0);
    assert_eq!(second.stats.addresses_inserted, 2);
    assert_eq!(probe.inner.count(Table::Mms).expect("count"), 1);
    assert_eq!(probe.inner.count(Table::Part).expect("count"), 2);
    assert_eq!(probe.inner.count(Table::Addr).expect("count"), 2);
}

#[test]
fn format_bytes_is_human_readable() {
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(2048), "2.0 KB");
    assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
}
