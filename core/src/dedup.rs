use std::collections::HashSet;

use rusqlite::types::Value;
use tracing::debug;

use crate::error::CoreError;
use crate::models::{MmsAddress, MmsBackup, MmsPart, RowId, SmsBackup, ThreadId};
use crate::store::{opt_text, value_i64, value_text, MessageStore, Table};

/// Upper bound on bound parameters per query on older SQLite builds.
pub const MAX_BATCH: usize = 999;

pub fn sms_exists<S: MessageStore + ?Sized>(store: &S, sms: &SmsBackup) -> Result<bool, CoreError> {
    let rows = store.query(
        Table::Sms,
        &["_id"],
        "date = ? AND address = ? AND type = ?",
        &[
            Value::from(sms.date),
            Value::from(sms.address.clone()),
            Value::from(sms.message_type),
        ],
    )?;
    Ok(!rows.is_empty())
}

/// Checks a whole batch with one query.
///
/// The store is asked for every row sharing a timestamp with the batch and
/// the exact `(date, address, type)` match happens here. Timestamps are
/// close to unique, so the result stays small.
pub fn bulk_sms_exist<S: MessageStore + ?Sized>(
    store: &S,
    batch: &[SmsBackup],
) -> Result<Vec<bool>, CoreError> {
    if batch.len() > MAX_BATCH {
        return Err(CoreError::InvalidArgument(format!(
            "batch of {} exceeds {} messages",
            batch.len(),
            MAX_BATCH
        )));
    }
    let mut seen = HashSet::new();
    let dates: Vec<i64> = batch.iter().map(|sms| sms.date).filter(|d| seen.insert(*d)).collect();
    if dates.is_empty() {
        return Ok(Vec::new());
    }
    debug!(messages = batch.len(), timestamps = dates.len(), "bulk checking existing messages");
    let selection = format!("date IN ({})", vec!["?"; dates.len()].join(","));
    let args: Vec<Value> = dates.into_iter().map(Value::from).collect();
    let rows = store.query(Table::Sms, &["date", "address", "type"], &selection, &args)?;
    let mut existing: HashSet<(i64, String, i64)> = HashSet::with_capacity(rows.len());
    for row in rows {
        let (date, address, kind) = match (
            row.first().and_then(value_i64),
            row.get(1).and_then(value_text),
            row.get(2).and_then(value_i64),
        ) {
            (Some(date), Some(address), Some(kind)) => (date, address, kind),
            _ => continue,
        };
        existing.insert((date, address, kind));
    }
    Ok(batch
        .iter()
        .map(|sms| existing.contains(&(sms.date, sms.address.clone(), sms.message_type as i64)))
        .collect())
}

pub fn find_mms_id<S: MessageStore + ?Sized>(
    store: &S,
    mms: &MmsBackup,
    thread_id: ThreadId,
) -> Result<Option<RowId>, CoreError> {
    let rows = store.query(
        Table::Mms,
        &["_id"],
        "date = ? AND date_sent = ? AND thread_id = ? AND msg_box = ?",
        &[
            Value::from(mms.date),
            Value::from(mms.date_sent),
            Value::from(thread_id),
            Value::from(mms.message_box),
        ],
    )?;
    Ok(rows.first().and_then(|row| row.first()).and_then(value_i64))
}

pub fn mms_part_exists<S: MessageStore + ?Sized>(
    store: &S,
    part: &MmsPart,
    message_id: RowId,
) -> Result<bool, CoreError> {
    // cl and cid are often absent; IS lets NULL match NULL
    let rows = store.query(
        Table::Part,
        &["_id"],
        "cl IS ? AND ct = ? AND mid = ? AND cid IS ?",
        &[
            opt_text(&part.content_location),
            Value::from(part.content_type.clone()),
            Value::from(message_id),
            opt_text(&part.content_id),
        ],
    )?;
    Ok(!rows.is_empty())
}

pub fn mms_address_exists<S: MessageStore + ?Sized>(
    store: &S,
    address: &MmsAddress,
    message_id: RowId,
) -> Result<bool, CoreError> {
    let rows = store.query(
        Table::Addr,
        &["_id"],
        "type = ? AND address = ? AND msg_id = ?",
        &[
            Value::from(address.role),
            Value::from(address.address.clone()),
            Value::from(message_id),
        ],
    )?;
    Ok(!rows.is_empty())
}
