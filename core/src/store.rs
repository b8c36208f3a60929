use rusqlite::types::Value;

use crate::error::CoreError;
use crate::models::{RowId, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Sms,
    Mms,
    Part,
    Addr,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Sms => "sms",
            Table::Mms => "mms",
            Table::Part => "part",
            Table::Addr => "addr",
        }
    }
}

/// Ordered column/value pairs for one row.
pub type StoreRow = Vec<(&'static str, Value)>;

/// The operations the import pipeline needs from a message store.
///
/// Every call is its own atomic unit; nothing wraps a whole import in a
/// transaction.
pub trait MessageStore {
    /// Inserts one row. Returns the new row id when the store exposes it.
    fn insert(&mut self, table: Table, row: &StoreRow) -> Result<Option<RowId>, CoreError>;

    /// Inserts all rows or none of them.
    fn bulk_insert(&mut self, table: Table, rows: &[StoreRow]) -> Result<usize, CoreError>;

    /// `selection` is a SQL predicate with positional `?` placeholders bound to `args`.
    fn query(
        &self,
        table: Table,
        projection: &[&str],
        selection: &str,
        args: &[Value],
    ) -> Result<Vec<Vec<Value>>, CoreError>;

    fn get_or_create_thread_id(&mut self, address: &str) -> Result<ThreadId, CoreError>;

    fn write_part_data(&mut self, part_id: RowId, data: &[u8]) -> Result<(), CoreError>;

    /// Recomputes a thread's "last message" metadata.
    fn update_thread_metadata(&mut self, thread_id: ThreadId) -> Result<(), CoreError>;
}

pub fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(v) => Value::from(v.clone()),
        None => Value::Null,
    }
}

pub fn opt_int(value: Option<i32>) -> Value {
    match value {
        Some(v) => Value::from(v),
        None => Value::Null,
    }
}

pub(crate) fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(*v),
        Value::Text(v) => v.parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(v) => Some(v.clone()),
        Value::Integer(v) => Some(v.to_string()),
        _ => None,
    }
}
