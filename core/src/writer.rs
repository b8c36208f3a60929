use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use rusqlite::types::Value;
use tracing::{debug, warn};

use crate::dedup::{bulk_sms_exist, find_mms_id, mms_address_exists, mms_part_exists, sms_exists};
use crate::error::CoreError;
use crate::models::{MmsAddress, MmsBackup, MmsPart, RowId, SmsBackup, ThreadId};
use crate::store::{opt_int, opt_text, MessageStore, StoreRow, Table};
use crate::threads::ImportContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsWrite {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWrite {
    pub inserted: usize,
    pub duplicates: usize,
}

/// What happened to one MMS part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartWrite {
    Existing,
    Inserted,
    PayloadWritten { bytes: usize },
    /// The row exists but its binary payload is missing or incomplete.
    PayloadFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmsWriteReport {
    pub thread_id: ThreadId,
    pub message_id: RowId,
    pub message_inserted: bool,
    pub parts: Vec<PartWrite>,
    pub addresses_inserted: usize,
    pub addresses_existing: usize,
}

impl MmsWriteReport {
    pub fn parts_inserted(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| !matches!(part, PartWrite::Existing))
            .count()
    }

    pub fn payload_failures(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, PartWrite::PayloadFailed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmsWrite {
    /// No sender/recipient to key a thread on; nothing was written.
    NoThreadAddress,
    /// The message row could not be found again after the insert.
    MissingMessageId { thread_id: ThreadId },
    Written(MmsWriteReport),
}

/// Writes backup records into a store, skipping ones already present.
pub struct MessagesWriter<'a, S: MessageStore + ?Sized> {
    store: &'a mut S,
    ctx: &'a mut ImportContext,
}

impl<'a, S: MessageStore + ?Sized> MessagesWriter<'a, S> {
    pub fn new(store: &'a mut S, ctx: &'a mut ImportContext) -> Self {
        Self { store, ctx }
    }

    fn thread_id(&mut self, address: &str) -> Result<ThreadId, CoreError> {
        self.ctx.threads.resolve(&mut *self.store, address)
    }

    /// The thread is marked modified even when the message is a duplicate.
    pub fn write_sms(&mut self, sms: &SmsBackup) -> Result<SmsWrite, CoreError> {
        let thread_id = self.thread_id(&sms.address)?;
        self.ctx.mark_modified(thread_id);
        if sms_exists(&*self.store, sms)? {
            return Ok(SmsWrite::Duplicate);
        }
        self.store.insert(Table::Sms, &sms_row(sms, thread_id))?;
        Ok(SmsWrite::Inserted)
    }

    /// Writes at most `MAX_BATCH` messages with one existence query and one
    /// bulk insert. Threads of every offered message are marked modified.
    pub fn bulk_write_sms(&mut self, batch: &[SmsBackup]) -> Result<BulkWrite, CoreError> {
        let exist = bulk_sms_exist(&*self.store, batch)?;
        let mut rows: Vec<StoreRow> = Vec::with_capacity(batch.len());
        for (sms, exists) in batch.iter().zip(&exist) {
            let thread_id = self.thread_id(&sms.address)?;
            self.ctx.mark_modified(thread_id);
            if !exists {
                rows.push(sms_row(sms, thread_id));
            }
        }
        let duplicates = batch.len() - rows.len();
        debug!(
            new = rows.len(),
            existing = duplicates,
            "writing a batch of messages"
        );
        let inserted = if rows.is_empty() {
            0
        } else {
            self.store.bulk_insert(Table::Sms, &rows)?
        };
        Ok(BulkWrite { inserted, duplicates })
    }

    /// Message row, then its id, then parts, then addresses. Each step is
    /// existence-checked so a rerun completes a partially written message.
    pub fn write_mms(&mut self, mms: &MmsBackup) -> Result<MmsWrite, CoreError> {
        let address = match mms.thread_address() {
            Some(address) => address.to_string(),
            None => return Ok(MmsWrite::NoThreadAddress),
        };
        let thread_id = self.thread_id(&address)?;

        let mut message_inserted = false;
        if find_mms_id(&*self.store, mms, thread_id)?.is_none() {
            self.ctx.mark_modified(thread_id);
            self.store.insert(Table::Mms, &mms_row(mms, thread_id))?;
            message_inserted = true;
        }

        // the insert's return value is not trusted to be the message id
        let message_id = match find_mms_id(&*self.store, mms, thread_id)? {
            Some(id) => id,
            None => return Ok(MmsWrite::MissingMessageId { thread_id }),
        };

        let mut parts = Vec::with_capacity(mms.parts.len());
        for part in &mms.parts {
            parts.push(self.write_mms_part(part, message_id)?);
        }

        let mut addresses_inserted = 0;
        let mut addresses_existing = 0;
        for address in &mms.addresses {
            if self.write_mms_address(address, message_id)? {
                addresses_inserted += 1;
            } else {
                addresses_existing += 1;
            }
        }

        Ok(MmsWrite::Written(MmsWriteReport {
            thread_id,
            message_id,
            message_inserted,
            parts,
            addresses_inserted,
            addresses_existing,
        }))
    }

    fn write_mms_part(&mut self, part: &MmsPart, message_id: RowId) -> Result<PartWrite, CoreError> {
        if mms_part_exists(&*self.store, part, message_id)? {
            return Ok(PartWrite::Existing);
        }
        let part_id = self.store.insert(Table::Part, &part_row(part, message_id))?;
        if !part.is_non_text() {
            return Ok(PartWrite::Inserted);
        }
        let outcome = match part_id {
            Some(part_id) => self.write_part_payload(part, part_id),
            None => PartWrite::PayloadFailed {
                reason: "store returned no part id".to_string(),
            },
        };
        if let PartWrite::PayloadFailed { reason } = &outcome {
            warn!(message_id, content_type = %part.content_type, %reason, "part payload not written");
        }
        Ok(outcome)
    }

    fn write_part_payload(&mut self, part: &MmsPart, part_id: RowId) -> PartWrite {
        let encoded = match &part.data {
            Some(data) => data,
            None => {
                return PartWrite::PayloadFailed {
                    reason: "part has no payload".to_string(),
                }
            }
        };
        // payloads may be line-wrapped
        let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = match BASE64_STANDARD.decode(cleaned.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                return PartWrite::PayloadFailed {
                    reason: format!("payload is not base64: {}", err),
                }
            }
        };
        match self.store.write_part_data(part_id, &bytes) {
            Ok(()) => PartWrite::PayloadWritten { bytes: bytes.len() },
            Err(err) => PartWrite::PayloadFailed {
                reason: err.to_string(),
            },
        }
    }

    fn write_mms_address(&mut self, address: &MmsAddress, message_id: RowId) -> Result<bool, CoreError> {
        if mms_address_exists(&*self.store, address, message_id)? {
            return Ok(false);
        }
        self.store.insert(Table::Addr, &addr_row(address, message_id))?;
        Ok(true)
    }

    /// Repairs the last-message metadata of every thread touched so far and
    /// clears the set. Returns how many threads were repaired.
    pub fn fix_conversation_dates(&mut self) -> usize {
        let threads = std::mem::take(&mut self.ctx.modified_threads);
        debug!(threads = threads.len(), "fixing dates for conversations");
        let mut repaired = 0;
        for thread_id in threads {
            match self.store.update_thread_metadata(thread_id) {
                Ok(()) => repaired += 1,
                Err(err) => warn!(thread_id, error = %err, "thread metadata repair failed"),
            }
        }
        repaired
    }
}

fn sms_row(sms: &SmsBackup, thread_id: ThreadId) -> StoreRow {
    vec![
        ("sub_id", Value::from(sms.subscription_id)),
        ("address", Value::from(sms.address.clone())),
        ("body", opt_text(&sms.body)),
        ("date", Value::from(sms.date)),
        ("date_sent", Value::from(sms.date_sent)),
        ("locked", Value::from(sms.locked)),
        ("protocol", opt_text(&sms.protocol)),
        ("read", Value::from(sms.read)),
        ("status", Value::from(sms.status)),
        ("type", Value::from(sms.message_type)),
        ("service_center", opt_text(&sms.service_center)),
        ("thread_id", Value::from(thread_id)),
    ]
}

fn mms_row(mms: &MmsBackup, thread_id: ThreadId) -> StoreRow {
    vec![
        ("creator", opt_text(&mms.creator)),
        ("ct_t", opt_text(&mms.content_type)),
        ("d_rpt", Value::from(mms.delivery_report)),
        ("date", Value::from(mms.date)),
        ("date_sent", Value::from(mms.date_sent)),
        ("locked", Value::from(mms.locked)),
        ("m_type", Value::from(mms.message_type)),
        ("msg_box", Value::from(mms.message_box)),
        ("read", Value::from(mms.read)),
        ("rr", Value::from(mms.read_report)),
        ("seen", Value::from(mms.seen)),
        ("text_only", Value::from(mms.text_only)),
        ("st", opt_int(mms.status)),
        ("sub", opt_text(&mms.subject)),
        ("sub_cs", opt_int(mms.subject_charset)),
        ("sub_id", Value::from(mms.subscription_id)),
        ("tr_id", opt_text(&mms.transaction_id)),
        ("thread_id", Value::from(thread_id)),
    ]
}

fn part_row(part: &MmsPart, message_id: RowId) -> StoreRow {
    vec![
        ("cd", opt_text(&part.content_disposition)),
        ("chset", opt_text(&part.charset)),
        ("cid", opt_text(&part.content_id)),
        ("cl", opt_text(&part.content_location)),
        ("ct", Value::from(part.content_type.clone())),
        ("ctt_s", opt_text(&part.ct_start)),
        ("ctt_t", opt_text(&part.ct_type)),
        ("fn", opt_text(&part.filename)),
        ("name", opt_text(&part.name)),
        ("seq", Value::from(part.sequence)),
        ("text", opt_text(&part.text)),
        ("mid", Value::from(message_id)),
    ]
}

fn addr_row(address: &MmsAddress, message_id: RowId) -> StoreRow {
    vec![
        ("address", Value::from(address.address.clone())),
        ("type", Value::from(address.role)),
        ("charset", Value::from(address.charset)),
        ("msg_id", Value::from(message_id)),
    ]
}
