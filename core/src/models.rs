use serde::{Deserialize, Serialize};

pub type ThreadId = i64;
pub type RowId = i64;

/// MMS PDU header codes used as address roles.
pub mod pdu {
    pub const BCC: i32 = 0x81;
    pub const CC: i32 = 0x82;
    pub const FROM: i32 = 0x89;
    pub const TO: i32 = 0x97;
}

/// MMS message box classification.
pub mod message_box {
    pub const ALL: i32 = 0;
    pub const INBOX: i32 = 1;
    pub const SENT: i32 = 2;
    pub const DRAFTS: i32 = 3;
    pub const OUTBOX: i32 = 4;
    pub const FAILED: i32 = 5;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backupType", rename_all = "lowercase")]
pub enum BackupRecord {
    Sms(SmsBackup),
    Mms(MmsBackup),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsBackup {
    #[serde(rename = "sub_id")]
    pub subscription_id: i64,
    pub address: String,
    pub body: Option<String>,
    /// Received timestamp; part of the dedup identity.
    pub date: i64,
    pub date_sent: i64,
    pub locked: i32,
    pub protocol: Option<String>,
    pub read: i32,
    pub status: i32,
    #[serde(rename = "type")]
    pub message_type: i32,
    pub service_center: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmsBackup {
    pub creator: Option<String>,
    #[serde(rename = "ct_t")]
    pub content_type: Option<String>,
    #[serde(rename = "d_rpt")]
    pub delivery_report: i32,
    pub date: i64,
    pub date_sent: i64,
    pub locked: i32,
    #[serde(rename = "m_type")]
    pub message_type: i32,
    #[serde(rename = "msg_box")]
    pub message_box: i32,
    pub read: i32,
    #[serde(rename = "rr")]
    pub read_report: i32,
    pub seen: i32,
    pub text_only: i32,
    #[serde(rename = "st")]
    pub status: Option<i32>,
    #[serde(rename = "sub")]
    pub subject: Option<String>,
    #[serde(rename = "sub_cs")]
    pub subject_charset: Option<i32>,
    #[serde(rename = "sub_id")]
    pub subscription_id: i64,
    #[serde(rename = "tr_id")]
    pub transaction_id: Option<String>,
    pub addresses: Vec<MmsAddress>,
    pub parts: Vec<MmsPart>,
}

impl MmsBackup {
    /// The address a thread is keyed on: the sender for inbox messages,
    /// the first recipient otherwise.
    pub fn thread_address(&self) -> Option<&str> {
        let role = if self.message_box == message_box::INBOX {
            pdu::FROM
        } else {
            pdu::TO
        };
        self.addresses
            .iter()
            .find(|addr| addr.role == role)
            .map(|addr| addr.address.as_str())
            .filter(|addr| !addr.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmsPart {
    #[serde(rename = "cd")]
    pub content_disposition: Option<String>,
    #[serde(rename = "chset")]
    pub charset: Option<String>,
    #[serde(rename = "cid")]
    pub content_id: Option<String>,
    #[serde(rename = "cl")]
    pub content_location: Option<String>,
    #[serde(rename = "ct")]
    pub content_type: String,
    #[serde(rename = "ctt_s")]
    pub ct_start: Option<String>,
    #[serde(rename = "ctt_t")]
    pub ct_type: Option<String>,
    #[serde(rename = "fn")]
    pub filename: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "seq")]
    pub sequence: i32,
    pub text: Option<String>,
    /// Base64 payload for non-text parts.
    pub data: Option<String>,
}

impl MmsPart {
    pub fn is_non_text(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        !(ct.starts_with("text/") || ct == "application/smil")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmsAddress {
    pub address: String,
    #[serde(rename = "type")]
    pub role: i32,
    pub charset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportOutcome {
    NothingNew,
    Ok,
    Partial,
    Fail,
}

impl ImportOutcome {
    pub fn from_counts(imported: u64, failed: u64) -> Self {
        match (imported, failed) {
            (0, 0) => ImportOutcome::NothingNew,
            (_, 0) => ImportOutcome::Ok,
            (0, _) => ImportOutcome::Fail,
            _ => ImportOutcome::Partial,
        }
    }

    pub fn summary(self) -> ImportSummary {
        match self {
            ImportOutcome::NothingNew => ImportSummary::NothingNew,
            ImportOutcome::Ok => ImportSummary::Succeeded,
            ImportOutcome::Partial => ImportSummary::PartiallyFailed,
            ImportOutcome::Fail => ImportSummary::Failed,
        }
    }
}

/// The one notification a caller shows per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSummary {
    NothingNew,
    Succeeded,
    PartiallyFailed,
    Failed,
    InvalidFormat,
}

impl ImportSummary {
    pub fn message(self) -> &'static str {
        match self {
            ImportSummary::NothingNew => "No new entries to import",
            ImportSummary::Succeeded => "Messages imported successfully",
            ImportSummary::PartiallyFailed => "Importing some entries failed",
            ImportSummary::Failed => "Importing failed",
            ImportSummary::InvalidFormat => "Invalid file format",
        }
    }
}
