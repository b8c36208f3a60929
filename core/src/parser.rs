use std::io::BufRead;

use crate::config::ImportConfig;
use crate::error::CoreError;
use crate::models::BackupRecord;

#[path = "parser/json.rs"]
mod json;
#[path = "parser/xml.rs"]
mod xml;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const XML_DECL_PREFIX: &[u8] = b"<?xml";

/// The two supported backup encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    /// Streaming `<smses>` document, SMS only.
    Xml,
    /// A single JSON array of tagged SMS and MMS records.
    Json,
}

impl BackupFormat {
    /// Picks a decoder from the declared MIME type, falling back to the
    /// first bytes of the stream.
    pub fn detect(content_type: Option<&str>, head: &[u8]) -> Self {
        if let Some(ct) = content_type {
            let ct = ct.trim();
            if ct.eq_ignore_ascii_case("application/xml") || ct.eq_ignore_ascii_case("text/xml") {
                return BackupFormat::Xml;
            }
        }
        let head = head.strip_prefix(UTF8_BOM).unwrap_or(head);
        if head.starts_with(XML_DECL_PREFIX) {
            BackupFormat::Xml
        } else {
            BackupFormat::Json
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupFormat::Xml => "xml",
            BackupFormat::Json => "json",
        }
    }
}

/// A streaming record whose attributes could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDecodeError {
    /// Position among the root's direct children.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug)]
pub struct ParsedBackup {
    pub format: BackupFormat,
    pub records: Vec<BackupRecord>,
    pub decode_failures: Vec<RecordDecodeError>,
    /// Streaming tags ignored at any depth.
    pub skipped_tags: usize,
}

impl ParsedBackup {
    fn new(format: BackupFormat) -> Self {
        Self {
            format,
            records: Vec::new(),
            decode_failures: Vec::new(),
            skipped_tags: 0,
        }
    }
}

pub fn parse_backup<R: BufRead>(
    mut reader: R,
    content_type: Option<&str>,
    config: &ImportConfig,
) -> Result<ParsedBackup, CoreError> {
    let format = {
        let head = reader.fill_buf()?;
        BackupFormat::detect(content_type, head)
    };
    match format {
        BackupFormat::Xml => xml::parse_xml(reader, config),
        BackupFormat::Json => json::parse_json(reader),
    }
}
