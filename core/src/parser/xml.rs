use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;
use std::str::FromStr;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::config::ImportConfig;
use crate::error::CoreError;
use crate::models::{BackupRecord, SmsBackup};

use super::{BackupFormat, ParsedBackup, RecordDecodeError};

const ROOT_TAG: &[u8] = b"smses";
const SMS_TAG: &[u8] = b"sms";

fn format_error(err: quick_xml::Error) -> CoreError {
    CoreError::InvalidFormat(err.to_string())
}

pub(super) fn parse_xml<R: BufRead>(input: R, config: &ImportConfig) -> Result<ParsedBackup, CoreError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();
    let mut parsed = ParsedBackup::new(BackupFormat::Xml);

    let root_is_empty = loop {
        buf.clear();
        match reader.read_event_into(&mut buf).map_err(format_error)? {
            Event::Start(e) => {
                require_root(&e)?;
                break false;
            }
            Event::Empty(e) => {
                require_root(&e)?;
                break true;
            }
            Event::Eof => {
                return Err(CoreError::InvalidFormat("document has no root element".to_string()));
            }
            _ => {}
        }
    };
    if root_is_empty {
        return Ok(parsed);
    }

    let mut index = 0usize;
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).map_err(format_error)? {
            Event::Start(e) => {
                handle_child(&e, index, config, &mut parsed);
                parsed.skipped_tags += skip_subtree(&mut reader, &mut skip_buf)?;
                index += 1;
            }
            Event::Empty(e) => {
                handle_child(&e, index, config, &mut parsed);
                index += 1;
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(CoreError::InvalidFormat("unexpected end of document inside <smses>".to_string()));
            }
            _ => {}
        }
    }
    debug!(
        records = parsed.records.len(),
        failed = parsed.decode_failures.len(),
        skipped = parsed.skipped_tags,
        "parsed xml backup"
    );
    Ok(parsed)
}

fn require_root(e: &BytesStart) -> Result<(), CoreError> {
    if e.name().as_ref() == ROOT_TAG {
        Ok(())
    } else {
        Err(CoreError::InvalidFormat(format!(
            "expected <smses> root, found <{}>",
            String::from_utf8_lossy(e.name().as_ref())
        )))
    }
}

fn handle_child(e: &BytesStart, index: usize, config: &ImportConfig, parsed: &mut ParsedBackup) {
    if e.name().as_ref() != SMS_TAG || !config.import_sms {
        parsed.skipped_tags += 1;
        return;
    }
    match read_sms(e) {
        Ok(sms) => parsed.records.push(BackupRecord::Sms(sms)),
        Err(reason) => parsed.decode_failures.push(RecordDecodeError { index, reason }),
    }
}

/// Consumes everything up to the end tag matching an already-read start tag
/// and returns how many elements were inside.
fn skip_subtree<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<usize, CoreError> {
    let mut depth = 1usize;
    let mut nested = 0usize;
    while depth != 0 {
        buf.clear();
        match reader.read_event_into(buf).map_err(format_error)? {
            Event::Start(_) => {
                depth += 1;
                nested += 1;
            }
            Event::Empty(_) => nested += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => {
                return Err(CoreError::InvalidFormat("unbalanced element".to_string()));
            }
            _ => {}
        }
    }
    Ok(nested)
}

struct Attributes(HashMap<String, String>);

impl Attributes {
    fn read(e: &BytesStart) -> Result<Self, String> {
        let mut values = HashMap::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| err.to_string())?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let raw = std::str::from_utf8(&attr.value)
                .map_err(|err| format!("attribute '{}' is not utf-8: {}", key, err))?;
            let joined = join_surrogate_refs(raw);
            let value = unescape(&joined).map_err(|err| err.to_string())?;
            values.insert(key, value.into_owned());
        }
        Ok(Attributes(values))
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }

    fn required(&self, name: &str) -> Result<String, String> {
        self.optional(name)
            .ok_or_else(|| format!("missing attribute '{}'", name))
    }

    fn number<T: FromStr>(&self, name: &str) -> Result<T, String> {
        let raw = self.required(name)?;
        raw.trim()
            .parse()
            .map_err(|_| format!("attribute '{}' is not a number: {:?}", name, raw))
    }
}

/// Backup writers emit characters outside the BMP as two UTF-16 surrogate
/// references (`&#55357;&#56832;`), which are not valid XML code points.
/// Pairs are joined into the real character; a lone half becomes U+FFFD.
fn join_surrogate_refs(raw: &str) -> Cow<'_, str> {
    if !raw.contains("&#") {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("&#") {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let (code, len) = match char_ref(rest) {
            Some(found) => found,
            None => {
                out.push_str("&#");
                rest = &rest[2..];
                continue;
            }
        };
        match code {
            0xD800..=0xDBFF => match char_ref(&rest[len..]) {
                Some((low @ 0xDC00..=0xDFFF, low_len)) => {
                    let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                    out.push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                    rest = &rest[len + low_len..];
                }
                _ => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    rest = &rest[len..];
                }
            },
            0xDC00..=0xDFFF => {
                out.push(char::REPLACEMENT_CHARACTER);
                rest = &rest[len..];
            }
            _ => {
                out.push_str(&rest[..len]);
                rest = &rest[len..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Parses a numeric character reference at the start of `s`, returning the
/// code and the reference's length including `&#` and `;`.
fn char_ref(s: &str) -> Option<(u32, usize)> {
    let body = s.strip_prefix("&#")?;
    let end = body.find(';')?;
    let digits = &body[..end];
    let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    Some((code, end + 3))
}

fn read_sms(e: &BytesStart) -> Result<SmsBackup, String> {
    let attrs = Attributes::read(e)?;
    let date: i64 = attrs.number("date")?;
    Ok(SmsBackup {
        subscription_id: 0,
        address: attrs.required("address")?,
        body: attrs.optional("body"),
        date,
        date_sent: date,
        locked: attrs.number("locked")?,
        protocol: attrs.optional("protocol"),
        read: attrs.number("read")?,
        status: attrs.number("status")?,
        message_type: attrs.number("type")?,
        service_center: attrs.optional("service_center"),
    })
}
