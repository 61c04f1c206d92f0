//! Module dedicated to message envelopes.
//!
//! An envelope is the lightweight view of a message the synchronizer
//! works with: its identity on one side, its content identity, its
//! flags and its size. The raw content is only fetched when a message
//! needs to be copied.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, TimeZone};
use mail_parser::{Message, MessageParser};
use tracing::{trace, warn};

use crate::flag::Flags;

/// Alias for a message identity on one side.
///
/// For the IMAP side it is the stringified UID, for the Maildir side
/// it is the unique part of the file name.
pub type Id = String;

/// Alias for an envelope hash map where the key is its identity.
pub type Envelopes = HashMap<Id, Envelope>;

/// The message envelope.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Envelope {
    /// The identity of the message on its side.
    pub id: Id,

    /// The content identity, used to match messages across both
    /// sides when no UID correlation can be trusted.
    pub content_id: String,

    /// The message flags.
    pub flags: Flags,

    /// The message size, in bytes.
    pub size: u64,

    /// The date of the message, from its `Date` header.
    pub date: Option<DateTime<FixedOffset>>,
}

impl Envelope {
    /// Builds an envelope from the message headers.
    pub fn from_headers(id: impl ToString, flags: Flags, size: u64, headers: &[u8]) -> Self {
        let headers = header_block(headers);
        let msg = MessageParser::new().parse(headers);

        Self {
            id: id.to_string(),
            content_id: parsed_content_id(msg.as_ref(), headers),
            flags,
            size,
            date: msg.as_ref().and_then(Message::date).and_then(parse_date),
        }
    }

    /// Returns `true` if the message is dated before the given date.
    /// Undated messages are never considered older.
    pub fn is_older_than(&self, date: &DateTime<FixedOffset>) -> bool {
        matches!(&self.date, Some(own) if own < date)
    }
}

/// The snapshot of one folder's messages, as of listing time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    /// The UID validity of the folder. Only the IMAP side has one.
    pub uid_validity: Option<u32>,

    /// The envelopes of the folder, indexed by identity.
    pub envelopes: Envelopes,
}

impl Snapshot {
    pub fn new(uid_validity: Option<u32>, envelopes: impl IntoIterator<Item = Envelope>) -> Self {
        Self {
            uid_validity,
            envelopes: envelopes
                .into_iter()
                .map(|envelope| (envelope.id.clone(), envelope))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

/// Computes the content identity of a message out of its headers.
///
/// The Message-ID header is used when present. Otherwise the identity
/// falls back to the MD5 digest of the header block, with carriage
/// returns stripped so that line ending conversions made by IMAP
/// servers do not change it.
pub fn content_id(headers: &[u8]) -> String {
    let headers = header_block(headers);
    let msg = MessageParser::new().parse(headers);
    parsed_content_id(msg.as_ref(), headers)
}

fn parsed_content_id(msg: Option<&Message>, headers: &[u8]) -> String {
    let message_id = msg
        .and_then(|msg| msg.message_id().map(|id| id.trim().to_owned()))
        .filter(|id| !id.is_empty());

    match message_id {
        Some(id) => format!("<{id}>"),
        None => {
            trace!("no message id found, computing digest of headers");
            let headers: Vec<u8> = headers.iter().copied().filter(|b| *b != b'\r').collect();
            format!("{:x}", md5::compute(headers))
        }
    }
}

/// Transforms a [`mail_parser::DateTime`] into a fixed offset
/// [`chrono::DateTime`].
fn parse_date(date: &mail_parser::DateTime) -> Option<DateTime<FixedOffset>> {
    let tz_secs = (date.tz_hour as i32) * 3600 + (date.tz_minute as i32) * 60;
    let tz_sign = if date.tz_before_gmt { -1 } else { 1 };

    let Some(tz) = FixedOffset::east_opt(tz_sign * tz_secs) else {
        warn!("invalid timezone seconds {tz_secs}, ignoring date {date}");
        return None;
    };

    let date = tz
        .with_ymd_and_hms(
            date.year as i32,
            date.month as u32,
            date.day as u32,
            date.hour as u32,
            date.minute as u32,
            date.second as u32,
        )
        .earliest();

    if date.is_none() {
        trace!("cannot parse message date, ignoring it");
    }

    date
}

/// Returns the header block of a raw message, including the blank
/// line separating it from the body.
pub fn header_block(raw: &[u8]) -> &[u8] {
    let mut line_start = 0;

    for (i, byte) in raw.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }

        let line = &raw[line_start..i];
        if line.is_empty() || line == b"\r" {
            return &raw[..=i];
        }

        line_start = i + 1;
    }

    raw
}

#[cfg(test)]
mod tests {
    #[test]
    fn content_id_from_message_id() {
        let raw = b"Message-ID: <abc@localhost>\r\nSubject: hello\r\n\r\nbody\r\n";
        assert_eq!(super::content_id(raw), "<abc@localhost>");
    }

    #[test]
    fn content_id_digest_ignores_line_endings() {
        let crlf = b"From: alice@localhost\r\nSubject: hello\r\n\r\nbody\r\n";
        let lf = b"From: alice@localhost\nSubject: hello\n\nother body\n";
        assert_eq!(super::content_id(crlf), super::content_id(lf));
    }

    #[test]
    fn date_from_header() {
        let raw = b"Date: Tue, 1 Jul 2003 10:52:37 +0200\r\nSubject: hello\r\n\r\n";
        let envelope = super::Envelope::from_headers("1", Default::default(), 0, raw);

        let date = chrono::DateTime::parse_from_rfc3339("2003-07-01T10:52:37+02:00").unwrap();
        assert_eq!(envelope.date, Some(date));
        assert!(envelope.is_older_than(&(date + chrono::Duration::seconds(1))));
        assert!(!envelope.is_older_than(&date));

        let undated = super::Envelope::from_headers("2", Default::default(), 0, b"\r\n");
        assert_eq!(undated.date, None);
        assert!(!undated.is_older_than(&date));
    }

    #[test]
    fn header_block_stops_at_blank_line() {
        let raw = b"Subject: hello\n\nbody\n";
        assert_eq!(super::header_block(raw), b"Subject: hello\n\n");
    }
}
