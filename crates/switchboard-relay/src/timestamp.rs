//! Tolerant ISO-8601 parsing for message timestamps and cursors.
//!
//! Cursors arrive in query strings, where an unescaped `+` in the offset is
//! decoded to a space. A space directly before an `HH:MM` offset is read back
//! as `+`. A trailing `Z` means UTC. Timestamps without an offset are taken
//! as UTC.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

/// Parse `raw`, returning `None` when it is not a recognizable timestamp.
pub fn parse(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = restore_offset_sign(trimmed);
    let text = normalized.as_ref();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc().fixed_offset());
    }

    None
}

/// `2024-05-01T12:00:00 00:00` -> `2024-05-01T12:00:00+00:00`
fn restore_offset_sign(raw: &str) -> Cow<'_, str> {
    if let Some(idx) = raw.rfind(' ') {
        let (head, tail) = (&raw[..idx], &raw[idx + 1..]);
        if (head.contains('T') || head.contains(':')) && looks_like_offset(tail) {
            return Cow::Owned(format!("{}+{}", head, tail));
        }
    }
    Cow::Borrowed(raw)
}

fn looks_like_offset(s: &str) -> bool {
    let bytes = s.as_bytes();
    match bytes.len() {
        5 => {
            bytes[2] == b':'
                && bytes[..2].iter().all(u8::is_ascii_digit)
                && bytes[3..].iter().all(u8::is_ascii_digit)
        }
        4 => bytes.iter().all(u8::is_ascii_digit),
        _ => false,
    }
}
