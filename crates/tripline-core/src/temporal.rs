//! Lenient date parsing for email headers and AI-extracted booking times.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse an email `Date:` header value.
///
/// Accepts RFC 2822 (with or without a trailing `(UTC)`-style comment),
/// RFC 3339, and `YYYY-MM-DD HH:MM:SS` interpreted as UTC.
pub fn parse_email_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_comment = match trimmed.rfind(" (") {
        Some(idx) if trimmed.ends_with(')') => &trimmed[..idx],
        _ => trimmed,
    };

    if let Ok(dt) = DateTime::parse_from_rfc2822(without_comment) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(without_comment) {
        return Some(dt.with_timezone(&Utc));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(without_comment, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a booking date-time as written by the model.
///
/// Booking times are local to the place they happen, so offsets are
/// dropped. A bare date parses as midnight.
pub fn parse_booking_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_full_datetime(trimmed)
        .or_else(|| parse_booking_date(trimmed).map(|d| d.and_time(NaiveTime::MIN)))
}

fn parse_full_datetime(trimmed: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

/// Parse a calendar date, accepting a date-time and keeping its date part.
pub fn parse_booking_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }
    parse_full_datetime(trimmed).map(|dt| dt.date())
}
