//! Resolution of iCalendar DATE / DATE-TIME values to UTC instants.
//!
//! Three value shapes are recognised, each with its own resolver:
//!
//! - `YYYYMMDDTHHMMSSZ`: absolute UTC time, any TZID is ignored.
//! - `YYYYMMDD`: all-day date, local midnight in the TZID (or default) zone.
//! - `YYYYMMDDTHHMMSS`: floating local time in the TZID (or default) zone.
//!
//! Anything else resolves to `None`. Callers skip such events; a timestamp is
//! never replaced by the current time.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateShape {
    Utc,
    AllDay,
    Floating,
}

impl DateShape {
    /// Detect the shape of a raw property value without parsing its fields.
    pub fn detect(raw: &str) -> Option<Self> {
        let b = raw.as_bytes();
        let digits = |range: std::ops::Range<usize>| b[range].iter().all(u8::is_ascii_digit);

        match b.len() {
            8 if digits(0..8) => Some(DateShape::AllDay),
            15 if digits(0..8) && b[8] == b'T' && digits(9..15) => Some(DateShape::Floating),
            16 if digits(0..8)
                && b[8] == b'T'
                && digits(9..15)
                && (b[15] == b'Z' || b[15] == b'z') =>
            {
                Some(DateShape::Utc)
            }
            _ => None,
        }
    }

    fn resolve(self, raw: &str, zone: Tz) -> Option<DateTime<Utc>> {
        match self {
            DateShape::Utc => NaiveDateTime::parse_from_str(&raw[..15], "%Y%m%dT%H%M%S")
                .ok()
                .map(|naive| naive.and_utc()),
            DateShape::AllDay => NaiveDate::parse_from_str(raw, "%Y%m%d")
                .ok()
                .and_then(|date| local_to_utc(date.and_time(NaiveTime::MIN), zone)),
            DateShape::Floating => NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S")
                .ok()
                .and_then(|naive| local_to_utc(naive, zone)),
        }
    }
}

/// Resolve a raw DTSTART/DTEND value to an absolute instant.
///
/// `tzid` is the raw TZID parameter, if any. Unknown zone names fall back to
/// `default_zone` with a warning.
pub fn resolve_date_time(raw: &str, tzid: Option<&str>, default_zone: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let shape = DateShape::detect(raw)?;

    let zone = match tzid {
        Some(name) => resolve_tzid(name).unwrap_or_else(|| {
            warn!(
                "Unknown TZID '{}', interpreting '{}' in {}",
                name,
                raw,
                default_zone.name()
            );
            default_zone
        }),
        None => default_zone,
    };

    shape.resolve(raw, zone)
}

/// Convert a wall-clock time in `zone` to UTC using the zone's real rules.
///
/// Follows RFC 5545 3.3.5: a time that occurs twice (DST fall back) means the
/// first occurrence; a time inside a spring-forward gap is read with the offset
/// in force before the gap.
pub fn local_to_utc(naive: NaiveDateTime, zone: Tz) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // Transitions are months apart, so a day earlier is safely before the gap.
            let before_gap = naive.checked_sub_signed(Duration::days(1))?;
            let offset_secs = zone
                .offset_from_utc_datetime(&before_gap)
                .fix()
                .local_minus_utc();
            naive
                .checked_sub_signed(Duration::seconds(i64::from(offset_secs)))
                .map(|utc| utc.and_utc())
        }
    }
}

/// Render an instant as wall-clock time in `zone`.
pub fn utc_to_local(instant: DateTime<Utc>, zone: Tz) -> NaiveDateTime {
    instant.with_timezone(&zone).naive_local()
}

/// Map a TZID parameter value to an IANA zone.
///
/// Accepts plain IANA names (optionally quoted), vendor-prefixed names such as
/// `/mozilla.org/20050126_1/Europe/Vienna`, and the Windows names Outlook and
/// Exchange emit.
pub fn resolve_tzid(raw: &str) -> Option<Tz> {
    let name = raw.trim().trim_matches('"').trim();
    if name.is_empty() {
        return None;
    }

    if let Ok(tz) = name.parse::<Tz>() {
        return Some(tz);
    }

    if let Some(tz) = windows_zone(name) {
        return Some(tz);
    }

    // Vendor prefixes: try every suffix after a '/' until one is a known zone.
    name.match_indices('/')
        .map(|(idx, _)| &name[idx + 1..])
        .find_map(|suffix| suffix.parse::<Tz>().ok())
}

fn windows_zone(name: &str) -> Option<Tz> {
    use chrono_tz::{America, Europe};

    let tz = match name {
        "W. Europe Standard Time" => Europe::Berlin,
        "Central Europe Standard Time" => Europe::Budapest,
        "Central European Standard Time" => Europe::Warsaw,
        "Romance Standard Time" => Europe::Paris,
        "GMT Standard Time" => Europe::London,
        "E. Europe Standard Time" => Europe::Chisinau,
        "FLE Standard Time" => Europe::Helsinki,
        "Eastern Standard Time" => America::New_York,
        "Pacific Standard Time" => America::Los_Angeles,
        "UTC" | "Coordinated Universal Time" => Tz::UTC,
        _ => return None,
    };
    Some(tz)
}
