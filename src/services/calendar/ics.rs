//! Minimal RFC 5545 reader: unfolds content lines, collects VEVENT blocks and
//! resolves their timestamps. Only the properties the studio imports are kept.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, warn};

use super::datetime::{resolve_date_time, DateShape};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub uid: Option<String>,
    pub summary: String,
    pub description: String,
    pub location: String,
    /// Upper-cased STATUS value (`CONFIRMED`, `TENTATIVE`, `CANCELLED`).
    pub status: Option<String>,
    pub dtstart: Option<DateTime<Utc>>,
    pub dtend: Option<DateTime<Utc>>,
    pub all_day: bool,
    /// Raw DTSTART value, kept for skip diagnostics.
    #[serde(skip)]
    pub raw_dtstart: Option<String>,
}

impl CalendarEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("CANCELLED")
    }
}

/// One unfolded `NAME;PARAM=VALUE:value` line.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentLine {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl ContentLine {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Join folded lines: a line starting with a space or tab continues the previous one.
pub fn unfold_lines(text: &str) -> Vec<String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines: Vec<String> = Vec::new();

    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(line.to_string());
    }

    lines
}

/// Split a content line at the first `:` outside a quoted parameter value.
/// Returns `None` for lines without a value separator.
pub fn parse_content_line(line: &str) -> Option<ContentLine> {
    let mut in_quotes = false;
    let mut colon = None;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut parts = split_unquoted(head, ';').into_iter();
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }

    let params = parts
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            Some((
                k.trim().to_ascii_uppercase(),
                v.trim().trim_matches('"').to_string(),
            ))
        })
        .collect();

    Some(ContentLine {
        name,
        params,
        value: value.to_string(),
    })
}

fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in s.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == sep && !in_quotes {
            out.push(&s[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    out.push(&s[start..]);
    out
}

/// Undo TEXT escaping: `\n`/`\N`, `\,`, `\;` and `\\`. Unknown escapes are kept as-is.
pub fn decode_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(',') => out.push(','),
            Some(';') => out.push(';'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse a DURATION value (`P1W`, `PT1H30M`, `-P1D`, ...).
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (negative, rest) = match raw.as_bytes().first()? {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };
    let rest = rest.strip_prefix('P')?;

    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_component = false;

    for ch in rest.chars() {
        match ch {
            '0'..='9' => number.push(ch),
            'T' if number.is_empty() && !in_time => in_time = true,
            'W' | 'D' | 'H' | 'M' | 'S' => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                saw_component = true;
                let part = match (ch, in_time) {
                    ('W', false) => Duration::try_weeks(n),
                    ('D', false) => Duration::try_days(n),
                    ('H', true) => Duration::try_hours(n),
                    ('M', true) => Duration::try_minutes(n),
                    ('S', true) => Duration::try_seconds(n),
                    _ => None,
                }?;
                // Out-of-range values make the whole DURATION unusable.
                total = total.checked_add(&part)?;
            }
            _ => return None,
        }
    }

    if !saw_component || !number.is_empty() {
        return None;
    }
    Some(if negative { -total } else { total })
}

#[derive(Default)]
struct EventBuilder {
    event: CalendarEvent,
    has_dtend: bool,
    duration: Option<Duration>,
}

impl EventBuilder {
    fn apply(&mut self, line: &ContentLine, default_zone: Tz) {
        match line.name.as_str() {
            "UID" => {
                let uid = decode_text(&line.value).trim().to_string();
                self.event.uid = (!uid.is_empty()).then_some(uid);
            }
            "SUMMARY" => self.event.summary = decode_text(&line.value),
            "DESCRIPTION" => self.event.description = decode_text(&line.value),
            "LOCATION" => self.event.location = decode_text(&line.value),
            "STATUS" => self.event.status = Some(line.value.trim().to_ascii_uppercase()),
            "DTSTART" => {
                self.event.raw_dtstart = Some(line.value.trim().to_string());
                self.event.dtstart =
                    resolve_date_time(&line.value, line.param("TZID"), default_zone);
                self.event.all_day = line
                    .param("VALUE")
                    .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
                    || DateShape::detect(line.value.trim()) == Some(DateShape::AllDay);
            }
            "DTEND" => {
                self.has_dtend = true;
                self.event.dtend =
                    resolve_date_time(&line.value, line.param("TZID"), default_zone);
            }
            "DURATION" => self.duration = parse_duration(&line.value),
            _ => {}
        }
    }

    fn build(mut self) -> CalendarEvent {
        // DURATION only stands in for a missing DTEND, never for an unparseable one.
        if !self.has_dtend {
            if let (Some(start), Some(duration)) = (self.event.dtstart, self.duration) {
                self.event.dtend = start.checked_add_signed(duration);
            }
        }
        self.event
    }
}

/// Parse raw iCalendar text into events, in source order.
///
/// Properties outside VEVENT blocks and inside nested components (VALARM)
/// are ignored. A VEVENT without `END:VEVENT` is discarded.
pub fn parse_calendar_text(text: &str, default_zone: Tz) -> Vec<CalendarEvent> {
    let mut events = Vec::new();
    let mut current: Option<EventBuilder> = None;
    let mut nested_depth = 0usize;

    for line in unfold_lines(text) {
        let Some(line) = parse_content_line(&line) else {
            continue;
        };

        match line.name.as_str() {
            "BEGIN" if line.value.trim().eq_ignore_ascii_case("VEVENT") => {
                if current.is_some() {
                    warn!("VEVENT opened before the previous one was closed; discarding the open event");
                }
                current = Some(EventBuilder::default());
                nested_depth = 0;
            }
            "BEGIN" => {
                if current.is_some() {
                    nested_depth += 1;
                }
            }
            "END" if nested_depth > 0 => nested_depth -= 1,
            "END" if line.value.trim().eq_ignore_ascii_case("VEVENT") => {
                if let Some(builder) = current.take() {
                    events.push(builder.build());
                }
            }
            "END" => {}
            _ => {
                if nested_depth == 0 {
                    if let Some(builder) = current.as_mut() {
                        builder.apply(&line, default_zone);
                    }
                }
            }
        }
    }

    if current.is_some() {
        warn!("Calendar text ended inside a VEVENT; the unterminated event was discarded");
    }
    debug!("Parsed {} VEVENT blocks", events.len());

    events
}
