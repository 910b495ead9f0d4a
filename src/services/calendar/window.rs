use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::datetime::local_to_utc;
use super::ics::CalendarEvent;
use crate::error::{AppError, AppResult};
use crate::i18n;

/// Query-style options shared by every import entry point.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub include_past: bool,
    /// Local date `YYYY-MM-DD`; start of that day becomes the cutoff.
    pub from: Option<String>,
    /// Local date `YYYY-MM-DD`; end of that day (23:59:59) becomes the upper bound.
    pub to: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub dry_run: bool,
}

/// Accepts real booleans as well as the `1/true/yes` strings query strings carry.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => parse_flag(&s),
        None => false,
    })
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Resolved `[cutoff, upper]` bounds of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportWindow {
    pub cutoff: DateTime<Utc>,
    pub upper: Option<DateTime<Utc>>,
}

impl ImportWindow {
    /// Build the window for `options`, evaluated in `zone` at `now`.
    ///
    /// An explicit `from` wins over `include_past`; without either the cutoff
    /// is the start of today in `zone`.
    pub fn from_options(options: &ImportOptions, zone: Tz, now: DateTime<Utc>) -> AppResult<Self> {
        let from = options.from.as_deref().filter(|s| !s.trim().is_empty());
        let to = options.to.as_deref().filter(|s| !s.trim().is_empty());

        let cutoff = match from {
            Some(raw) => start_of_local_day(parse_local_date(raw)?, zone)?,
            None if options.include_past => DateTime::<Utc>::UNIX_EPOCH,
            None => start_of_local_day(now.with_timezone(&zone).date_naive(), zone)?,
        };

        let upper = match to {
            Some(raw) => Some(end_of_local_day(parse_local_date(raw)?, zone)?),
            None => None,
        };

        Ok(ImportWindow { cutoff, upper })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.cutoff && self.upper.map_or(true, |upper| instant <= upper)
    }
}

fn parse_local_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(i18n::t_with("calendar.invalid_date", &[("value", raw)]))
    })
}

pub fn start_of_local_day(date: NaiveDate, zone: Tz) -> AppResult<DateTime<Utc>> {
    local_to_utc(date.and_time(NaiveTime::MIN), zone)
        .ok_or_else(|| AppError::BadRequest(format!("Date out of range: {}", date)))
}

pub fn end_of_local_day(date: NaiveDate, zone: Tz) -> AppResult<DateTime<Utc>> {
    let end = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    local_to_utc(date.and_time(end), zone)
        .ok_or_else(|| AppError::BadRequest(format!("Date out of range: {}", date)))
}

/// Keep events whose resolved start lies inside `window`. Events without a
/// resolved start are dropped.
pub fn filter_for_import(events: Vec<CalendarEvent>, window: &ImportWindow) -> Vec<CalendarEvent> {
    events
        .into_iter()
        .filter(|event| match event.dtstart {
            Some(start) => {
                let keep = window.contains(start);
                if !keep {
                    debug!(
                        "Event {} at {} is outside the import window",
                        event.uid.as_deref().unwrap_or("(no uid)"),
                        start
                    );
                }
                keep
            }
            None => false,
        })
        .collect()
}
