use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use super::ics::CalendarEvent;

pub const PLACEHOLDER_CLIENT_NAME: &str = "Imported Client";
const DEFAULT_TITLE: &str = "Imported session";
const MAX_READABLE_ID_LEN: usize = 64;
const UID_HASH_LEN: usize = 16;

lazy_static! {
    /// `Kunde: Anna Maier`, `client: ...`, `für: ...`
    static ref LABELLED_NAME: Regex =
        Regex::new(r"(?i)\b(?:client|kunde|kundin|with|mit|für|fuer)\s*:\s*([^\n,;:]+)")
            .expect("valid labelled-name regex");
    /// `Familienshooting mit Müller`, `Session with Jane Doe`
    static ref PREPOSITION_NAME: Regex = Regex::new(
        r"\b(?i:mit|with|für|fuer)\s+(\p{Lu}[\p{L}'\-]+(?:\s+\p{Lu}[\p{L}'\-]+)?)"
    )
    .expect("valid preposition-name regex");
    /// Two capitalised words, e.g. `Anna Maier`.
    static ref TWO_WORD_NAME: Regex =
        Regex::new(r"\b(\p{Lu}\p{Ll}+\s+\p{Lu}\p{Ll}+)\b").expect("valid two-word-name regex");
}

/// A calendar event ready to be persisted as a studio session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSession {
    pub id: String,
    pub ical_uid: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub location: String,
    pub client_name_guess: String,
}

/// Per-run state for ids of events that carry no UID.
#[derive(Debug)]
pub struct ImportRun {
    run_id: Uuid,
    counter: u32,
}

impl Default for ImportRun {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportRun {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            counter: 0,
        }
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        let run = self.run_id.simple().to_string();
        format!("import-{}-{}", &run[..8], self.counter)
    }

    /// Convert `event` into a session. Returns `None` when either bound is
    /// unresolved or the end lies before the start.
    pub fn to_normalized_session(&mut self, event: &CalendarEvent) -> Option<NormalizedSession> {
        let start_time = event.dtstart?;
        let end_time = event.dtend?;
        if end_time < start_time {
            return None;
        }

        let ical_uid = event.uid.clone().filter(|u| !u.is_empty());
        let id = match ical_uid.as_deref() {
            Some(uid) => session_id_for_uid(uid),
            None => self.next_id(),
        };

        let title = match event.summary.trim() {
            "" => DEFAULT_TITLE.to_string(),
            s => s.to_string(),
        };

        Some(NormalizedSession {
            id,
            ical_uid,
            start_time,
            end_time,
            title,
            description: event.description.clone(),
            location: event.location.clone(),
            client_name_guess: guess_client_name(&event.description, &event.summary),
        })
    }
}

/// Keep ASCII alphanumerics, `_` and `-`.
pub fn sanitize_id(uid: &str) -> String {
    uid.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Stable session id for a UID: the sanitized UID plus a name-based hash of
/// the raw UID, so UIDs that sanitize alike (`a@b`, `ab`) stay distinct.
pub fn session_id_for_uid(uid: &str) -> String {
    let hash = Uuid::new_v5(&Uuid::NAMESPACE_URL, uid.as_bytes())
        .simple()
        .to_string();
    let readable: String = sanitize_id(uid).chars().take(MAX_READABLE_ID_LEN).collect();
    if readable.is_empty() {
        format!("uid-{}", &hash[..UID_HASH_LEN])
    } else {
        format!("{}-{}", readable, &hash[..UID_HASH_LEN])
    }
}

/// Best-effort client name from free text. Each pattern is tried against the
/// description, then the summary; the first hit wins.
pub fn guess_client_name(description: &str, summary: &str) -> String {
    let patterns: [&Regex; 3] = [&LABELLED_NAME, &PREPOSITION_NAME, &TWO_WORD_NAME];

    for re in patterns {
        for text in [description, summary] {
            if let Some(name) = re.captures(text).and_then(|c| c.get(1)) {
                let name = name.as_str().trim();
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }
    PLACEHOLDER_CLIENT_NAME.to_string()
}
