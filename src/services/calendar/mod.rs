//! Calendar import: ICS text (uploaded or fetched) -> windowed, normalized
//! sessions -> idempotent upserts.

pub mod datetime;
pub mod fetch;
pub mod ics;
pub mod normalize;
pub mod window;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::CalendarConfig;
use crate::db::{SessionRepository, UpsertSession};
use crate::error::AppResult;

pub use fetch::{IcsFetchError, IcsFetcher};
pub use ics::{parse_calendar_text, CalendarEvent};
pub use normalize::{ImportRun, NormalizedSession};
pub use window::{filter_for_import, ImportOptions, ImportWindow};

/// Persistence hand-off for imported sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or update `session`, keyed by its iCalendar UID when present.
    async fn upsert(&self, session: &NormalizedSession) -> AppResult<()>;
}

#[async_trait]
impl SessionStore for SqlitePool {
    async fn upsert(&self, session: &NormalizedSession) -> AppResult<()> {
        SessionRepository::upsert(self, UpsertSession::from(session)).await?;
        Ok(())
    }
}

impl From<&NormalizedSession> for UpsertSession {
    fn from(session: &NormalizedSession) -> Self {
        UpsertSession {
            id: session.id.clone(),
            ical_uid: session.ical_uid.clone(),
            start_time: session.start_time.naive_utc(),
            end_time: session.end_time.naive_utc(),
            title: session.title.clone(),
            description: session.description.clone(),
            location: session.location.clone(),
            client_name: session.client_name_guess.clone(),
        }
    }
}

/// Outcome of one import run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// VEVENT blocks found in the text.
    pub parsed: usize,
    /// Events with a resolved start inside the window.
    pub in_window: usize,
    pub imported: usize,
    /// Events dropped for unresolved timestamps, inverted bounds or cancellation.
    pub skipped: usize,
    /// Sessions the store rejected.
    pub failed: usize,
    pub cutoff: DateTime<Utc>,
    pub upper: Option<DateTime<Utc>>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<NormalizedSession>>,
}

#[derive(Clone)]
pub struct CalendarImportService {
    fetcher: IcsFetcher,
    default_zone: Tz,
}

impl CalendarImportService {
    pub fn new(config: &CalendarConfig) -> AppResult<Self> {
        Ok(Self {
            fetcher: IcsFetcher::new(config)?,
            default_zone: config.default_zone(),
        })
    }

    pub fn with_fetcher(mut self, fetcher: IcsFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }

    pub fn fetcher(&self) -> &IcsFetcher {
        &self.fetcher
    }

    /// Fetch `url` and import it.
    pub async fn import_url(
        &self,
        store: &dyn SessionStore,
        url: &str,
        options: &ImportOptions,
        now: DateTime<Utc>,
    ) -> AppResult<ImportReport> {
        // Validate the window before touching the network.
        ImportWindow::from_options(options, self.default_zone, now)?;
        let text = self.fetcher.fetch(url).await?;
        self.import_text(store, &text, options, now).await
    }

    /// Import raw ICS text.
    ///
    /// Individual bad events are skipped and counted; a store failure for one
    /// session does not stop the rest of the batch.
    pub async fn import_text(
        &self,
        store: &dyn SessionStore,
        text: &str,
        options: &ImportOptions,
        now: DateTime<Utc>,
    ) -> AppResult<ImportReport> {
        let window = ImportWindow::from_options(options, self.default_zone, now)?;
        let events = parse_calendar_text(text, self.default_zone);
        let parsed = events.len();
        let mut skipped = 0usize;

        let (resolved, unresolved): (Vec<_>, Vec<_>) =
            events.into_iter().partition(|e| e.dtstart.is_some());
        for event in &unresolved {
            warn!(
                "Skipping event {}: unparseable DTSTART '{}'",
                event.uid.as_deref().unwrap_or("(no uid)"),
                event.raw_dtstart.as_deref().unwrap_or("")
            );
        }
        skipped += unresolved.len();

        let candidates = filter_for_import(resolved, &window);
        let in_window = candidates.len();

        let mut run = ImportRun::new();
        let mut sessions = Vec::with_capacity(in_window);
        for event in &candidates {
            let uid = event.uid.as_deref().unwrap_or("(no uid)");
            if event.is_cancelled() {
                debug!("Skipping cancelled event {}", uid);
                skipped += 1;
                continue;
            }
            match run.to_normalized_session(event) {
                Some(session) => sessions.push(session),
                None => {
                    warn!("Skipping event {}: missing or invalid DTEND", uid);
                    skipped += 1;
                }
            }
        }

        let mut report = ImportReport {
            parsed,
            in_window,
            imported: 0,
            skipped,
            failed: 0,
            cutoff: window.cutoff,
            upper: window.upper,
            dry_run: options.dry_run,
            sessions: None,
        };

        if options.dry_run {
            info!(
                "Calendar dry run: parsed={} in_window={} would_import={} skipped={}",
                parsed,
                in_window,
                sessions.len(),
                skipped
            );
            report.sessions = Some(sessions);
            return Ok(report);
        }

        for session in &sessions {
            match store.upsert(session).await {
                Ok(()) => report.imported += 1,
                Err(e) => {
                    warn!("Failed to store session {}: {:?}", session.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Calendar import: parsed={} in_window={} imported={} skipped={} failed={}",
            report.parsed, report.in_window, report.imported, report.skipped, report.failed
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, NormalizedSession>>,
        reject_uid: Option<String>,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn upsert(&self, session: &NormalizedSession) -> AppResult<()> {
            if self.reject_uid.is_some() && self.reject_uid == session.ical_uid {
                return Err(AppError::Validation("rejected".to_string()));
            }
            let key = session.ical_uid.clone().unwrap_or_else(|| session.id.clone());
            self.rows.lock().unwrap().insert(key, session.clone());
            Ok(())
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn service() -> CalendarImportService {
        CalendarImportService::new(&Config::default().calendar).unwrap()
    }

    const SCENARIO: &str = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:shoot-1@studio\r\n\
DTSTART;TZID=Europe/Vienna:20250810T140000\r\n\
DTEND;TZID=Europe/Vienna:20250810T150000\r\n\
SUMMARY:Familienshooting mit Müller\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:broken@studio\r\n\
DTSTART:garbage\r\n\
DTEND:20250810T150000Z\r\n\
SUMMARY:Broken\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:cancelled@studio\r\n\
DTSTART:20250811T090000Z\r\n\
DTEND:20250811T100000Z\r\n\
STATUS:CANCELLED\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:old@studio\r\n\
DTSTART:20240101T090000Z\r\n\
DTEND:20240101T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[tokio::test]
    async fn imports_scenario_event() {
        let store = MemoryStore::default();
        let now = utc("2025-08-01T08:00:00Z");
        let report = service()
            .import_text(&store, SCENARIO, &ImportOptions::default(), now)
            .await
            .unwrap();

        assert_eq!(report.parsed, 4);
        assert_eq!(report.in_window, 2);
        assert_eq!(report.imported, 1);
        // garbage DTSTART + cancelled
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.cutoff, utc("2025-07-31T22:00:00Z"));

        let rows = store.rows.lock().unwrap();
        let session = rows.get("shoot-1@studio").unwrap();
        assert_eq!(session.start_time, utc("2025-08-10T12:00:00Z"));
        assert_eq!(session.end_time, utc("2025-08-10T13:00:00Z"));
        assert!(session.client_name_guess.contains("Müller"));
        assert!(!rows.contains_key("broken@studio"));
    }

    #[tokio::test]
    async fn reimport_does_not_duplicate_uids() {
        let store = MemoryStore::default();
        let options = ImportOptions {
            include_past: true,
            ..Default::default()
        };
        let now = Utc::now();
        let svc = service();
        svc.import_text(&store, SCENARIO, &options, now).await.unwrap();
        let second = svc.import_text(&store, SCENARIO, &options, now).await.unwrap();

        assert_eq!(second.imported, 2);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_previews_without_storing() {
        let store = MemoryStore::default();
        let options = ImportOptions {
            include_past: true,
            to: Some("2024-12-31".to_string()),
            dry_run: true,
            ..Default::default()
        };
        let report = service()
            .import_text(&store, SCENARIO, &options, Utc::now())
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.imported, 0);
        assert_eq!(report.upper, Some(utc("2024-12-31T22:59:59Z")));
        let preview = report.sessions.unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].ical_uid.as_deref(), Some("old@studio"));
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_does_not_abort_batch() {
        let store = MemoryStore {
            reject_uid: Some("old@studio".to_string()),
            ..Default::default()
        };
        let options = ImportOptions {
            include_past: true,
            ..Default::default()
        };
        let report = service()
            .import_text(&store, SCENARIO, &options, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.imported, 1);
    }

    #[tokio::test]
    async fn imports_into_sqlite() {
        let pool = crate::db::test_pool().await;
        let options = ImportOptions {
            include_past: true,
            ..Default::default()
        };
        let svc = service();
        svc.import_text(&pool, SCENARIO, &options, Utc::now()).await.unwrap();
        svc.import_text(&pool, SCENARIO, &options, Utc::now()).await.unwrap();

        assert_eq!(SessionRepository::count(&pool).await.unwrap(), 2);
        let row = SessionRepository::find_by_ical_uid(&pool, "shoot-1@studio")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.start_time, utc("2025-08-10T12:00:00Z").naive_utc());
    }

    #[tokio::test]
    async fn import_url_uses_fetcher() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/studio.ics")
            .with_status(200)
            .with_body(SCENARIO)
            .create_async()
            .await;

        let store = MemoryStore::default();
        let options = ImportOptions {
            include_past: true,
            ..Default::default()
        };
        let report = service()
            .import_url(
                &store,
                &format!("{}/studio.ics", server.url()),
                &options,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(report.imported, 2);
    }

    #[tokio::test]
    async fn uids_that_sanitize_alike_both_import() {
        let pool = crate::db::test_pool().await;
        let ics = "BEGIN:VEVENT\nUID:a@b\nDTSTART:20250810T120000Z\nDTEND:20250810T130000Z\nEND:VEVENT\n\
BEGIN:VEVENT\nUID:ab\nDTSTART:20250811T120000Z\nDTEND:20250811T130000Z\nEND:VEVENT\n";
        let options = ImportOptions {
            include_past: true,
            ..Default::default()
        };
        let svc = service();
        let report = svc.import_text(&pool, ics, &options, Utc::now()).await.unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.failed, 0);

        let again = svc.import_text(&pool, ics, &options, Utc::now()).await.unwrap();
        assert_eq!(again.imported, 2);
        assert_eq!(SessionRepository::count(&pool).await.unwrap(), 2);
    }
}
