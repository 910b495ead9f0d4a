use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::db::{Session, SessionRepository};
use crate::error::{AppError, AppErrorWithDetails, AppResult};
use crate::i18n;
use crate::services::calendar::{ImportOptions, ImportReport, ImportWindow};
use crate::AppState;

/// Listing range used when `to` is omitted.
const DEFAULT_LISTING_DAYS: i64 = 90;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/import", post(import))
        .route("/import/raw", post(import_raw))
        .route("/sessions", get(list_sessions))
        .route("/cleanup", post(cleanup_duplicates))
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub ics: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Import from inline ICS text or from a calendar URL.
async fn import(
    State(state): State<Arc<AppState>>,
    Query(options): Query<ImportOptions>,
    Json(body): Json<ImportRequest>,
) -> Result<Json<ImportReport>, AppErrorWithDetails> {
    let now = Utc::now();
    let ics = body.ics.filter(|s| !s.trim().is_empty());
    let url = body.url.filter(|s| !s.trim().is_empty());

    let text = match (ics, url) {
        (Some(ics), _) => ics,
        (None, Some(url)) => {
            // Reject a bad window before fetching anything.
            ImportWindow::from_options(&options, state.calendar.default_zone(), now)?;
            state.calendar.fetcher().fetch(&url).await.map_err(|e| {
                let details = json!({ "kind": e.kind(), "url": url });
                AppError::from(e).with_details(details)
            })?
        }
        (None, None) => {
            return Err(AppError::BadRequest(i18n::t("calendar.source_required")).into())
        }
    };

    let report = state
        .calendar
        .import_text(&state.db, &text, &options, now)
        .await?;
    Ok(Json(report))
}

/// Import an ICS file posted as the raw request body.
async fn import_raw(
    State(state): State<Arc<AppState>>,
    Query(options): Query<ImportOptions>,
    body: String,
) -> AppResult<Json<ImportReport>> {
    if body.trim().is_empty() {
        return Err(AppError::BadRequest(i18n::t("calendar.source_required")));
    }

    let report = state
        .calendar
        .import_text(&state.db, &body, &options, Utc::now())
        .await?;
    Ok(Json(report))
}

/// Sessions starting between `from` (default today) and `to` (local dates).
async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> AppResult<Json<Vec<Session>>> {
    let options = ImportOptions {
        from: query.from,
        to: query.to,
        ..Default::default()
    };
    let window = ImportWindow::from_options(&options, state.calendar.default_zone(), Utc::now())?;
    let upper = window
        .upper
        .unwrap_or(window.cutoff + Duration::days(DEFAULT_LISTING_DAYS));

    let sessions =
        SessionRepository::list_between(&state.db, window.cutoff.naive_utc(), upper.naive_utc())
            .await?;
    Ok(Json(sessions))
}

/// Remove sessions duplicated at the exact same start and end time.
async fn cleanup_duplicates(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<serde_json::Value>> {
    let deleted = SessionRepository::cleanup_duplicate_clusters(&state.db).await?;
    tracing::info!("Duplicate session cleanup removed {} rows", deleted);

    Ok(Json(json!({
        "deleted": deleted,
        "message": format!("Removed {} duplicate sessions", deleted)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_state;
    use axum::body::Body;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const ICS: &str = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:shoot-1@studio\r\n\
DTSTART;TZID=Europe/Vienna:20250810T140000\r\n\
DTEND;TZID=Europe/Vienna:20250810T150000\r\n\
SUMMARY:Familienshooting mit Müller\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    async fn app() -> (Router, Arc<AppState>) {
        let state = test_state().await;
        let app = Router::new()
            .nest("/api/calendar", router())
            .with_state(state.clone());
        (app, state)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn import_json_body_and_list() {
        let (app, _state) = app().await;

        let resp = app
            .clone()
            .oneshot(
                Request::post("/api/calendar/import?includePast=true")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "ics": ICS }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = body_json(resp).await;
        assert_eq!(report["imported"], 1);
        assert_eq!(report["dryRun"], false);

        let resp = app
            .oneshot(
                Request::get("/api/calendar/sessions?from=2025-08-01&to=2025-08-31")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let sessions = body_json(resp).await;
        assert_eq!(sessions.as_array().unwrap().len(), 1);
        assert_eq!(sessions[0]["icalUid"], "shoot-1@studio");
        assert_eq!(sessions[0]["clientName"], "Müller");
    }

    #[tokio::test]
    async fn raw_import_dry_run_stores_nothing() {
        let (app, state) = app().await;
        let resp = app
            .oneshot(
                Request::post("/api/calendar/import/raw?includePast=1&dryRun=yes")
                    .header("content-type", "text/calendar")
                    .body(Body::from(ICS))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = body_json(resp).await;
        assert_eq!(report["dryRun"], true);
        assert_eq!(report["sessions"][0]["startTime"], "2025-08-10T12:00:00Z");
        assert_eq!(SessionRepository::count(&state.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_source_and_bad_dates_are_rejected() {
        let (app, _state) = app().await;
        let resp = app
            .clone()
            .oneshot(
                Request::post("/api/calendar/import")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "BAD_REQUEST");

        let resp = app
            .oneshot(
                Request::post("/api/calendar/import/raw?from=yesterday")
                    .body(Body::from(ICS))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn html_feed_reports_actionable_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/share")
            .with_status(200)
            .with_body("<!DOCTYPE html><html>login</html>")
            .create_async()
            .await;

        let (app, _state) = app().await;
        let resp = app
            .oneshot(
                Request::post("/api/calendar/import")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "url": format!("{}/share", server.url()) }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "CALENDAR_FETCH_FAILED");
        assert_eq!(body["error"]["details"]["kind"], "html_instead_of_calendar");
    }

    #[tokio::test]
    async fn cleanup_reports_deleted_rows() {
        let (app, _state) = app().await;
        let resp = app
            .oneshot(
                Request::post("/api/calendar/cleanup")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["deleted"], 0);
    }
}
