//! Initialization helpers for the application:
//! - database connection + migrations
//! - background worker spawn helpers

use std::{path::Path, sync::Arc};

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::services::calendar::ImportOptions;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Initialize SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable),
/// opens a connection pool using `create_if_missing(true)` and runs migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let existed = db_file_path.exists();

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    if existed {
        tracing::info!("Connected to database file: {}", db_file_path.display());
    } else {
        tracing::info!("Database file created: {}", db_file_path.display());
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Spawn background workers:
/// - periodic import of the configured calendar feed (`CALENDAR_FEED_URL`)
///
/// Returns the `JoinHandle`s so callers can await shutdown. Each worker
/// listens for a shutdown notification on the broadcast channel.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if let Some(feed_url) = state.config.calendar.feed_url.clone() {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        let interval =
            std::time::Duration::from_secs(state.config.calendar.sync_interval_seconds.max(60));

        handles.push(tokio::spawn(async move {
            loop {
                tracing::info!("Starting periodic calendar feed import");

                let options = ImportOptions::default();
                match state
                    .calendar
                    .import_url(&state.db, &feed_url, &options, Utc::now())
                    .await
                {
                    Ok(report) => tracing::info!(
                        "Calendar feed import finished: imported={} skipped={} failed={}",
                        report.imported,
                        report.skipped,
                        report.failed
                    ),
                    Err(e) => tracing::warn!("Calendar feed import failed: {}", e),
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Calendar feed worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }));
    } else {
        tracing::debug!("CALENDAR_FEED_URL not set; calendar feed worker disabled");
    }

    handles
}
