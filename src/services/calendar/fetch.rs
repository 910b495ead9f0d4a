use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::CalendarConfig;
use crate::error::{AppError, AppResult};
use crate::i18n;

/// Number of leading characters inspected when sniffing for an HTML page.
const SNIFF_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum IcsFetchError {
    #[error("invalid calendar URL: {0}")]
    InvalidUrl(String),

    #[error("network error after {attempts} attempts: {source}")]
    Network {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} after {attempts} attempts")]
    Status { attempts: u32, status: u16 },

    #[error("received an HTML page instead of calendar data after {attempts} attempts")]
    HtmlInsteadOfCalendar { attempts: u32 },

    #[error("response is not iCalendar data after {attempts} attempts")]
    NotCalendar { attempts: u32 },

    #[error("no calendar received within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("calendar body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl IcsFetchError {
    /// Message telling the user what to fix, in `lang` (default language if `None`).
    pub fn user_message(&self, lang: Option<&str>) -> String {
        match self {
            IcsFetchError::InvalidUrl(url) => {
                i18n::tr(lang, "calendar.fetch.invalid_url", Some(&[("url", url.as_str())]))
            }
            IcsFetchError::Network { attempts, source } => {
                let attempts = attempts.to_string();
                let err = source.to_string();
                i18n::tr(
                    lang,
                    "calendar.fetch.network",
                    Some(&[("attempts", attempts.as_str()), ("err", err.as_str())]),
                )
            }
            IcsFetchError::Status { attempts, status } => {
                let attempts = attempts.to_string();
                let status = status.to_string();
                i18n::tr(
                    lang,
                    "calendar.fetch.status",
                    Some(&[("attempts", attempts.as_str()), ("status", status.as_str())]),
                )
            }
            IcsFetchError::HtmlInsteadOfCalendar { .. } => {
                i18n::tr(lang, "calendar.fetch.html", None)
            }
            IcsFetchError::NotCalendar { .. } => i18n::tr(lang, "calendar.fetch.not_calendar", None),
            IcsFetchError::Timeout { seconds } => {
                let seconds = seconds.to_string();
                i18n::tr(
                    lang,
                    "calendar.fetch.timeout",
                    Some(&[("seconds", seconds.as_str())]),
                )
            }
            IcsFetchError::TooLarge { limit } => {
                let limit = limit.to_string();
                i18n::tr(
                    lang,
                    "calendar.fetch.too_large",
                    Some(&[("limit", limit.as_str())]),
                )
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IcsFetchError::InvalidUrl(_) => "invalid_url",
            IcsFetchError::Network { .. } => "network",
            IcsFetchError::Status { .. } => "status",
            IcsFetchError::HtmlInsteadOfCalendar { .. } => "html_instead_of_calendar",
            IcsFetchError::NotCalendar { .. } => "not_calendar",
            IcsFetchError::Timeout { .. } => "timeout",
            IcsFetchError::TooLarge { .. } => "too_large",
        }
    }
}

impl From<IcsFetchError> for AppError {
    fn from(err: IcsFetchError) -> Self {
        match err {
            IcsFetchError::InvalidUrl(_) => AppError::BadRequest(err.user_message(None)),
            _ => AppError::CalendarFetch(err.user_message(None)),
        }
    }
}

/// Downloads ICS feeds with bounded retries under one overall deadline.
#[derive(Clone)]
pub struct IcsFetcher {
    client: Client,
    attempts: u32,
    backoff: Duration,
    /// Budget for all attempts and pauses together.
    total_timeout: Duration,
    max_body_bytes: usize,
}

impl IcsFetcher {
    pub fn new(config: &CalendarConfig) -> AppResult<Self> {
        let total_timeout = Duration::from_secs(config.fetch_timeout_seconds.max(1));
        let client = Client::builder()
            .timeout(total_timeout)
            .user_agent(concat!("studio-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            attempts: config.fetch_attempts.max(1),
            backoff: Duration::from_millis(config.fetch_backoff_ms),
            total_timeout,
            max_body_bytes: config.fetch_max_bytes.max(1),
        })
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn with_limits(mut self, total_timeout: Duration, max_body_bytes: usize) -> Self {
        self.total_timeout = total_timeout;
        self.max_body_bytes = max_body_bytes.max(1);
        self
    }

    /// Fetch `url` and return its body once it looks like iCalendar data.
    ///
    /// Failures other than an oversized body are retried; attempt `n` is
    /// followed by a pause of `n * backoff`. The last failure is returned, or
    /// `Timeout` when the overall deadline passes first.
    pub async fn fetch(&self, url: &str) -> Result<String, IcsFetchError> {
        let url = normalize_feed_url(url)?;
        match tokio::time::timeout(self.total_timeout, self.fetch_with_retries(&url)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Calendar fetch from {} exceeded {:?} overall",
                    url, self.total_timeout
                );
                Err(IcsFetchError::Timeout {
                    seconds: self.total_timeout.as_secs().max(1),
                })
            }
        }
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<String, IcsFetchError> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.fetch_once(url, attempt).await {
                Ok(body) => {
                    info!("Fetched calendar from {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err(e @ IcsFetchError::TooLarge { .. }) => {
                    warn!("Calendar fetch from {} failed: {}", url, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Calendar fetch from {} failed: {} (attempt {}/{})",
                        url, e, attempt, self.attempts
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(last_error.unwrap_or(IcsFetchError::NotCalendar {
            attempts: self.attempts,
        }))
    }

    async fn fetch_once(&self, url: &str, attempt: u32) -> Result<String, IcsFetchError> {
        let mut resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/calendar, text/plain;q=0.9, */*;q=0.5")
            .send()
            .await
            .map_err(|source| IcsFetchError::Network {
                attempts: attempt,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IcsFetchError::Status {
                attempts: attempt,
                status: status.as_u16(),
            });
        }

        let limit = self.max_body_bytes;
        if resp.content_length().is_some_and(|len| len > limit as u64) {
            return Err(IcsFetchError::TooLarge { limit });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|source| IcsFetchError::Network {
            attempts: attempt,
            source,
        })? {
            if bytes.len() + chunk.len() > limit {
                return Err(IcsFetchError::TooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        if looks_like_html(&body) {
            debug!("Calendar response from {} is an HTML page", url);
            return Err(IcsFetchError::HtmlInsteadOfCalendar { attempts: attempt });
        }
        if !body.contains("BEGIN:VCALENDAR") {
            return Err(IcsFetchError::NotCalendar { attempts: attempt });
        }

        Ok(body)
    }
}

/// Rewrite `webcal://`/`webcals://` to `https://` and reject anything that
/// is not http(s).
pub fn normalize_feed_url(raw: &str) -> Result<String, IcsFetchError> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let rewritten = ["webcals://", "webcal://"]
        .iter()
        .find(|scheme| lower.starts_with(*scheme))
        .map(|scheme| format!("https://{}", &trimmed[scheme.len()..]))
        .unwrap_or_else(|| trimmed.to_string());

    let parsed =
        url::Url::parse(&rewritten).map_err(|_| IcsFetchError::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed.to_string()),
        _ => Err(IcsFetchError::InvalidUrl(raw.to_string())),
    }
}

pub fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start_matches('\u{feff}')
        .trim_start()
        .chars()
        .take(SNIFF_LEN)
        .collect::<String>()
        .to_lowercase();
    head.starts_with("<!doctype html") || head.contains("<html")
}
