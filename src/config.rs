use std::env;

use chrono_tz::Tz;
use serde::Deserialize;

pub const DEFAULT_CALENDAR_TZ: &str = "Europe/Vienna";
pub const DEFAULT_FETCH_MAX_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_STRICT_COUPON_CODES: [&str; 4] = ["VCWIEN", "CL50", "WL50", "VW50"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub calendar: CalendarConfig,
    pub coupons: CouponConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS (the admin frontend).
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    /// IANA zone used for floating times, all-day dates and the import cutoff.
    /// Read from `DEFAULT_CAL_TZ`.
    pub default_tz: String,
    /// Number of attempts when fetching a remote ICS feed.
    pub fetch_attempts: u32,
    /// Base delay between fetch attempts; attempt `n` waits `n * backoff`.
    pub fetch_backoff_ms: u64,
    /// Overall budget for one fetch, all attempts and pauses included.
    pub fetch_timeout_seconds: u64,
    /// Largest feed body accepted, in bytes.
    pub fetch_max_bytes: usize,
    /// Feed imported periodically by the background worker, if set.
    pub feed_url: Option<String>,
    pub sync_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CouponConfig {
    /// TTL of the env coupon cache (`COUPON_RELOAD_SECONDS`).
    pub reload_seconds: u64,
    /// Codes only valid for carts containing a 95 EUR item (`COUPONS_95_ONLY`).
    pub strict_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the coupon endpoints
    pub coupons_per_second: u32,
    /// Burst size for the coupon endpoints
    pub coupons_burst: u32,
}

impl CalendarConfig {
    /// Parsed default zone. `from_env` has already validated the name, so the
    /// fallback only matters for hand-built configs.
    pub fn default_zone(&self) -> Tz {
        self.default_tz.parse().unwrap_or(chrono_tz::Europe::Vienna)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let default_tz =
            env::var("DEFAULT_CAL_TZ").unwrap_or_else(|_| DEFAULT_CALENDAR_TZ.to_string());
        if default_tz.parse::<Tz>().is_err() {
            return Err(ConfigError::InvalidValue("DEFAULT_CAL_TZ".to_string()));
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/studio.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            calendar: CalendarConfig {
                default_tz,
                fetch_attempts: env::var("CALENDAR_FETCH_ATTEMPTS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3u32)
                    .max(1),
                fetch_backoff_ms: env::var("CALENDAR_FETCH_BACKOFF_MS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300u64),
                fetch_timeout_seconds: env::var("CALENDAR_FETCH_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60u64),
                fetch_max_bytes: env::var("CALENDAR_FETCH_MAX_BYTES")
                    .unwrap_or_else(|_| DEFAULT_FETCH_MAX_BYTES.to_string())
                    .parse()
                    .unwrap_or(DEFAULT_FETCH_MAX_BYTES),
                feed_url: env::var("CALENDAR_FEED_URL")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
                sync_interval_seconds: env::var("CALENDAR_SYNC_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600u64),
            },
            coupons: CouponConfig {
                reload_seconds: env::var("COUPON_RELOAD_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60u64),
                strict_codes: match env::var("COUPONS_95_ONLY") {
                    Ok(v) => parse_code_list(&v),
                    Err(_) => default_strict_codes(),
                },
            },
            rate_limit: RateLimitConfig {
                coupons_per_second: env::var("RATE_LIMIT_COUPONS_PER_SECOND")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                coupons_burst: env::var("RATE_LIMIT_COUPONS_BURST")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
            },
        })
    }
}

/// Split a comma separated list of coupon codes, trimming and upper-casing each.
/// An override that contains no codes at all keeps the defaults.
pub fn parse_code_list(raw: &str) -> Vec<String> {
    let codes: Vec<String> = raw
        .split(',')
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();

    if codes.is_empty() {
        default_strict_codes()
    } else {
        codes
    }
}

fn default_strict_codes() -> Vec<String> {
    DEFAULT_STRICT_COUPON_CODES
        .iter()
        .map(|c| c.to_string())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/studio.db".to_string(),
                max_connections: 5,
            },
            calendar: CalendarConfig {
                default_tz: DEFAULT_CALENDAR_TZ.to_string(),
                fetch_attempts: 3,
                fetch_backoff_ms: 300,
                fetch_timeout_seconds: 60,
                fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
                feed_url: None,
                sync_interval_seconds: 3600,
            },
            coupons: CouponConfig {
                reload_seconds: 60,
                strict_codes: default_strict_codes(),
            },
            rate_limit: RateLimitConfig {
                coupons_per_second: 5,
                coupons_burst: 20,
            },
        }
    }
}
