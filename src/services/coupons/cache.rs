use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::definition::{CouponRule, CouponSource, DiscountType, EnvCoupon};
use crate::services::calendar::window::{end_of_local_day, start_of_local_day};

/// Produces the current `COUPONS_JSON` value, if any.
pub type CouponsJsonLoader = Arc<dyn Fn() -> Option<String> + Send + Sync>;

struct CacheState {
    value: Arc<Vec<EnvCoupon>>,
    expires_at: Option<DateTime<Utc>>,
}

/// TTL cache over the parsed `COUPONS_JSON` coupons.
///
/// Reads refresh lazily once the entry is stale. Two readers racing on a
/// stale entry both re-parse the same input, which is harmless.
pub struct EnvCouponCache {
    ttl: Duration,
    zone: Tz,
    loader: CouponsJsonLoader,
    state: RwLock<CacheState>,
}

impl EnvCouponCache {
    /// Cache reading `COUPONS_JSON` from the process environment.
    pub fn from_env(ttl_seconds: u64, zone: Tz) -> Self {
        Self::with_loader(
            ttl_seconds,
            zone,
            Arc::new(|| std::env::var("COUPONS_JSON").ok()),
        )
    }

    pub fn with_loader(ttl_seconds: u64, zone: Tz, loader: CouponsJsonLoader) -> Self {
        let ttl_seconds = i64::try_from(ttl_seconds).unwrap_or(i64::MAX / 1_000);
        Self {
            ttl: Duration::seconds(ttl_seconds),
            zone,
            loader,
            state: RwLock::new(CacheState {
                value: Arc::new(Vec::new()),
                expires_at: None,
            }),
        }
    }

    /// Current coupons, reloading when the cached value has expired.
    pub fn get(&self, now: DateTime<Utc>) -> Arc<Vec<EnvCoupon>> {
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if state.expires_at.is_some_and(|expires| now < expires) {
                return state.value.clone();
            }
        }
        self.reload(now)
    }

    /// Reload immediately, ignoring the TTL.
    pub fn force_refresh(&self, now: DateTime<Utc>) -> Arc<Vec<EnvCoupon>> {
        info!("Forcing reload of env coupons");
        self.reload(now)
    }

    fn reload(&self, now: DateTime<Utc>) -> Arc<Vec<EnvCoupon>> {
        let coupons = match (self.loader)() {
            Some(raw) if !raw.trim().is_empty() => parse_coupons_json(&raw, self.zone),
            _ => Vec::new(),
        };
        debug!("Loaded {} env coupons", coupons.len());

        let value = Arc::new(coupons);
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.value = value.clone();
        state.expires_at = now.checked_add_signed(self.ttl);
        value
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CouponsDocument {
    List(Vec<Value>),
    Wrapped { coupons: Vec<Value> },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvCoupon {
    code: String,
    #[serde(rename = "type", alias = "discountType")]
    discount_type: Option<String>,
    #[serde(alias = "discountValue")]
    value: Option<Value>,
    #[serde(alias = "skus")]
    allowed_skus: Option<Vec<String>>,
    #[serde(alias = "validFrom", alias = "startsAt")]
    start_date: Option<String>,
    #[serde(alias = "validUntil", alias = "endsAt")]
    end_date: Option<String>,
}

/// Parse a `COUPONS_JSON` document: either an array of coupons or
/// `{"coupons": [...]}`. Malformed documents yield no coupons; malformed
/// entries are skipped. Both cases log a warning.
pub fn parse_coupons_json(raw: &str, zone: Tz) -> Vec<EnvCoupon> {
    let entries = match serde_json::from_str::<CouponsDocument>(raw) {
        Ok(CouponsDocument::List(entries)) | Ok(CouponsDocument::Wrapped { coupons: entries }) => {
            entries
        }
        Err(e) => {
            warn!("COUPONS_JSON is not a coupon list, ignoring it: {}", e);
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(idx, entry)| match parse_entry(entry, zone) {
            Ok(coupon) => Some(coupon),
            Err(reason) => {
                warn!("Skipping COUPONS_JSON entry #{}: {}", idx, reason);
                None
            }
        })
        .collect()
}

fn parse_entry(entry: Value, zone: Tz) -> Result<EnvCoupon, String> {
    let raw: RawEnvCoupon = serde_json::from_value(entry).map_err(|e| e.to_string())?;

    let code = raw.code.trim().to_uppercase();
    if code.is_empty() {
        return Err("empty code".to_string());
    }

    let type_name = raw.discount_type.as_deref().unwrap_or("fixed");
    let discount_type = DiscountType::parse(type_name)
        .ok_or_else(|| format!("{}: unknown discount type '{}'", code, type_name))?;

    let value = raw
        .value
        .as_ref()
        .and_then(number_value)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| format!("{}: missing or invalid value", code))?;

    let starts_at = raw
        .start_date
        .as_deref()
        .map(|s| parse_bound(s, zone, Bound::Start))
        .transpose()
        .map_err(|e| format!("{}: {}", code, e))?;
    let ends_at = raw
        .end_date
        .as_deref()
        .map(|s| parse_bound(s, zone, Bound::End))
        .transpose()
        .map_err(|e| format!("{}: {}", code, e))?;

    Ok(EnvCoupon {
        rule: CouponRule {
            code,
            discount_type,
            value,
            allowed_skus: raw.allowed_skus.unwrap_or_default(),
            starts_at,
            ends_at,
        },
        origin: CouponSource::Env,
    })
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// RFC 3339 instants are taken as-is; plain dates cover the whole local day.
fn parse_bound(raw: &str, zone: Tz, bound: Bound) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}'", raw))?;
    let resolved = match bound {
        Bound::Start => start_of_local_day(date, zone),
        Bound::End => end_of_local_day(date, zone),
    };
    resolved.map_err(|e| e.to_string())
}
