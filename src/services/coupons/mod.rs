//! Coupon resolution: env coupons shadow persisted ones, which shadow the
//! built-in promotional codes.

pub mod cache;
pub mod definition;
pub mod pricing;

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::{CouponConfig, DEFAULT_STRICT_COUPON_CODES};
use crate::db::CouponRepository;
use crate::error::{AppError, AppResult};
use crate::i18n;

pub use cache::EnvCouponCache;
pub use definition::{
    CouponDefinition, CouponRule, CouponSource, DiscountType, EnvCoupon, Evaluation,
    PersistedCoupon, RejectReason,
};
pub use pricing::{from_cents, Cart, CartItem};

/// Fixed discount of the built-in promotional codes, in EUR.
const BUILTIN_DISCOUNT: f64 = 50.0;

/// Persisted coupon lookup.
#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn find_by_code(&self, code: &str) -> AppResult<Option<PersistedCoupon>>;
    async fn list_all(&self) -> AppResult<Vec<PersistedCoupon>>;
    /// Count one redemption; `false` when the coupon cannot be redeemed.
    async fn record_usage(&self, code: &str) -> AppResult<bool>;
}

#[async_trait]
impl CouponStore for SqlitePool {
    async fn find_by_code(&self, code: &str) -> AppResult<Option<PersistedCoupon>> {
        Ok(CouponRepository::find_by_code(self, code)
            .await?
            .and_then(PersistedCoupon::from_row))
    }

    async fn list_all(&self) -> AppResult<Vec<PersistedCoupon>> {
        Ok(CouponRepository::list_all(self)
            .await?
            .into_iter()
            .filter_map(PersistedCoupon::from_row)
            .collect())
    }

    async fn record_usage(&self, code: &str) -> AppResult<bool> {
        CouponRepository::increment_usage(self, code).await
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    #[serde(default)]
    pub code: String,
    pub order_amount: Option<f64>,
    pub items: Option<Vec<CartItem>>,
    pub lang: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    /// EUR, two decimals.
    pub discount_amount: f64,
    pub eligible_subtotal: f64,
    pub source: CouponSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<AppliedCoupon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CouponValidation {
    /// Request body that could not be read as a coupon request.
    pub fn malformed(detail: &str, lang: Option<&str>) -> Self {
        CouponValidation {
            valid: false,
            coupon: None,
            error: Some(i18n::tr(
                lang,
                "coupon.invalid_request",
                Some(&[("err", detail)]),
            )),
        }
    }

    fn rejected(reasons: &[RejectReason], lang: Option<&str>) -> Self {
        let message = reasons
            .iter()
            .map(|r| r.message(lang))
            .collect::<Vec<_>>()
            .join("; ");
        CouponValidation {
            valid: false,
            coupon: None,
            error: Some(message),
        }
    }
}

/// One row of the merged coupon listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponSummary {
    pub code: String,
    pub source: CouponSource,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub allowed_skus: Vec<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub strict_tier_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemOutcome {
    pub code: String,
    pub source: CouponSource,
    /// Whether a usage counter was incremented (persisted coupons only).
    pub counted: bool,
}

pub fn builtin_coupons() -> Vec<EnvCoupon> {
    DEFAULT_STRICT_COUPON_CODES
        .iter()
        .map(|code| EnvCoupon {
            rule: CouponRule {
                code: code.to_string(),
                discount_type: DiscountType::Fixed,
                value: BUILTIN_DISCOUNT,
                allowed_skus: Vec::new(),
                starts_at: None,
                ends_at: None,
            },
            origin: CouponSource::BuiltIn,
        })
        .collect()
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub struct CouponService {
    cache: EnvCouponCache,
    strict_codes: HashSet<String>,
    builtins: Vec<EnvCoupon>,
}

impl CouponService {
    pub fn new(config: &CouponConfig, zone: Tz) -> Self {
        Self::with_cache(
            EnvCouponCache::from_env(config.reload_seconds, zone),
            &config.strict_codes,
        )
    }

    pub fn with_cache(cache: EnvCouponCache, strict_codes: &[String]) -> Self {
        Self {
            cache,
            strict_codes: strict_codes.iter().map(|c| normalize_code(c)).collect(),
            builtins: builtin_coupons(),
        }
    }

    pub fn is_strict(&self, code: &str) -> bool {
        self.strict_codes.contains(&normalize_code(code))
    }

    /// Resolve `code`: env coupons first, then the store, then the built-ins.
    pub async fn lookup(
        &self,
        store: Option<&dyn CouponStore>,
        code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<CouponDefinition>> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(None);
        }

        if let Some(env) = self.cache.get(now).iter().find(|c| c.rule.code == code) {
            debug!("Coupon {} resolved from env", code);
            return Ok(Some(CouponDefinition::Env(env.clone())));
        }

        if let Some(store) = store {
            if let Some(persisted) = store.find_by_code(&code).await? {
                debug!("Coupon {} resolved from store", code);
                return Ok(Some(CouponDefinition::Persisted(persisted)));
            }
        }

        Ok(self
            .builtins
            .iter()
            .find(|c| c.rule.code == code)
            .cloned()
            .map(CouponDefinition::Env))
    }

    /// Validate a coupon against an order. Business-rule failures come back as
    /// `valid: false`; only store failures are errors.
    pub async fn validate(
        &self,
        store: Option<&dyn CouponStore>,
        request: ValidateCouponRequest,
        now: DateTime<Utc>,
    ) -> AppResult<CouponValidation> {
        let lang = request.lang.as_deref();

        if request.code.trim().is_empty() {
            return Ok(CouponValidation::rejected(&[RejectReason::CodeRequired], lang));
        }

        let Some(coupon) = self.lookup(store, &request.code, now).await? else {
            return Ok(CouponValidation::rejected(&[RejectReason::NotFound], lang));
        };

        let Some(cart) = Cart::from_parts(request.items, request.order_amount) else {
            return Ok(CouponValidation::rejected(&[RejectReason::AmountRequired], lang));
        };

        let strict = self.is_strict(coupon.code());
        match coupon.evaluate(&cart, strict, now) {
            Evaluation::Applied {
                discount_cents,
                eligible_cents,
            } => {
                let rule = coupon.rule();
                Ok(CouponValidation {
                    valid: true,
                    coupon: Some(AppliedCoupon {
                        code: rule.code.clone(),
                        discount_type: rule.discount_type,
                        discount_value: rule.value,
                        discount_amount: from_cents(discount_cents),
                        eligible_subtotal: from_cents(eligible_cents),
                        source: coupon.source(),
                    }),
                    error: None,
                })
            }
            Evaluation::Rejected(reasons) => {
                debug!("Coupon {} rejected: {:?}", coupon.code(), reasons);
                Ok(CouponValidation::rejected(&reasons, lang))
            }
        }
    }

    /// Every known coupon, each code once, in precedence order.
    pub async fn list_all(
        &self,
        store: Option<&dyn CouponStore>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<CouponSummary>> {
        let mut merged: BTreeMap<String, CouponDefinition> = BTreeMap::new();

        for env in self.cache.get(now).iter() {
            merged
                .entry(env.rule.code.clone())
                .or_insert_with(|| CouponDefinition::Env(env.clone()));
        }
        if let Some(store) = store {
            for persisted in store.list_all().await? {
                merged
                    .entry(persisted.rule.code.clone())
                    .or_insert(CouponDefinition::Persisted(persisted));
            }
        }
        for builtin in &self.builtins {
            merged
                .entry(builtin.rule.code.clone())
                .or_insert_with(|| CouponDefinition::Env(builtin.clone()));
        }

        Ok(merged
            .into_values()
            .map(|coupon| self.summarize(&coupon, now))
            .collect())
    }

    fn summarize(&self, coupon: &CouponDefinition, now: DateTime<Utc>) -> CouponSummary {
        let rule = coupon.rule();
        let (usage_count, usage_limit) = match coupon {
            CouponDefinition::Persisted(p) => (Some(p.usage_count), p.usage_limit),
            CouponDefinition::Env(_) => (None, None),
        };
        CouponSummary {
            code: rule.code.clone(),
            source: coupon.source(),
            discount_type: rule.discount_type,
            discount_value: rule.value,
            allowed_skus: rule.allowed_skus.clone(),
            starts_at: rule.starts_at,
            ends_at: rule.ends_at,
            active: coupon.is_active(now),
            strict_tier_only: self.is_strict(&rule.code),
            usage_count,
            usage_limit,
        }
    }

    /// Record that `code` was used on a completed order.
    pub async fn redeem(
        &self,
        store: Option<&dyn CouponStore>,
        code: &str,
        lang: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<RedeemOutcome> {
        let Some(coupon) = self.lookup(store, code, now).await? else {
            return Err(AppError::NotFound(i18n::tr(lang, "coupon.not_found", None)));
        };

        let reasons = coupon.inactive_reasons(now);
        if !reasons.is_empty() {
            return Err(AppError::Validation(
                CouponValidation::rejected(&reasons, lang)
                    .error
                    .unwrap_or_default(),
            ));
        }

        let counted = match (&coupon, store) {
            (CouponDefinition::Persisted(p), Some(store)) => {
                if !store.record_usage(&p.rule.code).await? {
                    return Err(AppError::Validation(i18n::tr(
                        lang,
                        "coupon.usage_limit",
                        None,
                    )));
                }
                true
            }
            _ => false,
        };

        info!("Coupon {} redeemed (counted: {})", coupon.code(), counted);
        Ok(RedeemOutcome {
            code: coupon.code().to_string(),
            source: coupon.source(),
            counted,
        })
    }

    /// Drop the cached env coupons and reload them. Returns how many were loaded.
    pub fn refresh(&self, now: DateTime<Utc>) -> usize {
        self.cache.force_refresh(now).len()
    }
}
