use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::pricing::{discount_cents, format_cents, to_cents, Cart, MAX_AMOUNT_CENTS};
use crate::db::models::CouponRow;
use crate::i18n;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "percentage" | "percent" | "pct" | "%" => Some(DiscountType::Percentage),
            "fixed" | "amount" | "fixed_amount" | "absolute" => Some(DiscountType::Fixed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }
}

/// Where a coupon definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponSource {
    Env,
    Persisted,
    BuiltIn,
}

/// Fields every coupon has, whatever its source.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponRule {
    /// Upper-cased code.
    pub code: String,
    pub discount_type: DiscountType,
    pub value: f64,
    pub allowed_skus: Vec<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl CouponRule {
    /// Empty list, `*` or `all` means every SKU.
    pub fn is_unrestricted(&self) -> bool {
        self.allowed_skus.is_empty()
            || self
                .allowed_skus
                .iter()
                .any(|s| s == "*" || s.eq_ignore_ascii_case("all"))
    }

    pub fn is_sku_allowed(&self, sku: Option<&str>) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        match sku {
            Some(sku) => self
                .allowed_skus
                .iter()
                .any(|allowed| allowed.trim().eq_ignore_ascii_case(sku.trim())),
            None => false,
        }
    }

    fn window_reason(&self, now: DateTime<Utc>) -> Option<RejectReason> {
        if self.starts_at.is_some_and(|start| now < start) {
            return Some(RejectReason::NotYetValid);
        }
        if self.ends_at.is_some_and(|end| now > end) {
            return Some(RejectReason::Expired);
        }
        None
    }
}

/// Coupon from `COUPONS_JSON` or the built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvCoupon {
    pub rule: CouponRule,
    pub origin: CouponSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedCoupon {
    pub id: String,
    pub rule: CouponRule,
    pub is_active: bool,
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
    pub min_order_amount: Option<f64>,
    pub max_discount_amount: Option<f64>,
}

impl PersistedCoupon {
    /// Rows with an unknown discount type are unusable and yield `None`.
    pub fn from_row(row: CouponRow) -> Option<Self> {
        let Some(discount_type) = DiscountType::parse(&row.discount_type) else {
            warn!(
                "Ignoring persisted coupon {}: unknown discount type '{}'",
                row.code, row.discount_type
            );
            return None;
        };
        let allowed_skus = row.allowed_skus();

        Some(PersistedCoupon {
            rule: CouponRule {
                code: row.code.trim().to_uppercase(),
                discount_type,
                value: row.discount_value,
                allowed_skus,
                starts_at: row.starts_at.map(|t| t.and_utc()),
                ends_at: row.ends_at.map(|t| t.and_utc()),
            },
            id: row.id,
            is_active: row.is_active,
            usage_limit: row.usage_limit,
            usage_count: row.usage_count,
            min_order_amount: row.min_order_amount,
            max_discount_amount: row.max_discount_amount,
        })
    }

    pub fn usage_exhausted(&self) -> bool {
        self.usage_limit
            .is_some_and(|limit| self.usage_count >= limit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CouponDefinition {
    Env(EnvCoupon),
    Persisted(PersistedCoupon),
}

/// Why a coupon does not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NotFound,
    CodeRequired,
    AmountRequired,
    /// A price, line or order amount is negative or too large to compute with.
    InvalidAmount,
    Inactive,
    NotYetValid,
    Expired,
    UsageLimitReached,
    MinOrder { min_cents: i64 },
    NoEligibleItems,
    OnlyStrictTier,
}

impl RejectReason {
    pub fn message(&self, lang: Option<&str>) -> String {
        match self {
            RejectReason::NotFound => i18n::tr(lang, "coupon.not_found", None),
            RejectReason::CodeRequired => i18n::tr(lang, "coupon.code_required", None),
            RejectReason::AmountRequired => i18n::tr(lang, "coupon.amount_required", None),
            RejectReason::InvalidAmount => {
                let max = format_cents(MAX_AMOUNT_CENTS);
                i18n::tr(lang, "coupon.invalid_amount", Some(&[("max", max.as_str())]))
            }
            RejectReason::Inactive => i18n::tr(lang, "coupon.inactive", None),
            RejectReason::NotYetValid => i18n::tr(lang, "coupon.not_yet_valid", None),
            RejectReason::Expired => i18n::tr(lang, "coupon.expired", None),
            RejectReason::UsageLimitReached => i18n::tr(lang, "coupon.usage_limit", None),
            RejectReason::MinOrder { min_cents } => {
                let amount = format_cents(*min_cents);
                i18n::tr(lang, "coupon.min_order", Some(&[("amount", amount.as_str())]))
            }
            RejectReason::NoEligibleItems => i18n::tr(lang, "coupon.no_eligible_items", None),
            RejectReason::OnlyStrictTier => i18n::tr(lang, "coupon.only_95_tier", None),
        }
    }
}

/// Result of evaluating one coupon against one cart.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Applied {
        discount_cents: i64,
        eligible_cents: i64,
    },
    Rejected(Vec<RejectReason>),
}

impl CouponDefinition {
    pub fn rule(&self) -> &CouponRule {
        match self {
            CouponDefinition::Env(c) => &c.rule,
            CouponDefinition::Persisted(c) => &c.rule,
        }
    }

    pub fn code(&self) -> &str {
        &self.rule().code
    }

    pub fn source(&self) -> CouponSource {
        match self {
            CouponDefinition::Env(c) => c.origin,
            CouponDefinition::Persisted(_) => CouponSource::Persisted,
        }
    }

    fn max_discount_cents(&self) -> Option<i64> {
        match self {
            CouponDefinition::Env(_) => None,
            CouponDefinition::Persisted(c) => c.max_discount_amount.map(to_cents),
        }
    }

    /// Reasons the coupon cannot be used at `now`, regardless of the cart.
    pub fn inactive_reasons(&self, now: DateTime<Utc>) -> Vec<RejectReason> {
        let mut reasons = Vec::new();
        if let CouponDefinition::Persisted(c) = self {
            if !c.is_active {
                reasons.push(RejectReason::Inactive);
            }
        }
        if let Some(reason) = self.rule().window_reason(now) {
            reasons.push(reason);
        }
        if let CouponDefinition::Persisted(c) = self {
            if c.usage_exhausted() {
                reasons.push(RejectReason::UsageLimitReached);
            }
        }
        reasons
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.inactive_reasons(now).is_empty()
    }

    /// Decide whether the coupon applies to `cart` and compute the discount.
    ///
    /// Activity and minimum-order reasons are collected together. A strict
    /// code short-circuits before any discount is computed when no eligible
    /// line is priced at exactly 95.
    pub fn evaluate(&self, cart: &Cart, strict: bool, now: DateTime<Utc>) -> Evaluation {
        let Some(total_cents) = cart.total_cents() else {
            return Evaluation::Rejected(vec![RejectReason::InvalidAmount]);
        };
        let mut reasons = self.inactive_reasons(now);

        if let CouponDefinition::Persisted(PersistedCoupon {
            min_order_amount: Some(min),
            ..
        }) = self
        {
            let min_cents = to_cents(*min);
            if total_cents < min_cents {
                reasons.push(RejectReason::MinOrder { min_cents });
            }
        }

        if !reasons.is_empty() {
            return Evaluation::Rejected(reasons);
        }

        let rule = self.rule();
        if strict && !cart.has_strict_tier_item(rule) {
            return Evaluation::Rejected(vec![RejectReason::OnlyStrictTier]);
        }

        let Some((eligible_cents, any_eligible)) = cart.eligible_cents(rule) else {
            return Evaluation::Rejected(vec![RejectReason::InvalidAmount]);
        };
        if !any_eligible {
            return Evaluation::Rejected(vec![RejectReason::NoEligibleItems]);
        }

        Evaluation::Applied {
            discount_cents: discount_cents(
                rule.discount_type,
                rule.value,
                eligible_cents,
                self.max_discount_cents(),
            ),
            eligible_cents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::coupons::pricing::CartItem;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn rule(code: &str, discount_type: DiscountType, value: f64, skus: &[&str]) -> CouponRule {
        CouponRule {
            code: code.to_string(),
            discount_type,
            value,
            allowed_skus: skus.iter().map(|s| s.to_string()).collect(),
            starts_at: None,
            ends_at: None,
        }
    }

    fn env(rule: CouponRule) -> CouponDefinition {
        CouponDefinition::Env(EnvCoupon {
            rule,
            origin: CouponSource::Env,
        })
    }

    fn persisted(rule: CouponRule) -> PersistedCoupon {
        PersistedCoupon {
            id: "p1".to_string(),
            rule,
            is_active: true,
            usage_limit: None,
            usage_count: 0,
            min_order_amount: None,
            max_discount_amount: None,
        }
    }

    fn item(sku: &str, price: f64) -> CartItem {
        CartItem {
            sku: Some(sku.to_string()),
            product_slug: None,
            price,
            quantity: 1,
        }
    }

    #[test]
    fn discount_type_aliases() {
        assert_eq!(DiscountType::parse("Percent"), Some(DiscountType::Percentage));
        assert_eq!(DiscountType::parse("amount"), Some(DiscountType::Fixed));
        assert_eq!(DiscountType::parse("bogo"), None);
    }

    #[test]
    fn sku_matching() {
        let open = rule("A", DiscountType::Fixed, 5.0, &[]);
        assert!(open.is_sku_allowed(None));
        assert!(rule("A", DiscountType::Fixed, 5.0, &["ALL"]).is_sku_allowed(Some("x")));
        assert!(rule("A", DiscountType::Fixed, 5.0, &["*"]).is_sku_allowed(Some("x")));

        let scoped = rule("A", DiscountType::Fixed, 5.0, &["Voucher-95"]);
        assert!(scoped.is_sku_allowed(Some("voucher-95")));
        assert!(!scoped.is_sku_allowed(Some("print")));
        assert!(!scoped.is_sku_allowed(None));
    }

    #[test]
    fn activity_window_bounds() {
        let mut r = rule("A", DiscountType::Fixed, 5.0, &[]);
        r.starts_at = Some(utc("2025-01-01T00:00:00Z"));
        r.ends_at = Some(utc("2025-12-31T23:59:59Z"));
        let c = env(r);

        assert_eq!(
            c.inactive_reasons(utc("2024-12-31T23:59:59Z")),
            vec![RejectReason::NotYetValid]
        );
        assert!(c.is_active(utc("2025-01-01T00:00:00Z")));
        assert!(c.is_active(utc("2025-12-31T23:59:59Z")));
        assert_eq!(
            c.inactive_reasons(utc("2026-01-01T00:00:00Z")),
            vec![RejectReason::Expired]
        );
    }

    #[test]
    fn persisted_reasons_are_collected() {
        let mut p = persisted(rule("P", DiscountType::Percentage, 10.0, &[]));
        p.is_active = false;
        p.usage_limit = Some(1);
        p.usage_count = 1;
        p.min_order_amount = Some(50.0);
        let c = CouponDefinition::Persisted(p);

        match c.evaluate(&Cart::Amount(20.0), false, Utc::now()) {
            Evaluation::Rejected(reasons) => assert_eq!(
                reasons,
                vec![
                    RejectReason::Inactive,
                    RejectReason::UsageLimitReached,
                    RejectReason::MinOrder { min_cents: 5000 },
                ]
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn strict_code_needs_95_item() {
        let c = env(rule("VCWIEN", DiscountType::Fixed, 50.0, &[]));
        let cheap = Cart::Items(vec![item("voucher-80", 80.0)]);
        assert_eq!(
            c.evaluate(&cheap, true, Utc::now()),
            Evaluation::Rejected(vec![RejectReason::OnlyStrictTier])
        );

        let mixed = Cart::Items(vec![item("print", 20.0), item("voucher-95", 95.0)]);
        assert_eq!(
            c.evaluate(&mixed, true, Utc::now()),
            Evaluation::Applied {
                discount_cents: 5000,
                eligible_cents: 11_500
            }
        );

        assert!(matches!(
            c.evaluate(&Cart::Amount(95.0), true, Utc::now()),
            Evaluation::Applied { .. }
        ));
        assert!(matches!(
            c.evaluate(&Cart::Amount(120.0), true, Utc::now()),
            Evaluation::Rejected(_)
        ));
    }

    #[test]
    fn discount_only_over_eligible_lines() {
        let c = env(rule("PRINTS", DiscountType::Percentage, 10.0, &["print"]));
        let cart = Cart::Items(vec![
            item("print", 30.0),
            CartItem {
                quantity: 2,
                ..item("print", 10.0)
            },
            item("voucher-95", 95.0),
        ]);
        assert_eq!(
            c.evaluate(&cart, false, Utc::now()),
            Evaluation::Applied {
                discount_cents: 500,
                eligible_cents: 5000
            }
        );

        let none = Cart::Items(vec![item("voucher-95", 95.0)]);
        assert_eq!(
            c.evaluate(&none, false, Utc::now()),
            Evaluation::Rejected(vec![RejectReason::NoEligibleItems])
        );
    }

    #[test]
    fn persisted_cap_applies() {
        let mut p = persisted(rule("HALF", DiscountType::Percentage, 50.0, &[]));
        p.max_discount_amount = Some(20.0);
        let c = CouponDefinition::Persisted(p);
        assert_eq!(
            c.evaluate(&Cart::Amount(100.0), false, Utc::now()),
            Evaluation::Applied {
                discount_cents: 2000,
                eligible_cents: 10_000
            }
        );
    }

    #[test]
    fn oversized_cart_is_rejected() {
        let c = env(rule("HALF", DiscountType::Percentage, 50.0, &[]));
        let cart = Cart::Items(vec![CartItem {
            quantity: 2,
            ..item("print", 9.0e16)
        }]);
        assert_eq!(
            c.evaluate(&cart, false, Utc::now()),
            Evaluation::Rejected(vec![RejectReason::InvalidAmount])
        );
        assert_eq!(
            c.evaluate(&Cart::Amount(-10.0), false, Utc::now()),
            Evaluation::Rejected(vec![RejectReason::InvalidAmount])
        );
        assert!(RejectReason::InvalidAmount
            .message(None)
            .contains("1000000000.00"));
    }

    #[test]
    fn reason_messages_are_localized() {
        assert_eq!(
            RejectReason::MinOrder { min_cents: 5000 }.message(None),
            "Minimum order amount of 50.00 EUR not reached"
        );
        assert!(RejectReason::OnlyStrictTier
            .message(Some("de"))
            .contains("95€"));
    }
}
