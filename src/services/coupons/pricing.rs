//! Cart arithmetic. Amounts arrive as major units (EUR) and are converted to
//! integer cents before any sum or percentage is taken.

use serde::{Deserialize, Deserializer};

use super::definition::{CouponRule, DiscountType};

/// Price of the voucher tier the strict codes are tied to.
pub const STRICT_TIER_PRICE: f64 = 95.0;
const STRICT_TIER_TOLERANCE: f64 = 1e-6;

/// Largest price, line or order amount accepted from a cart (1 billion EUR).
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

/// Cents for a configured amount, clamped to `±MAX_AMOUNT_CENTS`.
pub fn to_cents(amount: f64) -> i64 {
    if !amount.is_finite() {
        return 0;
    }
    let limit = MAX_AMOUNT_CENTS as f64;
    (amount * 100.0).round().clamp(-limit, limit) as i64
}

/// Cents for an amount taken from a cart; `None` when negative, not finite
/// or above `MAX_AMOUNT_CENTS`.
pub fn cart_cents(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let cents = (amount * 100.0).round();
    (cents <= MAX_AMOUNT_CENTS as f64).then_some(cents as i64)
}

pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// `1234` -> `"12.34"`
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub sku: Option<String>,
    pub product_slug: Option<String>,
    /// Unit price in major units.
    pub price: f64,
    #[serde(default = "default_quantity", deserialize_with = "deserialize_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// Quantities below one (including negative or fractional input) count as one.
fn deserialize_quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or(1.0);
    Ok(if raw.is_finite() && raw >= 1.0 {
        raw.floor().min(u32::MAX as f64) as u32
    } else {
        1
    })
}

impl CartItem {
    /// SKU used for eligibility: `sku`, else `productSlug`.
    pub fn key(&self) -> Option<&str> {
        self.sku
            .as_deref()
            .or(self.product_slug.as_deref())
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    fn quantity(&self) -> i64 {
        i64::from(self.quantity.max(1))
    }

    /// `price * quantity` in cents, `None` when out of range.
    pub fn line_cents(&self) -> Option<i64> {
        cart_cents(self.price)?
            .checked_mul(self.quantity())
            .filter(|cents| *cents <= MAX_AMOUNT_CENTS)
    }

    pub fn is_strict_tier(&self) -> bool {
        (self.price - STRICT_TIER_PRICE).abs() < STRICT_TIER_TOLERANCE
    }
}

/// What the discount is computed over.
#[derive(Debug, Clone, PartialEq)]
pub enum Cart {
    Items(Vec<CartItem>),
    /// Legacy callers without an itemized cart: the whole amount is one line
    /// that every coupon applies to.
    Amount(f64),
}

impl Cart {
    /// Items win over the amount; an empty item list counts as absent.
    pub fn from_parts(items: Option<Vec<CartItem>>, order_amount: Option<f64>) -> Option<Self> {
        match (items, order_amount) {
            (Some(items), _) if !items.is_empty() => Some(Cart::Items(items)),
            (_, Some(amount)) => Some(Cart::Amount(amount)),
            _ => None,
        }
    }

    /// Whole cart in cents; `None` when any amount is out of range.
    pub fn total_cents(&self) -> Option<i64> {
        match self {
            Cart::Items(items) => sum_lines(items.iter()),
            Cart::Amount(amount) => cart_cents(*amount),
        }
    }

    /// Subtotal of the lines `rule` applies to, plus whether any line matched.
    pub fn eligible_cents(&self, rule: &CouponRule) -> Option<(i64, bool)> {
        match self {
            Cart::Items(items) => {
                let eligible: Vec<_> = items
                    .iter()
                    .filter(|i| rule.is_sku_allowed(i.key()))
                    .collect();
                let any_eligible = !eligible.is_empty();
                Some((sum_lines(eligible.into_iter())?, any_eligible))
            }
            Cart::Amount(amount) => Some((cart_cents(*amount)?, true)),
        }
    }

    /// True when an eligible line has a unit price of exactly 95.
    pub fn has_strict_tier_item(&self, rule: &CouponRule) -> bool {
        match self {
            Cart::Items(items) => items
                .iter()
                .any(|i| rule.is_sku_allowed(i.key()) && i.is_strict_tier()),
            Cart::Amount(amount) => (amount - STRICT_TIER_PRICE).abs() < STRICT_TIER_TOLERANCE,
        }
    }
}

fn sum_lines<'a>(mut lines: impl Iterator<Item = &'a CartItem>) -> Option<i64> {
    lines.try_fold(0i64, |acc, item| {
        acc.checked_add(item.line_cents()?)
            .filter(|cents| *cents <= MAX_AMOUNT_CENTS)
    })
}

/// Discount in cents for `subtotal_cents`, never above the subtotal.
pub fn discount_cents(
    discount_type: DiscountType,
    value: f64,
    subtotal_cents: i64,
    max_discount_cents: Option<i64>,
) -> i64 {
    let subtotal = subtotal_cents.max(0);
    let discount = match discount_type {
        DiscountType::Percentage => {
            let value = if value.is_finite() { value } else { 0.0 };
            let basis_points = (value.clamp(0.0, 100.0) * 100.0).round() as i128;
            // half-up; the result is at most `subtotal`, so it fits back into i64
            let raw = ((i128::from(subtotal) * basis_points + 5_000) / 10_000) as i64;
            match max_discount_cents {
                Some(cap) => raw.min(cap.max(0)),
                None => raw,
            }
        }
        DiscountType::Fixed => to_cents(value).max(0),
    };
    discount.min(subtotal)
}
