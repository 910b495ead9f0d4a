use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Coupon Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CouponRow {
    pub id: String,
    pub code: String,
    /// `percentage` or `fixed`
    pub discount_type: String,
    pub discount_value: f64,
    /// JSON array of SKUs
    pub allowed_skus: String,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub is_active: bool,
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
    pub min_order_amount: Option<f64>,
    pub max_discount_amount: Option<f64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CouponRow {
    /// Decoded `allowed_skus`. Values that are not a JSON array are read as a
    /// comma separated list.
    pub fn allowed_skus(&self) -> Vec<String> {
        serde_json::from_str(&self.allowed_skus).unwrap_or_else(|_| {
            self.allowed_skus
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCoupon {
    pub code: String,
    pub discount_type: String,
    pub discount_value: f64,
    #[serde(default)]
    pub allowed_skus: Vec<String>,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub usage_limit: Option<i64>,
    pub min_order_amount: Option<f64>,
    pub max_discount_amount: Option<f64>,
}

fn default_true() -> bool {
    true
}
