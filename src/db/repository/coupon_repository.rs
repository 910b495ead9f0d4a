use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CouponRow, CreateCoupon};
use crate::error::{AppError, AppResult};

const COUPON_COLUMNS: &str = "id, code, discount_type, discount_value, allowed_skus, starts_at, \
                              ends_at, is_active, usage_limit, usage_count, min_order_amount, \
                              max_discount_amount, created_at, updated_at";

/// Repository for persisted coupons (`coupons` table).
pub struct CouponRepository;

impl CouponRepository {
    /// Look up a coupon by code, ignoring case.
    pub async fn find_by_code(pool: &SqlitePool, code: &str) -> AppResult<Option<CouponRow>> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE UPPER(code) = UPPER(?)");
        sqlx::query_as::<_, CouponRow>(&sql)
            .bind(code.trim())
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<CouponRow>> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons ORDER BY code ASC");
        sqlx::query_as::<_, CouponRow>(&sql)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Insert a coupon. Codes are stored upper-cased.
    pub async fn create(pool: &SqlitePool, create: CreateCoupon) -> AppResult<CouponRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let allowed_skus = serde_json::to_string(&create.allowed_skus)
            .map_err(|e| AppError::Internal(e.into()))?;

        let sql = format!(
            r#"
            INSERT INTO coupons (
                id, code, discount_type, discount_value, allowed_skus, starts_at, ends_at,
                is_active, usage_limit, usage_count, min_order_amount, max_discount_amount,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            RETURNING {COUPON_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, CouponRow>(&sql)
            .bind(&id)
            .bind(create.code.trim().to_uppercase())
            .bind(&create.discount_type)
            .bind(create.discount_value)
            .bind(&allowed_skus)
            .bind(create.starts_at)
            .bind(create.ends_at)
            .bind(create.is_active)
            .bind(create.usage_limit)
            .bind(create.min_order_amount)
            .bind(create.max_discount_amount)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AppError::Validation(format!("Coupon code {} already exists", create.code))
                }
                other => AppError::Database(other),
            })?;

        Ok(record)
    }

    /// Count one redemption. Returns `false` when the coupon is missing,
    /// inactive or already at its usage limit.
    pub async fn increment_usage(pool: &SqlitePool, code: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET usage_count = usage_count + 1, updated_at = ?
            WHERE UPPER(code) = UPPER(?)
              AND is_active = 1
              AND (usage_limit IS NULL OR usage_count < usage_limit)
            "#,
        )
        .bind(now)
        .bind(code.trim())
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn coupon(code: &str) -> CreateCoupon {
        CreateCoupon {
            code: code.to_string(),
            discount_type: "percentage".to_string(),
            discount_value: 10.0,
            allowed_skus: vec!["print-a4".to_string()],
            starts_at: None,
            ends_at: None,
            is_active: true,
            usage_limit: Some(2),
            min_order_amount: None,
            max_discount_amount: Some(20.0),
        }
    }

    #[tokio::test]
    async fn lookup_ignores_case() {
        let pool = test_pool().await;
        let created = CouponRepository::create(&pool, coupon("summer10")).await.unwrap();
        assert_eq!(created.code, "SUMMER10");
        assert_eq!(created.allowed_skus(), vec!["print-a4".to_string()]);

        let found = CouponRepository::find_by_code(&pool, " Summer10 ")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert!(CouponRepository::find_by_code(&pool, "WINTER")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_code_is_a_validation_error() {
        let pool = test_pool().await;
        CouponRepository::create(&pool, coupon("DUP")).await.unwrap();
        let err = CouponRepository::create(&pool, coupon("dup")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn usage_stops_at_limit() {
        let pool = test_pool().await;
        CouponRepository::create(&pool, coupon("TWICE")).await.unwrap();

        assert!(CouponRepository::increment_usage(&pool, "twice").await.unwrap());
        assert!(CouponRepository::increment_usage(&pool, "TWICE").await.unwrap());
        assert!(!CouponRepository::increment_usage(&pool, "TWICE").await.unwrap());

        let row = CouponRepository::find_by_code(&pool, "TWICE")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.usage_count, 2);
    }

    #[test]
    fn comma_separated_skus_are_accepted() {
        let row = CouponRow {
            id: "1".to_string(),
            code: "X".to_string(),
            discount_type: "fixed".to_string(),
            discount_value: 5.0,
            allowed_skus: "a4, a3".to_string(),
            starts_at: None,
            ends_at: None,
            is_active: true,
            usage_limit: None,
            usage_count: 0,
            min_order_amount: None,
            max_discount_amount: None,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };
        assert_eq!(row.allowed_skus(), vec!["a4".to_string(), "a3".to_string()]);
    }
}
