use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::db::{CouponRepository, CreateCoupon};
use crate::error::{AppError, AppResult};
use crate::services::coupons::{
    CouponStore, CouponSummary, CouponValidation, DiscountType, RedeemOutcome,
    ValidateCouponRequest,
};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_coupons).post(create_coupon))
        .route("/validate", post(validate_coupon))
        .route("/redeem", post(redeem_coupon))
        .route("/refresh", post(refresh_coupons))
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
    pub lang: Option<String>,
}

/// Always answers 200; business-rule failures and unreadable bodies are
/// `valid: false`.
async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ValidateCouponRequest>, JsonRejection>,
) -> AppResult<Json<CouponValidation>> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!("Unreadable coupon request: {}", rejection.body_text());
            return Ok(Json(CouponValidation::malformed(
                &rejection.body_text(),
                None,
            )));
        }
    };
    let store: &dyn CouponStore = &state.db;
    let result = state
        .coupons
        .validate(Some(store), request, Utc::now())
        .await?;
    Ok(Json(result))
}

async fn redeem_coupon(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RedeemRequest>,
) -> AppResult<Json<RedeemOutcome>> {
    let store: &dyn CouponStore = &state.db;
    let outcome = state
        .coupons
        .redeem(Some(store), &request.code, request.lang.as_deref(), Utc::now())
        .await?;
    Ok(Json(outcome))
}

/// Reload `COUPONS_JSON` without waiting for the cache to expire.
async fn refresh_coupons(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let loaded = state.coupons.refresh(Utc::now());
    Json(json!({ "loaded": loaded }))
}

async fn list_coupons(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<CouponSummary>>> {
    let store: &dyn CouponStore = &state.db;
    let coupons = state.coupons.list_all(Some(store), Utc::now()).await?;
    Ok(Json(coupons))
}

async fn create_coupon(
    State(state): State<Arc<AppState>>,
    Json(mut create): Json<CreateCoupon>,
) -> AppResult<(StatusCode, Json<CouponSummary>)> {
    create.code = create.code.trim().to_uppercase();
    if create.code.is_empty() {
        return Err(AppError::Validation("Coupon code is required".to_string()));
    }
    let discount_type = DiscountType::parse(&create.discount_type).ok_or_else(|| {
        AppError::Validation(format!("Unknown discount type '{}'", create.discount_type))
    })?;
    if !create.discount_value.is_finite() || create.discount_value < 0.0 {
        return Err(AppError::Validation(
            "Discount value must be a non-negative number".to_string(),
        ));
    }
    if discount_type == DiscountType::Percentage && create.discount_value > 100.0 {
        return Err(AppError::Validation(
            "Percentage discount must be between 0 and 100".to_string(),
        ));
    }
    if let (Some(start), Some(end)) = (create.starts_at, create.ends_at) {
        if end < start {
            return Err(AppError::Validation(
                "Coupon end date is before its start date".to_string(),
            ));
        }
    }
    create.discount_type = discount_type.as_str().to_string();

    let row = CouponRepository::create(&state.db, create).await?;
    tracing::info!("Created coupon {}", row.code);

    let code = row.code.clone();
    let store: &dyn CouponStore = &state.db;
    let summary = state
        .coupons
        .list_all(Some(store), Utc::now())
        .await?
        .into_iter()
        .find(|c| c.code == code)
        .ok_or_else(|| AppError::NotFound(code.clone()))?;

    Ok((StatusCode::CREATED, Json(summary)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_state;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn app() -> Router {
        Router::new()
            .nest("/api/coupons", router())
            .with_state(test_state().await)
    }

    async fn post(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validate_is_always_200() {
        let app = app().await;

        let (status, body) = post(
            &app,
            "/api/coupons/validate",
            json!({ "code": "VCWIEN", "items": [{ "sku": "voucher-80", "price": 80, "quantity": 1 }] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
        assert_eq!(body["error"], "Voucher only valid for the 95€ voucher tier");

        let (status, body) = post(
            &app,
            "/api/coupons/validate",
            json!({ "code": "vcwien", "items": [
                { "sku": "voucher-95", "price": 95, "quantity": 1 },
                { "productSlug": "print-a4", "price": 12.5, "quantity": 2 }
            ] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["coupon"]["code"], "VCWIEN");
        assert_eq!(body["coupon"]["discountType"], "fixed");
        assert_eq!(body["coupon"]["discountAmount"], 50.0);
    }

    #[tokio::test]
    async fn malformed_or_oversized_cart_is_a_structured_rejection() {
        let app = app().await;

        let (status, body) = post(
            &app,
            "/api/coupons/validate",
            json!({ "code": "CL50", "items": [{ "sku": "voucher-95", "quantity": 1 }] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid coupon request"));

        let (status, body) = post(
            &app,
            "/api/coupons/validate",
            json!({ "code": "CL50", "items": [
                { "sku": "voucher-95", "price": 95 },
                { "sku": "print", "price": 9.0e16, "quantity": 2 }
            ] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
        assert!(body["error"].as_str().unwrap().contains("at most"));
    }

    #[tokio::test]
    async fn create_then_validate_persisted_coupon() {
        let app = app().await;

        let (status, created) = post(
            &app,
            "/api/coupons",
            json!({ "code": "prints10", "discountType": "percent", "discountValue": 10,
                    "allowedSkus": ["print-a4"] }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["code"], "PRINTS10");
        assert_eq!(created["source"], "persisted");

        let (_, body) = post(
            &app,
            "/api/coupons/validate",
            json!({ "code": "PRINTS10", "items": [
                { "sku": "print-a4", "price": 20, "quantity": 3 },
                { "sku": "voucher-95", "price": 95 }
            ] }),
        )
        .await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["coupon"]["discountAmount"], 6.0);
        assert_eq!(body["coupon"]["eligibleSubtotal"], 60.0);

        let (status, _) = post(
            &app,
            "/api/coupons",
            json!({ "code": "BAD", "discountType": "percentage", "discountValue": 150 }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn redeem_and_refresh() {
        let app = app().await;

        let (status, body) = post(&app, "/api/coupons/redeem", json!({ "code": "cl50" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "built_in");
        assert_eq!(body["counted"], false);

        let (status, body) = post(&app, "/api/coupons/redeem", json!({ "code": "NOPE" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, body) = post(&app, "/api/coupons/refresh", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["loaded"].is_number());
    }

    #[tokio::test]
    async fn list_includes_builtins() {
        let app = app().await;
        let resp = app
            .oneshot(Request::get("/api/coupons").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let list: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let codes: Vec<_> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["code"].as_str().unwrap().to_string())
            .collect();
        for code in ["CL50", "VCWIEN", "VW50", "WL50"] {
            assert!(codes.contains(&code.to_string()), "{code}");
        }
    }
}
