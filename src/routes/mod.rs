pub mod calendar;
pub mod coupons;
pub mod health;

/// Application state backed by an in-memory database, with no env coupons
/// and a fast-failing calendar fetcher.
#[cfg(test)]
pub async fn test_state() -> std::sync::Arc<crate::AppState> {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::Config;
    use crate::services::calendar::{CalendarImportService, IcsFetcher};
    use crate::services::coupons::{CouponService, EnvCouponCache};

    let config = Config::default();
    let fetcher = IcsFetcher::new(&config.calendar)
        .expect("http client")
        .with_retry(2, Duration::from_millis(1));
    let calendar = CalendarImportService::new(&config.calendar)
        .expect("calendar service")
        .with_fetcher(fetcher);
    let cache = EnvCouponCache::with_loader(
        config.coupons.reload_seconds,
        config.calendar.default_zone(),
        Arc::new(|| None),
    );
    let coupons = CouponService::with_cache(cache, &config.coupons.strict_codes);

    Arc::new(crate::AppState {
        db: crate::db::test_pool().await,
        config,
        calendar,
        coupons,
    })
}
