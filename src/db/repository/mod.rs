pub mod coupon_repository;
pub mod session_repository;

pub use coupon_repository::CouponRepository;
pub use session_repository::SessionRepository;
