pub mod calendar;
pub mod coupons;
pub mod init;
