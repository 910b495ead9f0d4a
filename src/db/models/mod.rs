//! Database models split into separate files.
//! Re-exported so `use crate::db::models::*;` reaches every row type.

pub mod coupon;
pub mod session;

pub use self::coupon::*;
pub use self::session::*;
