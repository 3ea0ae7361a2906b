//! Data models for CashGuard

mod alert;
mod metrics;

pub use alert::*;
pub use metrics::*;
