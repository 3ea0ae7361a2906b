//! # CashGuard
//!
//! Cash-runway alerting for multi-tenant finance dashboards.
//!
//! CashGuard decides which risk conditions an organization's current
//! financial metrics satisfy, tracks per-organization condition state so
//! repeat evaluations do not re-alert, and delivers one notification per
//! newly triggered condition, with a retry sweep for failed deliveries.
//!
//! ## Architecture
//!
//! - **Rules**: data-driven condition catalog evaluated by a pure evaluator
//! - **Store**: compare-and-set alert state in Postgres (or in memory)
//! - **Notifier**: e-mail API, webhook or log channels
//! - **API**: HTTP entry points for "evaluate now" and "retry delivery"
//!
//! ## Quick Start
//!
//! ```bash
//! # Apply migrations and start the API with the retry sweeper
//! cashguard db migrate
//! cashguard serve
//!
//! # Evaluate one organization from the command line
//! cashguard evaluate org1 --balance 4000 --burn 5000
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{
        AlertStateStore, ConditionEvaluator, InMemoryAlertStore, NotificationChannel,
        RecipientResolver, RuleSet, TriggerEvaluationService,
    };
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
}
