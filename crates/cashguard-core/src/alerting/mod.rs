//! Alerting engine for CashGuard
//!
//! Evaluates financial condition rules, tracks per-organization alert state
//! and delivers notifications once per activation, with a retry sweep for
//! failed deliveries.

mod evaluator;
mod notifier;
mod repository;
mod rules;
mod service;
mod store;
mod sweeper;

pub use evaluator::ConditionEvaluator;
pub use notifier::{
    AlertMessage, EmailChannel, LogChannel, NotificationChannel, NotificationError,
    RecipientResolver, StaticRecipients, WebhookChannel,
};
pub use repository::PostgresAlertStore;
pub use rules::{
    ConditionRule, RuleSet, CASH_RUNWAY_FAMILY, CRITICAL_CASH_RUNWAY,
    DEFAULT_CRITICAL_RUNWAY_DAYS, DEFAULT_WARNING_RUNWAY_DAYS, LOW_CASH_RUNWAY,
};
pub use service::TriggerEvaluationService;
pub use store::{AlertStateStore, InMemoryAlertStore};
pub use sweeper::RetrySweeper;
