//! Financial metrics snapshot model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Days per month used when converting a monthly burn into runway days
pub const DAYS_PER_MONTH: f64 = 30.0;

/// Snapshot field a condition predicate can compare against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Days of cash left at the current burn
    RunwayDays,
    /// Current cash balance
    CashBalance,
    /// Monthly burn rate
    MonthlyBurnRate,
}

impl Metric {
    /// Stable name used in storage and templates
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::RunwayDays => "runway_days",
            Metric::CashBalance => "cash_balance",
            Metric::MonthlyBurnRate => "monthly_burn_rate",
        }
    }
}

/// Immutable financial figures for one organization at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Organization the figures belong to
    pub organization_id: String,

    /// Current cash balance (may be zero or negative)
    pub cash_balance: f64,

    /// Monthly burn rate (zero or negative means no burn)
    pub monthly_burn_rate: f64,

    /// Precomputed runway, derived from balance and burn when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runway_days: Option<f64>,

    /// When the metrics provider produced the figures; time of receipt when
    /// the provider omits it. No predicate reads it.
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Create a snapshot without a precomputed runway
    pub fn new(organization_id: impl Into<String>, cash_balance: f64, monthly_burn_rate: f64) -> Self {
        Self {
            organization_id: organization_id.into(),
            cash_balance,
            monthly_burn_rate,
            runway_days: None,
            captured_at: Utc::now(),
        }
    }

    /// Attach a runway computed by the caller
    #[must_use]
    pub fn with_runway_days(mut self, runway_days: f64) -> Self {
        self.runway_days = Some(runway_days);
        self
    }

    /// Runway in days, supplied or derived
    pub fn runway_days(&self) -> f64 {
        self.runway_days
            .unwrap_or_else(|| derive_runway_days(self.cash_balance, self.monthly_burn_rate))
    }

    /// Value of a metric for predicate evaluation
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::RunwayDays => self.runway_days(),
            Metric::CashBalance => self.cash_balance,
            Metric::MonthlyBurnRate => self.monthly_burn_rate,
        }
    }

    /// Reject snapshots that cannot be evaluated
    pub fn validate(&self) -> Result<()> {
        if self.organization_id.trim().is_empty() {
            return Err(Error::validation("organization_id must not be empty"));
        }
        if !self.cash_balance.is_finite() {
            return Err(Error::validation(format!(
                "cash_balance must be finite, got {}",
                self.cash_balance
            )));
        }
        if !self.monthly_burn_rate.is_finite() {
            return Err(Error::validation(format!(
                "monthly_burn_rate must be finite, got {}",
                self.monthly_burn_rate
            )));
        }
        if let Some(days) = self.runway_days {
            if days.is_nan() || days < 0.0 {
                return Err(Error::validation(format!(
                    "runway_days must be a non-negative number, got {days}"
                )));
            }
        }
        Ok(())
    }

    /// Validate and check the snapshot belongs to `organization_id`
    pub fn validate_for(&self, organization_id: &str) -> Result<()> {
        self.validate()?;
        if self.organization_id != organization_id {
            return Err(Error::validation(format!(
                "snapshot belongs to organization '{}', not '{}'",
                self.organization_id, organization_id
            )));
        }
        Ok(())
    }
}

/// Runway in days from balance and monthly burn.
///
/// No burn yields an unlimited runway; a positive burn against an empty or
/// negative balance yields zero.
pub fn derive_runway_days(cash_balance: f64, monthly_burn_rate: f64) -> f64 {
    if cash_balance > 0.0 && monthly_burn_rate > 0.0 {
        cash_balance / monthly_burn_rate * DAYS_PER_MONTH
    } else if monthly_burn_rate <= 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}
