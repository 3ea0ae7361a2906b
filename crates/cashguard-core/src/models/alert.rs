//! Alert data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metrics::MetricsSnapshot;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Equal to
    Eq,
    /// Greater than or equal to
    Gte,
    /// Less than or equal to
    Lte,
    /// Not equal to
    Ne,
}

impl Operator {
    /// Compare a metric value against a threshold
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Eq => (value - threshold).abs() < f64::EPSILON,
            Operator::Gte => value >= threshold,
            Operator::Lte => value <= threshold,
            Operator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Warning
    #[default]
    Warning,
    /// Critical
    Critical,
}

impl Severity {
    /// Lowercase name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Parse the stored name, falling back to warning
    pub fn from_db(value: &str) -> Self {
        match value {
            "critical" => Severity::Critical,
            _ => Severity::Warning,
        }
    }
}

/// Per-organization, per-condition alert state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    /// Organization the state belongs to
    pub organization_id: String,

    /// Condition the state tracks
    pub condition_id: String,

    /// Alerted and not yet resolved
    pub active: bool,

    /// Start of the most recent activation
    pub last_triggered_at: Option<DateTime<Utc>>,

    /// Most recent resolution
    pub last_resolved_at: Option<DateTime<Utc>>,

    /// Dispatch attempts claimed for the current activation
    #[serde(default)]
    pub delivery_attempt: i32,
}

impl AlertState {
    /// Implicit state of a pair that has never been evaluated
    pub fn inactive(organization_id: impl Into<String>, condition_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            condition_id: condition_id.into(),
            active: false,
            last_triggered_at: None,
            last_resolved_at: None,
            delivery_attempt: 0,
        }
    }
}

/// Outcome of handing a message to a notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The channel accepted the message
    Delivered,
    /// The channel rejected the message or could not be reached
    Failed {
        /// Why delivery failed
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Build a failed outcome
    pub fn failed(reason: impl Into<String>) -> Self {
        DeliveryOutcome::Failed {
            reason: reason.into(),
        }
    }

    /// Whether the message was delivered
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    /// Failure reason, if any
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::Failed { reason } => Some(reason),
        }
    }
}

/// Write-once record of a dispatched notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique identifier
    pub id: Uuid,

    /// Organization that was alerted
    pub organization_id: String,

    /// Condition that triggered
    pub condition_id: String,

    /// Severity of the condition
    pub severity: Severity,

    // Snapshot values at trigger time
    /// Cash balance
    pub cash_balance: f64,

    /// Monthly burn rate
    pub monthly_burn_rate: f64,

    /// Runway in days (may be infinite)
    pub runway_days: f64,

    /// Activation this event belongs to
    pub triggered_at: DateTime<Utc>,

    /// When the channel call completed
    pub dispatched_at: DateTime<Utc>,

    /// Delivery outcome
    pub outcome: DeliveryOutcome,

    /// 1 for the first dispatch, incremented by each retry
    pub attempt: i32,
}

impl AlertEvent {
    /// Rebuild the snapshot the event was dispatched for
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            organization_id: self.organization_id.clone(),
            cash_balance: self.cash_balance,
            monthly_burn_rate: self.monthly_burn_rate,
            runway_days: Some(self.runway_days),
            captured_at: self.triggered_at,
        }
    }
}

/// Category of a per-condition failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Notification could not be delivered; the retry sweep will pick it up
    Delivery,
    /// Alert state could not be read or written
    Storage,
}

/// A condition that could not be fully processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    /// Condition affected
    pub condition_id: String,

    /// What failed
    pub kind: FailureKind,

    /// Human readable reason
    pub reason: String,

    /// Whether calling again later may succeed
    pub retryable: bool,
}

impl DispatchFailure {
    /// Failed delivery, always retryable by the sweep
    pub fn delivery(condition_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            condition_id: condition_id.into(),
            kind: FailureKind::Delivery,
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Failed store access
    pub fn storage(condition_id: impl Into<String>, error: &crate::error::Error) -> Self {
        Self {
            condition_id: condition_id.into(),
            kind: FailureKind::Storage,
            reason: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Result of reconciling one snapshot against stored state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Conditions that went inactive to active in this call
    pub newly_triggered: Vec<String>,

    /// Conditions that went active to inactive in this call
    pub newly_resolved: Vec<String>,

    /// Conditions satisfied and already active
    pub still_active: Vec<String>,

    /// Per-condition failures
    pub failures: Vec<DispatchFailure>,
}

impl EvaluationResult {
    /// Whether nothing changed and nothing failed
    pub fn is_quiet(&self) -> bool {
        self.newly_triggered.is_empty() && self.newly_resolved.is_empty() && self.failures.is_empty()
    }
}

/// Result of a retry sweep for one organization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResult {
    /// Conditions whose redelivery succeeded
    pub redelivered: Vec<String>,

    /// Conditions still failing after this sweep
    pub failures: Vec<DispatchFailure>,
}

impl SweepResult {
    /// Number of dispatch attempts made
    pub fn attempted(&self) -> usize {
        self.redelivered.len()
            + self
                .failures
                .iter()
                .filter(|f| f.kind == FailureKind::Delivery)
                .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Operator::Lte, 30.0, 30.0, true)]
    #[case(Operator::Lte, 30.5, 30.0, false)]
    #[case(Operator::Lt, 30.0, 30.0, false)]
    #[case(Operator::Gt, f64::INFINITY, 30.0, true)]
    #[case(Operator::Gte, 30.0, 30.0, true)]
    #[case(Operator::Eq, 30.0, 30.0, true)]
    #[case(Operator::Ne, 29.0, 30.0, true)]
    fn compares_against_threshold(
        #[case] op: Operator,
        #[case] value: f64,
        #[case] threshold: f64,
        #[case] expected: bool,
    ) {
        assert_eq!(op.compare(value, threshold), expected);
    }

    #[test]
    fn infinite_runway_never_below_threshold() {
        assert!(!Operator::Lte.compare(f64::INFINITY, 90.0));
    }

    #[test]
    fn delivery_outcome_serializes_with_status_tag() {
        let failed = DeliveryOutcome::failed("smtp timeout");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "reason": "smtp timeout"}));
        assert_eq!(failed.failure_reason(), Some("smtp timeout"));
        assert!(DeliveryOutcome::Delivered.is_delivered());
    }

    #[test]
    fn sweep_counts_only_delivery_attempts() {
        let result = SweepResult {
            redelivered: vec!["critical-cash-runway".into()],
            failures: vec![
                DispatchFailure::delivery("low-cash-runway", "bounced"),
                DispatchFailure::storage("other", &crate::error::Error::storage("timeout")),
            ],
        };
        assert_eq!(result.attempted(), 2);
    }
}
