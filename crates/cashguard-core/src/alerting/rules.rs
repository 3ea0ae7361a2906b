//! Condition rule catalog

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Metric, MetricsSnapshot, Operator, Severity};

/// Condition fired when runway drops to the critical threshold
pub const CRITICAL_CASH_RUNWAY: &str = "critical-cash-runway";

/// Condition fired when runway drops to the warning threshold
pub const LOW_CASH_RUNWAY: &str = "low-cash-runway";

/// Family containing the runway conditions
pub const CASH_RUNWAY_FAMILY: &str = "cash-runway";

/// Default critical runway threshold in days
pub const DEFAULT_CRITICAL_RUNWAY_DAYS: f64 = 30.0;

/// Default warning runway threshold in days
pub const DEFAULT_WARNING_RUNWAY_DAYS: f64 = 90.0;

/// A named boolean rule over a metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    /// Stable identifier, e.g. `critical-cash-runway`
    pub id: String,

    /// Human-readable label
    pub label: String,

    /// Family used by callers to select a subset of rules
    pub family: String,

    /// Severity of the alert
    pub severity: Severity,

    /// Snapshot field compared
    pub metric: Metric,

    /// Comparison operator
    pub operator: Operator,

    /// Threshold value
    pub threshold: f64,

    /// Body template, see [`ConditionRule::render_body`]
    pub message_template: String,
}

impl ConditionRule {
    /// Check if a snapshot satisfies this rule
    pub fn check(&self, snapshot: &MetricsSnapshot) -> bool {
        self.operator
            .compare(snapshot.value(self.metric), self.threshold)
    }

    /// Notification subject line
    pub fn render_subject(&self) -> String {
        format!("[{}] {}", self.severity.as_str().to_uppercase(), self.label)
    }

    /// Fill the message template with snapshot values.
    ///
    /// Supported placeholders: `{organization}`, `{label}`, `{runway_days}`,
    /// `{cash_balance}`, `{burn_rate}`, `{threshold}`.
    pub fn render_body(&self, snapshot: &MetricsSnapshot) -> String {
        self.message_template
            .replace("{organization}", &snapshot.organization_id)
            .replace("{label}", &self.label)
            .replace("{runway_days}", &format_days(snapshot.runway_days()))
            .replace("{cash_balance}", &format!("{:.2}", snapshot.cash_balance))
            .replace("{burn_rate}", &format!("{:.2}", snapshot.monthly_burn_rate))
            .replace("{threshold}", &self.threshold.to_string())
    }
}

fn format_days(days: f64) -> String {
    if days.is_finite() {
        format!("{days:.0}")
    } else {
        "unlimited".to_string()
    }
}

/// Ordered catalog of condition rules, evaluated independently
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<ConditionRule>,
}

impl RuleSet {
    /// Build a rule set, rejecting duplicate ids
    pub fn new(rules: Vec<ConditionRule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(Error::config(format!("duplicate condition id '{}'", rule.id)));
            }
        }
        Ok(Self { rules })
    }

    /// Rule set with no rules
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in runway catalog
    pub fn cash_runway(critical_days: f64, warning_days: f64) -> Self {
        Self {
            rules: vec![
                ConditionRule {
                    id: CRITICAL_CASH_RUNWAY.to_string(),
                    label: "Critical cash runway".to_string(),
                    family: CASH_RUNWAY_FAMILY.to_string(),
                    severity: Severity::Critical,
                    metric: Metric::RunwayDays,
                    operator: Operator::Lte,
                    threshold: critical_days,
                    message_template: "Cash runway for {organization} is critically low: \
                        {runway_days} days left (threshold {threshold} days). \
                        Balance {cash_balance}, monthly burn {burn_rate}."
                        .to_string(),
                },
                ConditionRule {
                    id: LOW_CASH_RUNWAY.to_string(),
                    label: "Low cash runway".to_string(),
                    family: CASH_RUNWAY_FAMILY.to_string(),
                    severity: Severity::Warning,
                    metric: Metric::RunwayDays,
                    operator: Operator::Lte,
                    threshold: warning_days,
                    message_template: "Cash runway for {organization} is running low: \
                        {runway_days} days left (threshold {threshold} days). \
                        Balance {cash_balance}, monthly burn {burn_rate}."
                        .to_string(),
                },
            ],
        }
    }

    /// Rules belonging to `family`, in catalog order
    pub fn family(&self, family: &str) -> Self {
        Self {
            rules: self
                .rules
                .iter()
                .filter(|r| r.family == family)
                .cloned()
                .collect(),
        }
    }

    /// Look up a rule by condition id
    pub fn get(&self, condition_id: &str) -> Option<&ConditionRule> {
        self.rules.iter().find(|r| r.id == condition_id)
    }

    /// Iterate rules in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &ConditionRule> {
        self.rules.iter()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for ConditionRule {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            family: CASH_RUNWAY_FAMILY.to_string(),
            severity: Severity::default(),
            metric: Metric::RunwayDays,
            operator: Operator::Lte,
            threshold: 0.0,
            message_template: "{label} for {organization}".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> RuleSet {
        RuleSet::cash_runway(DEFAULT_CRITICAL_RUNWAY_DAYS, DEFAULT_WARNING_RUNWAY_DAYS)
    }

    #[test]
    fn rejects_duplicate_ids() {
        let rule = ConditionRule {
            id: "dup".into(),
            ..ConditionRule::default()
        };
        let err = RuleSet::new(vec![rule.clone(), rule]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn family_selection_keeps_order() {
        let mut rules: Vec<ConditionRule> = catalog().iter().cloned().collect();
        rules.insert(
            1,
            ConditionRule {
                id: "negative-balance".into(),
                family: "balance".into(),
                metric: Metric::CashBalance,
                operator: Operator::Lt,
                ..ConditionRule::default()
            },
        );
        let set = RuleSet::new(rules).unwrap();

        let runway = set.family(CASH_RUNWAY_FAMILY);
        let runway: Vec<&str> = runway.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(runway, vec![CRITICAL_CASH_RUNWAY, LOW_CASH_RUNWAY]);
        assert_eq!(set.family("balance").len(), 1);
        assert!(set.family("unknown").is_empty());
    }

    #[test]
    fn renders_subject_and_body() {
        let set = catalog();
        let rule = set.get(CRITICAL_CASH_RUNWAY).unwrap();
        let snapshot = MetricsSnapshot::new("org1", 4_000.0, 5_000.0);

        assert_eq!(rule.render_subject(), "[CRITICAL] Critical cash runway");
        assert_eq!(
            rule.render_body(&snapshot),
            "Cash runway for org1 is critically low: 24 days left (threshold 30 days). \
             Balance 4000.00, monthly burn 5000.00."
        );
    }

    #[test]
    fn renders_unlimited_runway() {
        let rule = ConditionRule {
            message_template: "{runway_days}".into(),
            ..ConditionRule::default()
        };
        assert_eq!(rule.render_body(&MetricsSnapshot::new("org1", 1.0, 0.0)), "unlimited");
    }
}
