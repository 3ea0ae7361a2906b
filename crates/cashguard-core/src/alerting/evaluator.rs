//! Condition evaluation

use std::collections::BTreeSet;

use crate::models::MetricsSnapshot;

use super::rules::RuleSet;

/// Decides which conditions a snapshot satisfies.
///
/// Stateless: the same snapshot against the same rule set always yields the
/// same set, and every satisfied rule is reported.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Ids of every rule in `rules` satisfied by `snapshot`
    pub fn evaluate(snapshot: &MetricsSnapshot, rules: &RuleSet) -> BTreeSet<String> {
        rules
            .iter()
            .filter(|rule| rule.check(snapshot))
            .map(|rule| rule.id.clone())
            .collect()
    }
}
