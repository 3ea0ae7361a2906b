//! Trigger evaluation and alert dispatch

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics::MetricsProvider;
use crate::models::{
    AlertEvent, AlertState, DeliveryOutcome, DispatchFailure, EvaluationResult, MetricsSnapshot,
    SweepResult,
};

use super::evaluator::ConditionEvaluator;
use super::notifier::{AlertMessage, NotificationChannel, RecipientResolver};
use super::rules::{ConditionRule, RuleSet};
use super::store::AlertStateStore;

/// What reconciling one rule against stored state did
enum Reconciled {
    Triggered(Dispatched),
    Resolved,
    StillActive,
    Unchanged,
    Failed { failure: DispatchFailure, read: bool },
}

/// Result of one dispatch-and-record sequence
struct Dispatched {
    outcome: DeliveryOutcome,
    record_error: Option<Error>,
}

impl Dispatched {
    fn failures(self, condition_id: &str) -> Vec<DispatchFailure> {
        let mut failures = Vec::new();
        if let DeliveryOutcome::Failed { reason } = self.outcome {
            failures.push(DispatchFailure::delivery(condition_id, reason));
        }
        if let Some(e) = self.record_error {
            failures.push(DispatchFailure::storage(condition_id, &e));
        }
        failures
    }
}

/// Evaluates snapshots, reconciles them against stored alert state and
/// dispatches exactly one notification per inactive to active transition.
///
/// Holds no mutable state of its own; every call re-reads the store, which
/// is the only concurrency control.
pub struct TriggerEvaluationService {
    rules: RuleSet,
    store: Arc<dyn AlertStateStore>,
    channel: Arc<dyn NotificationChannel>,
    recipients: Arc<dyn RecipientResolver>,
    metrics: Option<Arc<dyn MetricsProvider>>,
}

impl TriggerEvaluationService {
    /// Create a new service
    pub fn new(
        rules: RuleSet,
        store: Arc<dyn AlertStateStore>,
        channel: Arc<dyn NotificationChannel>,
        recipients: Arc<dyn RecipientResolver>,
    ) -> Self {
        Self {
            rules,
            store,
            channel,
            recipients,
            metrics: None,
        }
    }

    /// Attach a metrics provider for [`Self::evaluate_current`]
    #[must_use]
    pub fn with_metrics_provider(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.metrics = Some(provider);
        self
    }

    /// The rule catalog
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Check the alert state store is reachable
    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }

    /// Current alert states for an organization
    pub async fn states(&self, organization_id: &str) -> Result<Vec<AlertState>> {
        self.store.list_states(organization_id).await
    }

    /// Reconcile every rule against `snapshot`
    pub async fn evaluate(
        &self,
        organization_id: &str,
        snapshot: &MetricsSnapshot,
    ) -> Result<EvaluationResult> {
        self.evaluate_family(organization_id, snapshot, None).await
    }

    /// Reconcile the rules of one family (all rules when `None`)
    pub async fn evaluate_family(
        &self,
        organization_id: &str,
        snapshot: &MetricsSnapshot,
        family: Option<&str>,
    ) -> Result<EvaluationResult> {
        snapshot.validate_for(organization_id)?;

        let rules = match family {
            Some(family) => self.rules.family(family),
            None => self.rules.clone(),
        };
        if rules.is_empty() {
            debug!(organization_id, ?family, "No rules selected");
            return Ok(EvaluationResult::default());
        }

        let satisfied = ConditionEvaluator::evaluate(snapshot, &rules);
        debug!(
            organization_id,
            runway_days = snapshot.runway_days(),
            satisfied = ?satisfied,
            "Evaluated conditions"
        );

        let outcomes = join_all(rules.iter().map(|rule| {
            self.reconcile(organization_id, rule, satisfied.contains(&rule.id), snapshot)
        }))
        .await;

        let mut result = EvaluationResult::default();
        let mut failed_reads = 0;
        let mut last_read_error = None;

        for (rule, outcome) in rules.iter().zip(outcomes) {
            match outcome {
                Reconciled::Triggered(dispatched) => {
                    result.newly_triggered.push(rule.id.clone());
                    result.failures.extend(dispatched.failures(&rule.id));
                }
                Reconciled::Resolved => result.newly_resolved.push(rule.id.clone()),
                Reconciled::StillActive => result.still_active.push(rule.id.clone()),
                Reconciled::Unchanged => {}
                Reconciled::Failed { failure, read } => {
                    if read {
                        failed_reads += 1;
                        last_read_error = Some(failure.reason.clone());
                    }
                    result.failures.push(failure);
                }
            }
        }

        if failed_reads == rules.len() {
            return Err(Error::StorageUnavailable(last_read_error.unwrap_or_default()));
        }

        Ok(result)
    }

    /// Fetch the current snapshot from the metrics provider and evaluate it
    pub async fn evaluate_current(
        &self,
        organization_id: &str,
        family: Option<&str>,
    ) -> Result<EvaluationResult> {
        let provider = self
            .metrics
            .as_ref()
            .ok_or_else(|| Error::config("no metrics provider configured"))?;
        let snapshot = provider.snapshot(organization_id).await?;
        self.evaluate_family(organization_id, &snapshot, family).await
    }

    async fn reconcile(
        &self,
        organization_id: &str,
        rule: &ConditionRule,
        satisfied: bool,
        snapshot: &MetricsSnapshot,
    ) -> Reconciled {
        let state = match self.store.get(organization_id, &rule.id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(organization_id, condition_id = %rule.id, error = %e, "Failed to read alert state");
                return Reconciled::Failed {
                    failure: DispatchFailure::storage(&rule.id, &e),
                    read: true,
                };
            }
        };

        match (satisfied, state.active) {
            (true, false) => {
                let triggered_at = now();
                match self
                    .store
                    .transition_to_active(organization_id, &rule.id, triggered_at)
                    .await
                {
                    Ok(true) => {
                        info!(
                            organization_id,
                            condition_id = %rule.id,
                            severity = rule.severity.as_str(),
                            "Alert triggered"
                        );
                        let dispatched = self
                            .dispatch(organization_id, rule, snapshot, triggered_at, 1)
                            .await;
                        Reconciled::Triggered(dispatched)
                    }
                    Ok(false) => {
                        debug!(
                            organization_id,
                            condition_id = %rule.id,
                            "Condition activated by a concurrent evaluation"
                        );
                        Reconciled::StillActive
                    }
                    Err(e) => {
                        warn!(organization_id, condition_id = %rule.id, error = %e, "Failed to activate alert");
                        Reconciled::Failed {
                            failure: DispatchFailure::storage(&rule.id, &e),
                            read: false,
                        }
                    }
                }
            }
            (true, true) => Reconciled::StillActive,
            (false, true) => {
                match self
                    .store
                    .transition_to_resolved(organization_id, &rule.id, now())
                    .await
                {
                    Ok(true) => {
                        info!(organization_id, condition_id = %rule.id, "Alert resolved");
                        Reconciled::Resolved
                    }
                    Ok(false) => Reconciled::Unchanged,
                    Err(e) => {
                        warn!(organization_id, condition_id = %rule.id, error = %e, "Failed to resolve alert");
                        Reconciled::Failed {
                            failure: DispatchFailure::storage(&rule.id, &e),
                            read: false,
                        }
                    }
                }
            }
            (false, false) => Reconciled::Unchanged,
        }
    }

    /// Format, send and record one notification. The recorded outcome is
    /// what the retry sweep later inspects.
    async fn dispatch(
        &self,
        organization_id: &str,
        rule: &ConditionRule,
        snapshot: &MetricsSnapshot,
        triggered_at: DateTime<Utc>,
        attempt: i32,
    ) -> Dispatched {
        let outcome = match self.recipients.recipients(organization_id).await {
            Ok(recipients) if recipients.is_empty() => {
                DeliveryOutcome::failed("no recipients for organization")
            }
            Ok(recipients) => {
                let message = AlertMessage {
                    organization_id: organization_id.to_string(),
                    condition_id: rule.id.clone(),
                    severity: rule.severity,
                    recipients,
                    subject: rule.render_subject(),
                    body: rule.render_body(snapshot),
                };
                self.channel.send(&message).await
            }
            Err(e) => DeliveryOutcome::failed(format!("recipient lookup failed: {e}")),
        };

        if let DeliveryOutcome::Failed { reason } = &outcome {
            error!(
                organization_id,
                condition_id = %rule.id,
                channel = self.channel.name(),
                attempt,
                reason = %reason,
                "Alert delivery failed"
            );
        }

        let event = AlertEvent {
            id: Uuid::new_v4(),
            organization_id: organization_id.to_string(),
            condition_id: rule.id.clone(),
            severity: rule.severity,
            cash_balance: snapshot.cash_balance,
            monthly_burn_rate: snapshot.monthly_burn_rate,
            runway_days: snapshot.runway_days(),
            triggered_at,
            dispatched_at: now(),
            outcome: outcome.clone(),
            attempt,
        };

        let record_error = match self.store.record_event(&event).await {
            Ok(()) => None,
            Err(e) => {
                error!(
                    organization_id,
                    condition_id = %rule.id,
                    event_id = %event.id,
                    error = %e,
                    "Failed to record alert event"
                );
                Some(e)
            }
        };

        Dispatched {
            outcome,
            record_error,
        }
    }

    /// Retry sweep: redeliver every active condition whose latest dispatch
    /// for the current activation failed. Does not re-evaluate metrics and
    /// never touches conditions that were delivered. Each retry claims its
    /// attempt number in the store first, so overlapping sweeps send once.
    pub async fn send_alerts_for_matching_conditions(
        &self,
        organization_id: &str,
    ) -> Result<SweepResult> {
        let states = self.store.list_states(organization_id).await?;

        let retries = join_all(
            states
                .iter()
                .filter(|state| state.active)
                .map(|state| self.retry_condition(organization_id, state)),
        )
        .await;

        let mut result = SweepResult::default();
        for (condition_id, dispatched) in retries.into_iter().flatten() {
            match dispatched {
                Ok(dispatched) => {
                    if dispatched.outcome.is_delivered() {
                        result.redelivered.push(condition_id.clone());
                    }
                    result.failures.extend(dispatched.failures(&condition_id));
                }
                Err(failure) => result.failures.push(failure),
            }
        }

        if !result.redelivered.is_empty() || !result.failures.is_empty() {
            info!(
                organization_id,
                redelivered = result.redelivered.len(),
                failed = result.failures.len(),
                "Retry sweep finished"
            );
        }

        Ok(result)
    }

    async fn retry_condition(
        &self,
        organization_id: &str,
        state: &AlertState,
    ) -> Option<(String, std::result::Result<Dispatched, DispatchFailure>)> {
        let condition_id = state.condition_id.clone();

        let Some(rule) = self.rules.get(&condition_id) else {
            warn!(
                organization_id,
                condition_id = %condition_id,
                "Active alert state references an unknown condition"
            );
            return None;
        };

        let latest = match self.store.latest_event(organization_id, &condition_id).await {
            Ok(latest) => latest?,
            Err(e) => {
                let failure = DispatchFailure::storage(&condition_id, &e);
                return Some((condition_id, Err(failure)));
            }
        };

        if latest.outcome.is_delivered() || state.last_triggered_at != Some(latest.triggered_at) {
            return None;
        }

        let attempt = latest.attempt + 1;
        match self
            .store
            .claim_retry(organization_id, &condition_id, latest.triggered_at, attempt)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    organization_id,
                    condition_id = %condition_id,
                    attempt,
                    "Retry already claimed"
                );
                return None;
            }
            Err(e) => {
                warn!(organization_id, condition_id = %condition_id, error = %e, "Failed to claim retry");
                let failure = DispatchFailure::storage(&condition_id, &e);
                return Some((condition_id, Err(failure)));
            }
        }

        debug!(
            organization_id,
            condition_id = %condition_id,
            attempt,
            "Retrying alert delivery"
        );

        let dispatched = self
            .dispatch(
                organization_id,
                rule,
                &latest.snapshot(),
                latest.triggered_at,
                attempt,
            )
            .await;

        Some((condition_id, Ok(dispatched)))
    }
}

/// Wall clock truncated to the precision the store keeps
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
