//! Alert state storage contract and in-memory implementation

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::models::{AlertEvent, AlertState};

/// Persisted per-(organization, condition) alert state plus the event log.
///
/// Both transitions are compare-and-set: they apply only from the opposite
/// state and report whether they did, so concurrent evaluations of the same
/// condition produce at most one winner.
#[async_trait]
pub trait AlertStateStore: Send + Sync {
    /// Current state; an unknown pair is inactive with no timestamps
    async fn get(&self, organization_id: &str, condition_id: &str) -> Result<AlertState>;

    /// Set `active = true` if currently inactive
    async fn transition_to_active(
        &self,
        organization_id: &str,
        condition_id: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Set `active = false` if currently active
    async fn transition_to_resolved(
        &self,
        organization_id: &str,
        condition_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Claim dispatch attempt `attempt` for the activation that started at
    /// `triggered_at`. Applies only while that activation is current and
    /// `attempt - 1` was the last claimed attempt, so concurrent retry
    /// sweeps produce at most one dispatch per attempt.
    async fn claim_retry(
        &self,
        organization_id: &str,
        condition_id: &str,
        triggered_at: DateTime<Utc>,
        attempt: i32,
    ) -> Result<bool>;

    /// Append a dispatch record
    async fn record_event(&self, event: &AlertEvent) -> Result<()>;

    /// Most recent dispatch record for a pair
    async fn latest_event(
        &self,
        organization_id: &str,
        condition_id: &str,
    ) -> Result<Option<AlertEvent>>;

    /// Every stored state for an organization
    async fn list_states(&self, organization_id: &str) -> Result<Vec<AlertState>>;

    /// Organizations with an active condition whose latest dispatch failed
    async fn organizations_pending_redelivery(&self) -> Result<Vec<String>>;

    /// Check the store is reachable
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

type Key = (String, String);

fn key(organization_id: &str, condition_id: &str) -> Key {
    (organization_id.to_string(), condition_id.to_string())
}

#[derive(Default)]
struct Inner {
    states: HashMap<Key, AlertState>,
    events: Vec<AlertEvent>,
}

/// Process-local store, for tests and `--memory` runs
#[derive(Default)]
pub struct InMemoryAlertStore {
    inner: Mutex<Inner>,
}

impl InMemoryAlertStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, oldest first
    pub fn events(&self) -> Vec<AlertEvent> {
        self.inner.lock().events.clone()
    }
}

#[async_trait]
impl AlertStateStore for InMemoryAlertStore {
    async fn get(&self, organization_id: &str, condition_id: &str) -> Result<AlertState> {
        let mut inner = self.inner.lock();
        let state = inner
            .states
            .entry(key(organization_id, condition_id))
            .or_insert_with(|| AlertState::inactive(organization_id, condition_id));
        Ok(state.clone())
    }

    async fn transition_to_active(
        &self,
        organization_id: &str,
        condition_id: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        let state = inner
            .states
            .entry(key(organization_id, condition_id))
            .or_insert_with(|| AlertState::inactive(organization_id, condition_id));
        if state.active {
            return Ok(false);
        }
        state.active = true;
        state.last_triggered_at = Some(triggered_at);
        state.delivery_attempt = 1;
        Ok(true)
    }

    async fn transition_to_resolved(
        &self,
        organization_id: &str,
        condition_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.states.get_mut(&key(organization_id, condition_id)) {
            Some(state) if state.active => {
                state.active = false;
                state.last_resolved_at = Some(resolved_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_retry(
        &self,
        organization_id: &str,
        condition_id: &str,
        triggered_at: DateTime<Utc>,
        attempt: i32,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.states.get_mut(&key(organization_id, condition_id)) {
            Some(state)
                if state.active
                    && state.last_triggered_at == Some(triggered_at)
                    && state.delivery_attempt == attempt - 1 =>
            {
                state.delivery_attempt = attempt;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_event(&self, event: &AlertEvent) -> Result<()> {
        self.inner.lock().events.push(event.clone());
        Ok(())
    }

    async fn latest_event(
        &self,
        organization_id: &str,
        condition_id: &str,
    ) -> Result<Option<AlertEvent>> {
        let inner = self.inner.lock();
        Ok(inner
            .events
            .iter()
            .rev()
            .find(|e| e.organization_id == organization_id && e.condition_id == condition_id)
            .cloned())
    }

    async fn list_states(&self, organization_id: &str) -> Result<Vec<AlertState>> {
        let inner = self.inner.lock();
        let mut states: Vec<AlertState> = inner
            .states
            .values()
            .filter(|s| s.organization_id == organization_id)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.condition_id.cmp(&b.condition_id));
        Ok(states)
    }

    async fn organizations_pending_redelivery(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut latest: HashMap<Key, &AlertEvent> = HashMap::new();
        for event in &inner.events {
            latest.insert(key(&event.organization_id, &event.condition_id), event);
        }

        let organizations: BTreeSet<String> = inner
            .states
            .iter()
            .filter(|(_, state)| state.active)
            .filter_map(|(k, state)| latest.get(k).map(|event| (state, event)))
            .filter(|(state, event)| {
                !event.outcome.is_delivered() && event.attempt == state.delivery_attempt
            })
            .map(|(_, event)| event)
            .map(|event| event.organization_id.clone())
            .collect();

        Ok(organizations.into_iter().collect())
    }
}
