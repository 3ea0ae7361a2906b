//! Shared test doubles for the alerting integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cashguard::alerting::{
    AlertMessage, AlertStateStore, InMemoryAlertStore, NotificationChannel, RecipientResolver,
    RuleSet, StaticRecipients, TriggerEvaluationService,
};
use cashguard::models::{AlertEvent, AlertState, DeliveryOutcome, MetricsSnapshot};
use cashguard::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub const ORG: &str = "org1";

/// Channel that records every message and can be switched to fail
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<AlertMessage>>,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let channel = Self::default();
        channel.failing.store(true, Ordering::SeqCst);
        Arc::new(channel)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn sent(&self) -> Vec<AlertMessage> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn count_for(&self, condition_id: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.condition_id == condition_id)
            .count()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &AlertMessage) -> DeliveryOutcome {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.sent.lock().push(message.clone());
        if self.failing.load(Ordering::SeqCst) {
            DeliveryOutcome::failed("smtp unavailable")
        } else {
            DeliveryOutcome::Delivered
        }
    }
}

/// Wraps the in-memory store with injectable faults and read latency
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryAlertStore,
    failing_reads: Mutex<HashSet<String>>,
    fail_everything: AtomicBool,
    fail_records: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_reads_for(&self, condition_id: &str) {
        self.failing_reads.lock().insert(condition_id.to_string());
    }

    pub fn fail_everything(&self, fail: bool) {
        self.fail_everything.store(fail, Ordering::SeqCst);
    }

    pub fn fail_records(&self, fail: bool) {
        self.fail_records.store(fail, Ordering::SeqCst);
    }

    pub fn delay_reads(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_everything.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertStateStore for FaultyStore {
    async fn get(&self, organization_id: &str, condition_id: &str) -> Result<AlertState> {
        self.check_available()?;
        if self.failing_reads.lock().contains(condition_id) {
            return Err(Error::storage("could not serialize access"));
        }
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get(organization_id, condition_id).await
    }

    async fn transition_to_active(
        &self,
        organization_id: &str,
        condition_id: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        self.inner
            .transition_to_active(organization_id, condition_id, triggered_at)
            .await
    }

    async fn transition_to_resolved(
        &self,
        organization_id: &str,
        condition_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        self.inner
            .transition_to_resolved(organization_id, condition_id, resolved_at)
            .await
    }

    async fn claim_retry(
        &self,
        organization_id: &str,
        condition_id: &str,
        triggered_at: DateTime<Utc>,
        attempt: i32,
    ) -> Result<bool> {
        self.check_available()?;
        self.inner
            .claim_retry(organization_id, condition_id, triggered_at, attempt)
            .await
    }

    async fn record_event(&self, event: &AlertEvent) -> Result<()> {
        self.check_available()?;
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(Error::storage("event insert timed out"));
        }
        self.inner.record_event(event).await
    }

    async fn latest_event(
        &self,
        organization_id: &str,
        condition_id: &str,
    ) -> Result<Option<AlertEvent>> {
        self.check_available()?;
        self.inner.latest_event(organization_id, condition_id).await
    }

    async fn list_states(&self, organization_id: &str) -> Result<Vec<AlertState>> {
        self.check_available()?;
        self.inner.list_states(organization_id).await
    }

    async fn organizations_pending_redelivery(&self) -> Result<Vec<String>> {
        self.check_available()?;
        self.inner.organizations_pending_redelivery().await
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}

/// Resolver whose lookup always fails
pub struct BrokenRecipients;

#[async_trait]
impl RecipientResolver for BrokenRecipients {
    async fn recipients(&self, _organization_id: &str) -> Result<Vec<String>> {
        Err(Error::internal("membership service down"))
    }
}

pub fn recipients() -> Arc<StaticRecipients> {
    Arc::new(StaticRecipients::new(
        Default::default(),
        vec!["cfo@example.com".to_string()],
    ))
}

pub fn default_rules() -> RuleSet {
    RuleSet::cash_runway(30.0, 90.0)
}

/// Critical rule only
pub fn critical_only() -> RuleSet {
    RuleSet::new(
        default_rules()
            .iter()
            .filter(|r| r.id == cashguard::alerting::CRITICAL_CASH_RUNWAY)
            .cloned()
            .collect(),
    )
    .unwrap()
}

pub fn service(
    rules: RuleSet,
    store: Arc<dyn AlertStateStore>,
    channel: Arc<dyn NotificationChannel>,
) -> TriggerEvaluationService {
    TriggerEvaluationService::new(rules, store, channel, recipients())
}

pub fn snapshot(balance: f64, burn: f64) -> MetricsSnapshot {
    MetricsSnapshot::new(ORG, balance, burn)
}
