//! Notification delivery for alerts

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{EmailConfig, WebhookConfig};
use crate::error::Result;
use crate::models::{DeliveryOutcome, Severity};

/// A formatted alert ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertMessage {
    /// Organization being alerted
    pub organization_id: String,
    /// Condition that fired
    pub condition_id: String,
    /// Severity of the condition
    pub severity: Severity,
    /// Resolved recipient addresses
    pub recipients: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Message body
    pub body: String,
}

/// External boundary for delivering a formatted alert.
///
/// Transport errors never escape: every call ends in a [`DeliveryOutcome`].
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel name for logs
    fn name(&self) -> &'static str;

    /// Deliver one message
    async fn send(&self, message: &AlertMessage) -> DeliveryOutcome;
}

/// Resolves who should receive an organization's alerts
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    /// Recipient addresses for `organization_id`
    async fn recipients(&self, organization_id: &str) -> Result<Vec<String>>;
}

/// Recipients taken from configuration.
///
/// Organization ids are matched case-insensitively: the config loader
/// lowercases map keys, so both the keys and the lookup are folded.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipients {
    by_organization: HashMap<String, Vec<String>>,
    fallback: Vec<String>,
}

impl StaticRecipients {
    /// Create from a per-organization map and a fallback list
    pub fn new(by_organization: HashMap<String, Vec<String>>, fallback: Vec<String>) -> Self {
        let mut folded: HashMap<String, Vec<String>> = HashMap::new();
        for (organization_id, recipients) in by_organization {
            folded
                .entry(organization_id.to_lowercase())
                .or_default()
                .extend(recipients);
        }

        Self {
            by_organization: folded,
            fallback,
        }
    }
}

#[async_trait]
impl RecipientResolver for StaticRecipients {
    async fn recipients(&self, organization_id: &str) -> Result<Vec<String>> {
        Ok(self
            .by_organization
            .get(&organization_id.to_lowercase())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Transport failure or non-success status
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Channel is missing required settings
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<NotificationError> for DeliveryOutcome {
    fn from(err: NotificationError) -> Self {
        DeliveryOutcome::failed(err.to_string())
    }
}

fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Sends e-mail through a transactional e-mail HTTP API
pub struct EmailChannel {
    client: Client,
    config: EmailConfig,
}

impl EmailChannel {
    /// Create a new e-mail channel
    pub fn new(config: EmailConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { client, config })
    }

    async fn post(&self, message: &AlertMessage) -> std::result::Result<(), NotificationError> {
        if self.config.api_url.is_empty() {
            return Err(NotificationError::ConfigError("email api_url is not set".into()));
        }

        let payload = EmailPayload {
            from: &self.config.from,
            to: &message.recipients,
            subject: &message.subject,
            text: &message.body,
        };

        let mut request = self.client.post(&self.config.api_url).json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Email API returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, message: &AlertMessage) -> DeliveryOutcome {
        match self.post(message).await {
            Ok(()) => {
                info!(
                    organization_id = %message.organization_id,
                    condition_id = %message.condition_id,
                    recipients = message.recipients.len(),
                    "Email notification sent"
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => e.into(),
        }
    }
}

/// Posts the alert as JSON to a webhook
pub struct WebhookChannel {
    client: Client,
    config: WebhookConfig,
}

impl WebhookChannel {
    /// Create a new webhook channel
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { client, config })
    }

    async fn post(&self, message: &AlertMessage) -> std::result::Result<(), NotificationError> {
        let mut request = self.client.post(&self.config.url).json(message);

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Webhook returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &AlertMessage) -> DeliveryOutcome {
        match self.post(message).await {
            Ok(()) => {
                info!(
                    organization_id = %message.organization_id,
                    condition_id = %message.condition_id,
                    url = %self.config.url,
                    "Webhook notification sent"
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => e.into(),
        }
    }
}

/// Writes alerts to the log instead of delivering them
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &AlertMessage) -> DeliveryOutcome {
        warn!(
            organization_id = %message.organization_id,
            condition_id = %message.condition_id,
            severity = message.severity.as_str(),
            recipients = ?message.recipients,
            subject = %message.subject,
            body = %message.body,
            "Alert (log channel)"
        );
        DeliveryOutcome::Delivered
    }
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
}
