//! Metrics provider boundary
//!
//! CashGuard does not compute financial figures; it asks a provider for the
//! latest snapshot of an organization.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::models::MetricsSnapshot;

/// Supplies the current metrics snapshot for an organization
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Latest snapshot for `organization_id`
    async fn snapshot(&self, organization_id: &str) -> Result<MetricsSnapshot>;
}

/// Fetches snapshots from `{base_url}/organizations/{id}/metrics`
pub struct HttpMetricsProvider {
    client: Client,
    base_url: String,
}

impl HttpMetricsProvider {
    /// Create a provider for `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build from configuration, if a provider URL is set
    pub fn from_config(config: &MetricsConfig) -> Result<Option<Self>> {
        config
            .provider_url
            .as_deref()
            .map(|url| Self::new(url, config.timeout))
            .transpose()
    }
}

#[async_trait]
impl MetricsProvider for HttpMetricsProvider {
    async fn snapshot(&self, organization_id: &str) -> Result<MetricsSnapshot> {
        let url = format!("{}/organizations/{}/metrics", self.base_url, organization_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::not_found("organization metrics", organization_id));
        }

        let snapshot: MetricsSnapshot = response.error_for_status()?.json().await?;
        snapshot.validate_for(organization_id)?;
        Ok(snapshot)
    }
}
