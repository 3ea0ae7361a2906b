//! Periodic redelivery of failed alerts

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::Result;

use super::service::TriggerEvaluationService;
use super::store::AlertStateStore;

/// Runs the retry sweep for every organization with a pending failed delivery
pub struct RetrySweeper {
    service: Arc<TriggerEvaluationService>,
    store: Arc<dyn AlertStateStore>,
    interval: Duration,
}

impl RetrySweeper {
    /// Create a new sweeper
    pub fn new(
        service: Arc<TriggerEvaluationService>,
        store: Arc<dyn AlertStateStore>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            store,
            interval,
        }
    }

    /// Start the sweep loop
    pub async fn start(&self) {
        info!(interval = ?self.interval, "Starting retry sweeper");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.sweep_all().await {
                error!(error = %e, "Error running retry sweep");
            }
        }
    }

    /// Sweep every organization once; returns the number of dispatch attempts
    pub async fn sweep_all(&self) -> Result<usize> {
        let organizations = self.store.organizations_pending_redelivery().await?;

        debug!(count = organizations.len(), "Organizations pending redelivery");

        let mut attempted = 0;
        for organization_id in organizations {
            match self
                .service
                .send_alerts_for_matching_conditions(&organization_id)
                .await
            {
                Ok(result) => attempted += result.attempted(),
                Err(e) => {
                    error!(organization_id = %organization_id, error = %e, "Error sweeping organization");
                }
            }
        }

        Ok(attempted)
    }
}
