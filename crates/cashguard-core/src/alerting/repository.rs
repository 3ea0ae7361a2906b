//! Postgres-backed alert state store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::models::{AlertEvent, AlertState, DeliveryOutcome, Severity};

use super::store::AlertStateStore;

/// Alert state and event log stored in Postgres.
///
/// Transitions are single conditional statements, so the compare-and-set is
/// atomic at the database without explicit transactions.
#[derive(Clone)]
pub struct PostgresAlertStore {
    pool: PgPool,
}

impl PostgresAlertStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(storage_error)?;

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Connection-level failures mean the store is unreachable; anything else is
/// a per-operation failure.
fn storage_error(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            Error::StorageUnavailable(err.to_string())
        }
        other => Error::Database(other),
    }
}

#[async_trait]
impl AlertStateStore for PostgresAlertStore {
    async fn get(&self, organization_id: &str, condition_id: &str) -> Result<AlertState> {
        sqlx::query(
            r#"
            INSERT INTO alert_states (organization_id, condition_id)
            VALUES ($1, $2)
            ON CONFLICT (organization_id, condition_id) DO NOTHING
            "#,
        )
        .bind(organization_id)
        .bind(condition_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        let row = sqlx::query_as::<_, AlertStateRow>(
            r#"
            SELECT organization_id, condition_id, active, last_triggered_at, last_resolved_at,
                   delivery_attempt
            FROM alert_states
            WHERE organization_id = $1 AND condition_id = $2
            "#,
        )
        .bind(organization_id)
        .bind(condition_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map_or_else(
            || AlertState::inactive(organization_id, condition_id),
            Into::into,
        ))
    }

    async fn transition_to_active(
        &self,
        organization_id: &str,
        condition_id: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_states
                (organization_id, condition_id, active, last_triggered_at, delivery_attempt)
            VALUES ($1, $2, true, $3, 1)
            ON CONFLICT (organization_id, condition_id) DO UPDATE
            SET active = true, last_triggered_at = EXCLUDED.last_triggered_at, delivery_attempt = 1
            WHERE alert_states.active = false
            "#,
        )
        .bind(organization_id)
        .bind(condition_id)
        .bind(triggered_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition_to_resolved(
        &self,
        organization_id: &str,
        condition_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alert_states
            SET active = false, last_resolved_at = $3
            WHERE organization_id = $1 AND condition_id = $2 AND active = true
            "#,
        )
        .bind(organization_id)
        .bind(condition_id)
        .bind(resolved_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_retry(
        &self,
        organization_id: &str,
        condition_id: &str,
        triggered_at: DateTime<Utc>,
        attempt: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alert_states
            SET delivery_attempt = $4
            WHERE organization_id = $1 AND condition_id = $2
              AND active = true
              AND last_triggered_at = $3
              AND delivery_attempt = $4 - 1
            "#,
        )
        .bind(organization_id)
        .bind(condition_id)
        .bind(triggered_at)
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_event(&self, event: &AlertEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_events (
                id, organization_id, condition_id, severity,
                cash_balance, monthly_burn_rate, runway_days,
                triggered_at, dispatched_at, outcome, failure_reason, attempt
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id)
        .bind(&event.organization_id)
        .bind(&event.condition_id)
        .bind(event.severity.as_str())
        .bind(event.cash_balance)
        .bind(event.monthly_burn_rate)
        .bind(event.runway_days)
        .bind(event.triggered_at)
        .bind(event.dispatched_at)
        .bind(if event.outcome.is_delivered() { "delivered" } else { "failed" })
        .bind(event.outcome.failure_reason())
        .bind(event.attempt)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn latest_event(
        &self,
        organization_id: &str,
        condition_id: &str,
    ) -> Result<Option<AlertEvent>> {
        let row = sqlx::query_as::<_, AlertEventRow>(
            r#"
            SELECT * FROM alert_events
            WHERE organization_id = $1 AND condition_id = $2
            ORDER BY dispatched_at DESC, attempt DESC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(condition_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(Into::into))
    }

    async fn list_states(&self, organization_id: &str) -> Result<Vec<AlertState>> {
        let rows = sqlx::query_as::<_, AlertStateRow>(
            r#"
            SELECT organization_id, condition_id, active, last_triggered_at, last_resolved_at,
                   delivery_attempt
            FROM alert_states
            WHERE organization_id = $1
            ORDER BY condition_id
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn organizations_pending_redelivery(&self) -> Result<Vec<String>> {
        let organizations: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT s.organization_id
            FROM alert_states s
            JOIN LATERAL (
                SELECT e.outcome, e.attempt
                FROM alert_events e
                WHERE e.organization_id = s.organization_id
                  AND e.condition_id = s.condition_id
                ORDER BY e.dispatched_at DESC, e.attempt DESC
                LIMIT 1
            ) latest ON true
            WHERE s.active = true
              AND latest.outcome = 'failed'
              AND latest.attempt = s.delivery_attempt
            ORDER BY s.organization_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(organizations)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

// Database row types for mapping

#[derive(sqlx::FromRow)]
struct AlertStateRow {
    organization_id: String,
    condition_id: String,
    active: bool,
    last_triggered_at: Option<DateTime<Utc>>,
    last_resolved_at: Option<DateTime<Utc>>,
    delivery_attempt: i32,
}

impl From<AlertStateRow> for AlertState {
    fn from(row: AlertStateRow) -> Self {
        AlertState {
            organization_id: row.organization_id,
            condition_id: row.condition_id,
            active: row.active,
            last_triggered_at: row.last_triggered_at,
            last_resolved_at: row.last_resolved_at,
            delivery_attempt: row.delivery_attempt,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlertEventRow {
    id: Uuid,
    organization_id: String,
    condition_id: String,
    severity: String,
    cash_balance: f64,
    monthly_burn_rate: f64,
    runway_days: f64,
    triggered_at: DateTime<Utc>,
    dispatched_at: DateTime<Utc>,
    outcome: String,
    failure_reason: Option<String>,
    attempt: i32,
}

impl From<AlertEventRow> for AlertEvent {
    fn from(row: AlertEventRow) -> Self {
        let outcome = match row.outcome.as_str() {
            "delivered" => DeliveryOutcome::Delivered,
            _ => DeliveryOutcome::Failed {
                reason: row.failure_reason.unwrap_or_default(),
            },
        };

        AlertEvent {
            id: row.id,
            organization_id: row.organization_id,
            condition_id: row.condition_id,
            severity: Severity::from_db(&row.severity),
            cash_balance: row.cash_balance,
            monthly_burn_rate: row.monthly_burn_rate,
            runway_days: row.runway_days,
            triggered_at: row.triggered_at,
            dispatched_at: row.dispatched_at,
            outcome,
            attempt: row.attempt,
        }
    }
}
