//! API handlers for the HTTP REST API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerting::TriggerEvaluationService;
use crate::error::Error;
use crate::models::{AlertState, EvaluationResult, MetricsSnapshot, SweepResult};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Evaluation service
    pub service: Arc<TriggerEvaluationService>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    /// Crate version
    pub version: String,
    /// "up" when the alert state store answers, "down" otherwise
    pub storage: String,
}

/// Health check endpoint; 503 while the alert state store is unreachable
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status, storage) = match state.service.health_check().await {
        Ok(()) => (StatusCode::OK, "ok", "up"),
        Err(e) => {
            tracing::warn!(error = %e, "Alert state store health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "down")
        }
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            storage: storage.to_string(),
        }),
    )
}

/// Evaluation request: a snapshot for the path organization
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    /// Current cash balance
    pub cash_balance: f64,
    /// Monthly burn rate
    pub monthly_burn_rate: f64,
    /// Precomputed runway in days
    pub runway_days: Option<f64>,
    /// When the figures were produced
    pub captured_at: Option<DateTime<Utc>>,
    /// Restrict evaluation to one condition family
    pub family: Option<String>,
}

/// Evaluate a snapshot now
pub async fn evaluate(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluationResult>, (StatusCode, String)> {
    let snapshot = MetricsSnapshot {
        organization_id: organization_id.clone(),
        cash_balance: req.cash_balance,
        monthly_burn_rate: req.monthly_burn_rate,
        runway_days: req.runway_days,
        captured_at: req.captured_at.unwrap_or_else(Utc::now),
    };

    let result = state
        .service
        .evaluate_family(&organization_id, &snapshot, req.family.as_deref())
        .await
        .map_err(error_response)?;

    Ok(Json(result))
}

/// Re-sweep failed deliveries for an organization
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
) -> Result<Json<SweepResult>, (StatusCode, String)> {
    let result = state
        .service
        .send_alerts_for_matching_conditions(&organization_id)
        .await
        .map_err(error_response)?;

    Ok(Json(result))
}

/// List alert states for an organization
pub async fn list_alert_states(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
) -> Result<Json<Vec<AlertState>>, (StatusCode, String)> {
    let states = state
        .service
        .states(&organization_id)
        .await
        .map_err(error_response)?;

    Ok(Json(states))
}

fn error_response(err: Error) -> (StatusCode, String) {
    let status = match &err {
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
