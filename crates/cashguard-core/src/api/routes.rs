//! API routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Alerts
        .route(
            "/api/v1/organizations/:organization_id/alerts",
            get(handlers::list_alert_states),
        )
        .route(
            "/api/v1/organizations/:organization_id/alerts/evaluate",
            post(handlers::evaluate),
        )
        .route(
            "/api/v1/organizations/:organization_id/alerts/retry",
            post(handlers::retry_delivery),
        )

        .with_state(state)
}
