//! HTTP routes

pub mod analytics;
pub mod stripe_sync;


use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use crate::{auth::require_auth, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/superadmin/businesses/{id}/stripe-sync",
            get(stripe_sync::analyze).post(stripe_sync::fix),
        )
        .route(
            "/api/admin/stores/{business_id}/analytics",
            get(analytics::store_analytics),
        )
        .route(
            "/api/superadmin/analytics/customer-experience",
            get(analytics::customer_experience),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Liveness plus a database ping
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "ok" })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        }
    }
}
