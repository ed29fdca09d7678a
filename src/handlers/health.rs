use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::time::Instant;

/// Trait for states that can report on the database
pub trait HealthHandlerState: Clone + Send + Sync + 'static {
    fn db(&self) -> &DatabaseConnection;
}

pub fn health_router<S>() -> Router<S>
where
    S: HealthHandlerState,
{
    Router::new().route("/health", get(health_check::<S>))
}

/// Readiness probe: pings the database and reports its latency
async fn health_check<S>(State(state): State<S>) -> impl IntoResponse
where
    S: HealthHandlerState,
{
    let start = Instant::now();
    let db_result = crate::db::check_connection(state.db()).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match db_result {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "up",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "checks": {
                    "database": { "status": "up", "latency_ms": latency_ms }
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "down",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "checks": {
                    "database": { "status": "down", "error": e.to_string() }
                }
            })),
        ),
    }
}
