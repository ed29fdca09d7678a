//! Factory stock control.
//!
//! Receipts and issuances of parts are kept as an append-mostly transaction
//! log. Issues draw from receipt lots oldest first, deletions reconcile the
//! lot counters, and balances and ledgers are derived from the log on demand.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod backup;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod repositories;
pub mod services;
pub mod stock;
pub mod tracing;

use axum::{response::Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;

use handlers::{HealthHandlerState, StockHandlerState};
use services::stock::StockService;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub stock: StockService,
}

impl AppState {
    /// State whose stock service shares `db` and honours the configured edit window
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Option<events::EventSender>,
    ) -> Self {
        let stock = StockService::new(db.clone(), event_sender).with_edit_window(config.edit_window());
        Self { db, config, stock }
    }
}

impl StockHandlerState for AppState {
    fn stock_service(&self) -> &StockService {
        &self.stock
    }
}

impl HealthHandlerState for AppState {
    fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// The full HTTP surface: stock routes under `/api/v1/stock`, the health
/// probe at the root, request ids and tracing on everything.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/stock", handlers::stock_router::<AppState>())
        .merge(handlers::health_router::<AppState>())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(crate::tracing::request_id_middleware))
        .with_state(state)
}
