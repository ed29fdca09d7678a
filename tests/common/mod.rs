#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tower::ServiceExt;

use factory_stock_api::{
    app_router,
    config::AppConfig,
    db::{self, DbConfig},
    events::{Event, EventSender},
    services::{IssueRequest, ReceiveRequest, StockService},
    stock::{PartKey, StockTransaction},
    AppState,
};

pub const MYOB: &str = "HR050057";
pub const PART: &str = "41201-KTJ-EM00";

/// Midnight UTC of the given day
pub fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub fn key() -> PartKey {
    PartKey::new(MYOB, PART)
}

/// Stock service over a fresh, migrated in-memory SQLite database.
pub struct TestStock {
    pub db: Arc<DatabaseConnection>,
    pub service: StockService,
}

impl TestStock {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Same harness, with events delivered to the returned receiver
    pub async fn with_events() -> (Self, tokio::sync::mpsc::Receiver<Event>) {
        let (sender, rx) = EventSender::channel(64);
        (Self::build(Some(sender)).await, rx)
    }

    async fn build(sender: Option<EventSender>) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);
        let service = StockService::new(db.clone(), sender);
        Self { db, service }
    }

    pub async fn receive(&self, quantity: i64, received: DateTime<Utc>) -> StockTransaction {
        self.receive_part(MYOB, PART, quantity, received).await
    }

    pub async fn receive_part(
        &self,
        myob: &str,
        part: &str,
        quantity: i64,
        received: DateTime<Utc>,
    ) -> StockTransaction {
        self.service
            .receive(receive_request(myob, part, quantity, received))
            .await
            .expect("receipt should be recorded")
    }

    pub async fn issue(
        &self,
        quantity: i64,
        issued: DateTime<Utc>,
    ) -> Result<Vec<StockTransaction>, factory_stock_api::errors::ServiceError> {
        self.service.issue(issue_request(MYOB, PART, quantity, issued)).await
    }

    /// Draw counter of a stored lot
    pub async fn drawn(&self, lot: &StockTransaction) -> i64 {
        self.service
            .get_transaction(lot.id)
            .await
            .expect("lot should exist")
            .as_receipt()
            .expect("record should be a receipt")
            .drawn
    }

    pub async fn record_count(&self) -> usize {
        self.service.snapshot().await.expect("snapshot").len()
    }
}

pub fn receive_request(
    myob: &str,
    part: &str,
    quantity: i64,
    received: DateTime<Utc>,
) -> ReceiveRequest {
    ReceiveRequest {
        myob_number: myob.to_string(),
        part_number: part.to_string(),
        model: Some("KTJ".to_string()),
        part_name: Some("Clutch housing".to_string()),
        revision: None,
        quantity,
        received_date: Some(received),
        po_number: Some("PO-2024-118".to_string()),
        supplier: Some("Kyoto Metal".to_string()),
        remarks: None,
    }
}

pub fn issue_request(
    myob: &str,
    part: &str,
    quantity: i64,
    issued: DateTime<Utc>,
) -> IssueRequest {
    IssueRequest {
        myob_number: myob.to_string(),
        part_number: part.to_string(),
        quantity,
        issue_date: Some(issued),
        invoice_number: Some("INV-5521".to_string()),
        customer: Some("Line 3".to_string()),
        withdrawal_number: Some("WD-77".to_string()),
        event: None,
        due_date: None,
        supplier: None,
        remarks: None,
    }
}

/// Router over an in-memory database, driven with `oneshot`.
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        let stock = TestStock::new().await;
        let state = AppState::new(stock.db.clone(), AppConfig::new("sqlite::memory:"), None);
        Self {
            router: app_router(state.clone()),
            state,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }
}
