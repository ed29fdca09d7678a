use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::stock_transaction::TransactionKind,
    errors::ServiceError,
    services::stock::{
        DeleteOutcome, IssueRequest, ListFilter, ReceiveRequest, StockService, TransactionPatch,
    },
    stock::{BalanceSummary, GroupCheck, LedgerEntry, PartKey, PartSummary, StockTransaction},
    ApiResponse, ApiResult,
};

/// Trait for states that expose the stock service
pub trait StockHandlerState: Clone + Send + Sync + 'static {
    fn stock_service(&self) -> &StockService;
}

/// Part selector shared by the balance and ledger queries
#[derive(Debug, Clone, Deserialize)]
pub struct PartQuery {
    pub myob_number: String,
    pub part_number: String,
}

impl PartQuery {
    fn key(&self) -> Result<PartKey, ServiceError> {
        let key = PartKey::new(&self.myob_number, &self.part_number);
        if key.is_complete() {
            Ok(key)
        } else {
            Err(ServiceError::ValidationError(
                "myob_number and part_number are both required".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueCheckQuery {
    pub myob_number: String,
    pub part_number: String,
    pub quantity: i64,
}

/// Optional part for `POST /verify`; without one every part is checked
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyRequest {
    pub myob_number: Option<String>,
    pub part_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub key: PartKey,
    pub closing_balance: i64,
    pub entries: Vec<LedgerEntry>,
}

/// Create the stock router
pub fn stock_router<S>() -> Router<S>
where
    S: StockHandlerState,
{
    Router::new()
        .route("/balance", get(get_balance::<S>))
        .route("/issue-check", get(check_issue::<S>))
        .route("/receipts", get(list_receipts::<S>).post(receive_stock::<S>))
        .route("/issues", post(issue_stock::<S>))
        .route("/transactions", get(list_transactions::<S>))
        .route(
            "/transactions/:id",
            get(get_transaction::<S>)
                .put(update_transaction::<S>)
                .delete(delete_transaction::<S>),
        )
        .route("/summary", get(export_summary::<S>))
        .route("/ledger", get(export_ledger::<S>))
        .route("/verify", post(verify::<S>))
}

pub async fn get_balance<S>(
    State(state): State<S>,
    Query(query): Query<PartQuery>,
) -> ApiResult<BalanceSummary>
where
    S: StockHandlerState,
{
    let summary = state.stock_service().get_balance(&query.key()?).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// Answers whether an issue of `quantity` would currently fit
pub async fn check_issue<S>(
    State(state): State<S>,
    Query(query): Query<IssueCheckQuery>,
) -> ApiResult<BalanceSummary>
where
    S: StockHandlerState,
{
    let key = PartQuery {
        myob_number: query.myob_number,
        part_number: query.part_number,
    }
    .key()?;
    let summary = state
        .stock_service()
        .check_issue(&key, query.quantity)
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn list_receipts<S>(
    State(state): State<S>,
    Query(mut filter): Query<ListFilter>,
) -> ApiResult<Vec<StockTransaction>>
where
    S: StockHandlerState,
{
    filter.kind = Some(TransactionKind::Receipt);
    let receipts = state.stock_service().list_transactions(&filter).await?;
    Ok(Json(ApiResponse::success(receipts)))
}

pub async fn receive_stock<S>(
    State(state): State<S>,
    Json(payload): Json<ReceiveRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: StockHandlerState,
{
    let receipt = state.stock_service().receive(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}

/// Issues stock; the response lists one issuance record per lot drawn
pub async fn issue_stock<S>(
    State(state): State<S>,
    Json(payload): Json<IssueRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: StockHandlerState,
{
    let issued = state.stock_service().issue(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(issued))))
}

pub async fn list_transactions<S>(
    State(state): State<S>,
    Query(filter): Query<ListFilter>,
) -> ApiResult<Vec<StockTransaction>>
where
    S: StockHandlerState,
{
    let transactions = state.stock_service().list_transactions(&filter).await?;
    Ok(Json(ApiResponse::success(transactions)))
}

pub async fn get_transaction<S>(
    State(state): State<S>,
    Path(id): Path<Uuid>,
) -> ApiResult<StockTransaction>
where
    S: StockHandlerState,
{
    let transaction = state.stock_service().get_transaction(id).await?;
    Ok(Json(ApiResponse::success(transaction)))
}

pub async fn update_transaction<S>(
    State(state): State<S>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TransactionPatch>,
) -> ApiResult<StockTransaction>
where
    S: StockHandlerState,
{
    let transaction = state.stock_service().update_transaction(id, patch).await?;
    Ok(Json(ApiResponse::success(transaction)))
}

pub async fn delete_transaction<S>(
    State(state): State<S>,
    Path(id): Path<Uuid>,
) -> ApiResult<DeleteOutcome>
where
    S: StockHandlerState,
{
    let outcome = state.stock_service().delete_transaction(id).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Per-part totals, ordered by part key
pub async fn export_summary<S>(State(state): State<S>) -> ApiResult<Vec<PartSummary>>
where
    S: StockHandlerState,
{
    let summary: Vec<_> = state
        .stock_service()
        .export_summary()
        .await?
        .into_values()
        .collect();
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn export_ledger<S>(
    State(state): State<S>,
    Query(query): Query<PartQuery>,
) -> ApiResult<LedgerResponse>
where
    S: StockHandlerState,
{
    let key = query.key()?;
    let ledger = state.stock_service().export_ledger(&key).await?;
    Ok(Json(ApiResponse::success(LedgerResponse {
        key,
        closing_balance: ledger.closing_balance(),
        entries: ledger.iter().collect(),
    })))
}

pub async fn verify<S>(
    State(state): State<S>,
    payload: Option<Json<VerifyRequest>>,
) -> ApiResult<Vec<GroupCheck>>
where
    S: StockHandlerState,
{
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let service = state.stock_service();

    let checks = match (request.myob_number, request.part_number) {
        (Some(myob_number), Some(part_number)) => {
            let key = PartQuery {
                myob_number,
                part_number,
            }
            .key()?;
            vec![service.verify(&key).await?]
        }
        (None, None) => service.verify_all().await?,
        _ => {
            return Err(ServiceError::ValidationError(
                "give both myob_number and part_number, or neither".to_string(),
            ))
        }
    };
    Ok(Json(ApiResponse::success(checks)))
}
