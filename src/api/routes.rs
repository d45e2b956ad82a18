//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    Amount, BalanceRecord, DomainError, OperationContext, TransactionRecord, TransactionType,
    UserId,
};
use crate::error::{AppError, FieldErrors};
use crate::processing::gateway::{DEFAULT_ALL_LIMIT, DEFAULT_HISTORY_LIMIT};
use crate::processing::{Job, Page};

use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::response::ApiResponse;
use super::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount: Decimal,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    pub user_id: UserId,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_user_id: UserId,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    pub amount: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Acknowledgement for a queued deposit or withdrawal
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub job_id: Uuid,
    pub user_id: UserId,
    pub amount: Amount,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: &'static str,
    pub submitted_at: DateTime<Utc>,
}

impl From<Job> for QueuedResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            user_id: job.user_id,
            amount: job.amount,
            transaction_type: job.transaction_type(),
            status: "queued",
            submitted_at: job.submitted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub message: &'static str,
    pub transaction_id: i64,
    pub amount: Amount,
    pub to_user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct DebitResponse {
    pub message: &'static str,
    pub transaction_id: i64,
    pub amount: Amount,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub accepting_jobs: bool,
    pub queued_jobs: usize,
    pub queue_capacity: usize,
}

// =========================================================================
// Validation
// =========================================================================

fn check_amount(amount: Decimal, errors: &mut FieldErrors) -> Option<Amount> {
    match Amount::new(amount) {
        Ok(amount) => Some(amount),
        Err(e) => {
            errors.insert("amount".to_string(), e.to_string());
            None
        }
    }
}

fn check_user_id(field: &str, user_id: UserId, errors: &mut FieldErrors) {
    if user_id <= 0 {
        errors.insert(field.to_string(), "must be a positive user id".to_string());
    }
}

fn finish<T>(value: Option<T>, errors: FieldErrors) -> Result<T, AppError> {
    match value {
        Some(value) if errors.is_empty() => Ok(value),
        _ => Err(AppError::Validation(errors)),
    }
}

impl DepositRequest {
    pub fn validate(&self) -> Result<Amount, AppError> {
        let mut errors = FieldErrors::new();
        let amount = check_amount(self.amount, &mut errors);
        check_user_id("user_id", self.user_id, &mut errors);
        finish(amount, errors)
    }
}

impl WithdrawRequest {
    pub fn validate(&self) -> Result<Amount, AppError> {
        let mut errors = FieldErrors::new();

        if let Some(raw) = &self.transaction_type {
            let parsed: TransactionType = raw.parse().map_err(AppError::Domain)?;
            if parsed != TransactionType::Withdraw {
                errors.insert("type".to_string(), "must be \"withdraw\"".to_string());
            }
        }

        let amount = check_amount(self.amount, &mut errors);
        check_user_id("user_id", self.user_id, &mut errors);
        finish(amount, errors)
    }
}

impl TransferRequest {
    pub fn validate(&self) -> Result<Amount, AppError> {
        let mut errors = FieldErrors::new();
        let amount = check_amount(self.amount, &mut errors);
        check_user_id("to_user_id", self.to_user_id, &mut errors);
        finish(amount, errors)
    }
}

impl DebitRequest {
    pub fn validate(&self) -> Result<Amount, AppError> {
        let mut errors = FieldErrors::new();
        let amount = check_amount(self.amount, &mut errors);
        finish(amount, errors)
    }
}

impl PageQuery {
    pub fn page(&self, default_limit: i64) -> Result<Page, AppError> {
        let limit = self.limit.unwrap_or(default_limit);
        let offset = self.offset.unwrap_or(0);

        let mut errors = FieldErrors::new();
        if limit < 0 {
            errors.insert("limit".to_string(), "must not be negative".to_string());
        }
        if offset < 0 {
            errors.insert("offset".to_string(), "must not be negative".to_string());
        }
        finish(Some(Page::new(limit, offset)), errors)
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    let admin = Router::new()
        .route("/transactions/all", get(list_all_transactions))
        .route_layer(axum::middleware::from_fn(super::middleware::require_admin));

    Router::new()
        .route("/transactions/deposit", post(deposit))
        .route("/transactions/withdraw", post(withdraw))
        .route("/transactions/transfer", post(transfer))
        .route("/transactions/debit", post(debit))
        .route("/transactions/history", get(transaction_history))
        .route("/transactions/:id", get(get_transaction))
        .route("/balances/current", get(current_balance))
        .route("/balances/:user_id", post(open_balance))
        .merge(admin)
}

// =========================================================================
// Queued mutations
// =========================================================================

/// POST /transactions/deposit
async fn deposit(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    ApiJson(request): ApiJson<DepositRequest>,
) -> ApiResult<QueuedResponse> {
    let amount = request.validate()?;
    let job = state
        .gateway
        .submit_deposit(&context, request.user_id, amount)?;
    Ok(ApiResponse::ok(job.into()))
}

/// POST /transactions/withdraw
async fn withdraw(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    ApiJson(request): ApiJson<WithdrawRequest>,
) -> ApiResult<QueuedResponse> {
    let amount = request.validate()?;
    let job = state
        .gateway
        .submit_withdraw(&context, request.user_id, amount)?;
    Ok(ApiResponse::ok(job.into()))
}

// =========================================================================
// Synchronous mutations
// =========================================================================

/// POST /transactions/transfer
async fn transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    ApiJson(request): ApiJson<TransferRequest>,
) -> ApiResult<TransferResponse> {
    let amount = request.validate()?;
    if request.to_user_id == context.user_id {
        return Err(DomainError::SameUserTransfer.into());
    }

    let record = state
        .gateway
        .transfer(&context, request.to_user_id, amount)
        .await?;

    Ok(ApiResponse::ok(TransferResponse {
        message: "transfer completed",
        transaction_id: record.id,
        amount,
        to_user_id: request.to_user_id,
    }))
}

/// POST /transactions/debit
async fn debit(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    ApiJson(request): ApiJson<DebitRequest>,
) -> ApiResult<DebitResponse> {
    let amount = request.validate()?;
    let record = state.gateway.debit(&context, amount).await?;

    Ok(ApiResponse::ok(DebitResponse {
        message: "debit completed",
        transaction_id: record.id,
        amount,
    }))
}

// =========================================================================
// Reads
// =========================================================================

/// GET /transactions/history
async fn transaction_history(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Vec<TransactionRecord>> {
    let page = query.page(DEFAULT_HISTORY_LIMIT)?;
    let records = state.gateway.history(&context, page).await?;
    Ok(ApiResponse::ok(records))
}

/// GET /transactions/:id
async fn get_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<TransactionRecord> {
    let record = state.gateway.transaction(&context, id).await?;
    Ok(ApiResponse::ok(record))
}

/// GET /transactions/all (admin)
async fn list_all_transactions(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Vec<TransactionRecord>> {
    let page = query.page(DEFAULT_ALL_LIMIT)?;
    let records = state.gateway.all(&context, page).await?;
    Ok(ApiResponse::ok(records))
}

/// GET /balances/current
async fn current_balance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
) -> ApiResult<BalanceRecord> {
    let balance = state.gateway.current_balance(&context).await?;
    Ok(ApiResponse::ok(balance))
}

/// POST /balances/:user_id
async fn open_balance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    ApiPath(user_id): ApiPath<UserId>,
) -> Result<(StatusCode, Json<ApiResponse<BalanceRecord>>), AppError> {
    let mut errors = FieldErrors::new();
    check_user_id("user_id", user_id, &mut errors);
    finish(Some(user_id), errors)?;

    let balance = state.gateway.open_balance(&context, user_id).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(balance)))
}

/// GET /health (no auth)
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let queue = state.gateway.queue();
    ApiResponse::ok(HealthResponse {
        status: "ok",
        accepting_jobs: !queue.is_closed(),
        queued_jobs: queue.len(),
        queue_capacity: queue.capacity(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deposit_validation_collects_fields() {
        let request = DepositRequest {
            amount: dec!(-1),
            user_id: 0,
        };

        match request.validate() {
            Err(AppError::Validation(fields)) => {
                assert!(fields.contains_key("amount"));
                assert!(fields.contains_key("user_id"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_withdraw_type_field() {
        let mut request = WithdrawRequest {
            amount: dec!(10),
            user_id: 1,
            transaction_type: Some("withdraw".to_string()),
        };
        assert!(request.validate().is_ok());

        request.transaction_type = Some("deposit".to_string());
        assert_eq!(request.validate().unwrap_err().kind(), ErrorKind::Validation);

        request.transaction_type = Some("refund".to_string());
        assert_eq!(request.validate().unwrap_err().kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_amount_precision() {
        let request = DebitRequest { amount: dec!(1.005) };
        assert_eq!(request.validate().unwrap_err().kind(), ErrorKind::Validation);

        let request = DebitRequest { amount: dec!(1.50) };
        assert_eq!(request.validate().unwrap().value(), dec!(1.5));
    }

    #[test]
    fn test_page_query() {
        let query = PageQuery::default();
        assert_eq!(query.page(10).unwrap(), Page { limit: 10, offset: 0 });

        let query = PageQuery {
            limit: Some(-1),
            offset: Some(5),
        };
        assert_eq!(query.page(10).unwrap_err().kind(), ErrorKind::Validation);
    }
}
