//! Operator endpoints. Every route requires `Authorization: Bearer <token>`.

use axum::{
    extract::{Path, Query, Request, State},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::engine::{CaptureResult, CreditOutcome, PendingIntent, ScanReport};
use crate::error::AppError;
use crate::models::LedgerConsistency;
use crate::state::AppState;

const DEFAULT_MINUTES: i64 = 10;
const DEFAULT_LIMIT: i64 = 50;

fn default_minutes() -> i64 {
    DEFAULT_MINUTES
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

/// Window used by the pending listing and the reconcile trigger.
#[derive(Debug, Deserialize)]
pub struct ScanWindow {
    #[serde(default = "default_minutes")]
    pub minutes: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub count: usize,
    pub intents: Vec<PendingIntent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub user_id: Uuid,
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    /// Signed decimal string.
    pub amount: String,
    pub currency: String,
    pub reason: String,
    pub idempotency_key: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payments/{provider}/pending", get(list_pending))
        .route("/payments/{provider}/capture/{order_id}", post(capture_order))
        .route("/payments/{provider}/reconcile", post(reconcile))
        .route("/orders/{order_id}/refund", post(refund_order))
        .route("/wallets/{user_id}/adjust", post(adjust_wallet))
        .route("/wallets/{user_id}/consistency", get(wallet_consistency))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(AppError::Unauthorized(
            "Admin access is not configured".to_string(),
        ));
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request");
        return Err(AppError::Unauthorized("Invalid admin token".to_string()));
    }

    Ok(next.run(request).await)
}

fn parse_amount(raw: &str) -> Result<BigDecimal, AppError> {
    BigDecimal::from_str(raw.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid amount format: {}", e)))
}

/// GET /admin/payments/{provider}/pending?minutes&limit
async fn list_pending(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(window): Query<ScanWindow>,
) -> Result<Json<PendingResponse>, AppError> {
    let (provider, _) = state.engine.providers().resolve(&provider)?;
    let intents = state
        .engine
        .scanner()
        .pending(provider, window.minutes, window.limit)
        .await?;

    Ok(Json(PendingResponse {
        count: intents.len(),
        intents,
    }))
}

/// POST /admin/payments/{provider}/capture/{orderId}
async fn capture_order(
    State(state): State<AppState>,
    Path((provider, order_id)): Path<(String, String)>,
) -> Result<Json<CaptureResult>, AppError> {
    let (provider, _) = state.engine.providers().resolve(&provider)?;

    match state.engine.intent(&order_id).await? {
        Some(intent) if intent.provider == provider => {}
        _ => {
            return Err(AppError::NotFound(format!(
                "Payment intent not found: {}",
                order_id
            )))
        }
    }

    let result = state.engine.ingestor().on_admin_action(&order_id).await?;
    Ok(Json(result))
}

/// POST /admin/payments/{provider}/reconcile {minutes, limit}
async fn reconcile(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(window): Json<ScanWindow>,
) -> Result<Json<ScanReport>, AppError> {
    let (provider, _) = state.engine.providers().resolve(&provider)?;
    tracing::info!(%provider, minutes = window.minutes, limit = window.limit, "Manual reconciliation requested");

    let report = state
        .engine
        .scanner()
        .scan(provider, window.minutes, window.limit)
        .await?;
    Ok(Json(report))
}

/// POST /admin/orders/{orderId}/refund
///
/// Called by the order subsystem when a fulfillment order fails. Keyed by
/// the order id, so a retried refund is applied once.
async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<CreditOutcome>, AppError> {
    let amount = parse_amount(&request.amount)?;
    let outcome = state
        .engine
        .ledger()
        .refund(
            request.user_id,
            &amount,
            &request.currency.to_ascii_uppercase(),
            &order_id,
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /admin/wallets/{userId}/adjust
async fn adjust_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<CreditOutcome>, AppError> {
    if request.idempotency_key.trim().is_empty() {
        return Err(AppError::BadRequest(
            "idempotencyKey is required".to_string(),
        ));
    }
    let amount = parse_amount(&request.amount)?;

    let outcome = state
        .engine
        .ledger()
        .adjust(
            user_id,
            &amount,
            &request.currency.to_ascii_uppercase(),
            &format!("adjust:{}", request.idempotency_key.trim()),
            &request.reason,
        )
        .await?;
    Ok(Json(outcome))
}

/// GET /admin/wallets/{userId}/consistency
async fn wallet_consistency(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<LedgerConsistency>, AppError> {
    let check = state.engine.ledger().verify_consistency(user_id).await?;
    Ok(Json(check))
}
