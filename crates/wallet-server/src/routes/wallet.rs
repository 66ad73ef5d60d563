//! Buyer-facing wallet endpoints.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{CaptureOutcome, RedirectStatus};
use crate::error::AppError;
use crate::models::{IntentStatus, PaymentIntent, Transaction};
use crate::state::AppState;

/// Number of ledger entries shown with the balance.
const RECENT_TRANSACTIONS: i64 = 10;

/// Number of intents scanned for the pending list.
const RECENT_INTENTS: i64 = 20;

/// Query string of the checkout return URL.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectQuery {
    pub status: Option<RedirectStatus>,
    /// PayPal appends the order id as `token`.
    #[serde(alias = "token")]
    pub order_id: Option<String>,
}

/// What the wallet page should show after checkout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectResponse {
    pub order_id: String,
    pub claimed: Option<RedirectStatus>,
    /// `completed`, `pending`, `failed` or `expired`.
    pub display: &'static str,
    pub credited: bool,
    pub intent: PaymentIntent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: String,
    pub currency: Option<String>,
    pub recent_transactions: Vec<Transaction>,
    /// Top-ups still awaiting confirmation.
    pub pending: Vec<PaymentIntent>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/wallet", get(checkout_return))
        .route("/wallet/balance", get(get_balance))
        .with_state(state)
}

fn display_for(status: IntentStatus) -> &'static str {
    match status {
        IntentStatus::Completed => "completed",
        IntentStatus::Created | IntentStatus::Approved => "pending",
        IntentStatus::Failed => "failed",
        IntentStatus::Expired => "expired",
    }
}

/// GET /wallet?status=success|cancel|fail&orderId=...
///
/// The claimed status is advisory; the order is always re-verified through
/// a capture.
async fn checkout_return(
    State(state): State<AppState>,
    Query(query): Query<RedirectQuery>,
) -> Result<Json<RedirectResponse>, AppError> {
    let order_id = query
        .order_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("orderId is required".to_string()))?;
    let claimed = query.status.unwrap_or(RedirectStatus::Success);

    let result = state.engine.ingestor().on_redirect(&order_id, claimed).await?;

    Ok(Json(RedirectResponse {
        order_id,
        claimed: query.status,
        display: display_for(result.intent.status),
        credited: result.outcome == CaptureOutcome::Credited,
        intent: result.intent,
    }))
}

/// GET /wallet/balance?userId=...
async fn get_balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, AppError> {
    let engine = &state.engine;

    // Step 1: Wallet, if the user was ever credited
    let wallet = engine.ledger().wallet(query.user_id).await?;

    // Step 2: Recent ledger entries
    let recent_transactions = engine
        .ledger()
        .recent_transactions(query.user_id, RECENT_TRANSACTIONS)
        .await?;

    // Step 3: Unconfirmed top-ups
    let pending = engine
        .intents_for_user(query.user_id, RECENT_INTENTS)
        .await?
        .into_iter()
        .filter(|intent| intent.status.is_pending())
        .collect();

    Ok(Json(BalanceResponse {
        user_id: query.user_id,
        balance: wallet
            .as_ref()
            .map(|w| w.balance.with_scale(2).to_string())
            .unwrap_or_else(|| "0.00".to_string()),
        currency: wallet.map(|w| w.currency),
        recent_transactions,
        pending,
    }))
}
