//! Top-up intake endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::engine::CreatedIntent;
use crate::error::AppError;
use crate::state::AppState;

/// Request body for a wallet top-up.
/// The user id comes from the authenticated panel session upstream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub user_id: Uuid,
    /// Decimal string, e.g. `"10.00"`.
    pub amount: String,
    pub currency: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{provider}/create", post(create_payment))
        .with_state(state)
}

/// POST /payments/{provider}/create
///
/// Opens a checkout order with the provider and records a CREATED intent.
/// The buyer is sent to `approveUrl`.
async fn create_payment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatedIntent>), AppError> {
    let amount = BigDecimal::from_str(request.amount.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid amount format: {}", e)))?;

    let created = state
        .engine
        .create_intent(&provider, request.user_id, &amount, &request.currency)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}
