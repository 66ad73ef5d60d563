//! HTTP surface of the wallet server.

pub mod admin;
pub mod payments;
pub mod wallet;
pub mod webhooks;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::db;
use crate::error::AppError;
use crate::state::AppState;

/// Creates the main router with all routes mounted.
///
/// Webhooks read the raw request body as bytes so the signature can be
/// checked against exactly what the provider sent.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health).with_state(state.clone()))
        .nest("/webhooks", webhooks::router(state.clone()))
        .nest("/payments", payments::router(state.clone()))
        .merge(wallet::router(state.clone()))
        .nest("/admin", admin::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// GET /health
async fn health(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let storage = match &state.pool {
        Some(pool) => {
            db::ping(pool).await?;
            "postgres"
        }
        None => "memory",
    };
    let providers: Vec<&str> = state
        .engine
        .providers()
        .kinds()
        .iter()
        .map(|k| k.as_str())
        .collect();

    Ok(Json(json!({
        "status": "ok",
        "storage": storage,
        "providers": providers,
    })))
}
