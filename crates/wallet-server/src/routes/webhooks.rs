//! Provider webhook ingestion.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};

use crate::engine::{WebhookAck, WebhookEvent, SIGNATURE_HEADER};
use crate::error::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{provider}", post(handle_webhook))
        .with_state(state)
}

/// POST /webhooks/{provider}
///
/// Answers non-2xx only when the delivery cannot be verified or parsed, so
/// the provider retries. Everything past that point is acknowledged; a failed
/// capture is picked up by the reconciliation scanner.
async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let (provider, _) = state.engine.providers().resolve(&provider)?;
    let ingestor = state.engine.ingestor();

    // Step 1: Verify the signature over the raw bytes
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    ingestor.verify(signature, &body)?;

    // Step 2: Parse the event envelope
    let event = WebhookEvent::parse(&body)?;
    tracing::debug!(%provider, event_id = %event.id, event_type = %event.event_type, "Webhook verified");

    // Step 3: Dedup on event id and capture
    let ack = ingestor.on_webhook(provider, event).await?;
    Ok(Json(ack))
}
