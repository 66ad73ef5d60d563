//! The three confirmation channels, reduced to one capture call each.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;

use super::capture::{CaptureProcessor, CaptureResult, CaptureSource};
use crate::error::AppError;
use crate::models::ProviderKind;
use crate::store::IntentStore;

/// Header carrying the webhook body signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Event types that can move an order towards capture.
const CAPTURE_EVENTS: &[&str] = &[
    "CHECKOUT.ORDER.APPROVED",
    "CHECKOUT.ORDER.COMPLETED",
    "PAYMENT.CAPTURE.COMPLETED",
    "PAYMENT.CAPTURE.PENDING",
    "PAYMENT.CAPTURE.DENIED",
    "PAYMENT.CAPTURE.DECLINED",
];

/// Status the browser claims on return from checkout. Never trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectStatus {
    Success,
    Cancel,
    Fail,
}

/// Verifies an HMAC-SHA256 body signature. Accepts `sha256=<hex>` or a bare
/// base64 digest.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let expected = match signature.strip_prefix("sha256=") {
        Some(hex_sig) => hex::decode(hex_sig).ok(),
        None => base64::engine::general_purpose::STANDARD
            .decode(signature)
            .ok(),
    };
    let Some(expected) = expected else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Signs a body the way [`verify_webhook_signature`] expects.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// A provider webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: Value,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, AppError> {
        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Malformed webhook payload: {}", e)))?;
        if event.id.trim().is_empty() {
            return Err(AppError::BadRequest("Webhook event id is empty".to_string()));
        }
        Ok(event)
    }

    pub fn is_capture_relevant(&self) -> bool {
        CAPTURE_EVENTS.contains(&self.event_type.as_str())
    }

    /// Capture events reference their order through related ids; order
    /// events carry it as the resource id.
    pub fn order_id(&self) -> Option<&str> {
        let id = if self.event_type.starts_with("PAYMENT.CAPTURE.") {
            self.resource
                .pointer("/supplementary_data/related_ids/order_id")
                .and_then(Value::as_str)
        } else {
            self.resource.get("id").and_then(Value::as_str)
        };
        id.filter(|id| !id.is_empty())
    }
}

/// Acknowledgement returned to the provider. Every variant is a 2xx.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WebhookAck {
    Ignored { reason: String },
    /// Same event id as the last one processed for this order.
    Duplicate { order_id: String },
    Processed {
        order_id: String,
        capture: CaptureResult,
    },
    /// Capture failed. `retryable` errors clear up on a later scan; the rest
    /// need an operator.
    Deferred {
        order_id: String,
        error: String,
        retryable: bool,
    },
}

pub struct EventIngestor {
    intents: Arc<dyn IntentStore>,
    processor: Arc<CaptureProcessor>,
    webhook_secret: Option<String>,
}

impl EventIngestor {
    pub fn new(
        intents: Arc<dyn IntentStore>,
        processor: Arc<CaptureProcessor>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            intents,
            processor,
            webhook_secret,
        }
    }

    /// Browser return from checkout. The claimed status is only logged; the
    /// provider decides.
    pub async fn on_redirect(
        &self,
        order_id: &str,
        claimed: RedirectStatus,
    ) -> Result<CaptureResult, AppError> {
        tracing::info!(order_id, claimed = ?claimed, "Checkout redirect received");
        self.processor.capture(order_id, CaptureSource::Redirect).await
    }

    /// Rejects bodies whose signature does not verify. Without a configured
    /// secret every delivery is rejected.
    pub fn verify(&self, signature: Option<&str>, body: &[u8]) -> Result<(), AppError> {
        let Some(secret) = self.webhook_secret.as_deref() else {
            tracing::warn!("Webhook received but no webhook secret is configured");
            return Err(AppError::Unauthorized(
                "Webhook verification is not configured".to_string(),
            ));
        };
        let Some(signature) = signature else {
            return Err(AppError::Unauthorized(
                "Missing webhook signature".to_string(),
            ));
        };
        if !verify_webhook_signature(secret, body, signature) {
            tracing::warn!("Webhook signature mismatch");
            return Err(AppError::Unauthorized(
                "Invalid webhook signature".to_string(),
            ));
        }
        Ok(())
    }

    /// Verified webhook. Capture failures are acknowledged and left to the
    /// scanner; only storage failures before the capture surface as errors.
    pub async fn on_webhook(
        &self,
        provider: ProviderKind,
        event: WebhookEvent,
    ) -> Result<WebhookAck, AppError> {
        if !event.is_capture_relevant() {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(WebhookAck::Ignored {
                reason: format!("Unhandled event type {}", event.event_type),
            });
        }
        let Some(order_id) = event.order_id().map(str::to_string) else {
            tracing::warn!(event_id = %event.id, event_type = %event.event_type, "Webhook without order id");
            return Ok(WebhookAck::Ignored {
                reason: "No order id in event".to_string(),
            });
        };

        match self.intents.get(&order_id).await? {
            Some(intent) if intent.provider == provider => {}
            _ => {
                tracing::warn!(order_id = %order_id, event_id = %event.id, "Webhook for unknown order");
                return Ok(WebhookAck::Ignored {
                    reason: format!("Unknown order {}", order_id),
                });
            }
        }

        if !self.intents.record_event(&order_id, &event.id).await? {
            tracing::info!(order_id = %order_id, event_id = %event.id, "Webhook replay ignored");
            return Ok(WebhookAck::Duplicate { order_id });
        }

        let source = CaptureSource::Webhook {
            event_id: event.id.clone(),
        };
        match self.processor.capture(&order_id, source).await {
            Ok(capture) => Ok(WebhookAck::Processed { order_id, capture }),
            Err(e) => {
                let retryable = e.is_retryable();
                if retryable {
                    tracing::warn!(
                        order_id = %order_id,
                        event_id = %event.id,
                        code = e.code(),
                        error = %e,
                        "Webhook capture deferred to reconciliation"
                    );
                } else {
                    tracing::error!(
                        order_id = %order_id,
                        event_id = %event.id,
                        code = e.code(),
                        error = %e,
                        "Webhook capture failed; needs manual review"
                    );
                }
                Ok(WebhookAck::Deferred {
                    order_id,
                    error: e.code().to_string(),
                    retryable,
                })
            }
        }
    }

    /// Operator-triggered capture; same path as every other channel.
    pub async fn on_admin_action(&self, order_id: &str) -> Result<CaptureResult, AppError> {
        tracing::info!(order_id, "Manual capture requested");
        self.processor.capture(order_id, CaptureSource::Admin).await
    }
}
