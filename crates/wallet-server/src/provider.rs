//! Payment provider boundary.
//!
//! Provider responses are decoded exactly once, here, into typed results.
//! Downstream code never inspects raw provider JSON; a failure is always one
//! of the [`ProviderError`] kinds.

pub mod paypal;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::ProviderKind;

pub use paypal::{PaypalClient, PaypalConfig};

/// Failure talking to a payment provider. Every kind is retryable by the
/// caller and none of them imply a local write.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Transport failure, timeout or unreadable response.
    #[error("Provider HTTP error: {0}")]
    Http(String),

    /// The provider answered with something that is not JSON.
    #[error("Provider returned a non-JSON body (HTTP {status})")]
    NonJson { status: u16, body: String },

    /// The provider reported a business error.
    #[error("Provider error {name}: {message}")]
    Provider {
        name: String,
        message: String,
        /// First detail issue code, e.g. `ORDER_ALREADY_CAPTURED`.
        issue: Option<String>,
        raw: serde_json::Value,
    },

    /// Captured funds differ from the intent; needs manual review.
    #[error(
        "Captured {captured} {captured_currency} does not match requested {requested} {currency}"
    )]
    AmountMismatch {
        requested: BigDecimal,
        currency: String,
        captured: BigDecimal,
        captured_currency: String,
    },
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Http(_) => "PROVIDER_HTTP_ERROR",
            ProviderError::NonJson { .. } => "PROVIDER_NON_JSON",
            ProviderError::Provider { .. } | ProviderError::AmountMismatch { .. } => {
                "PROVIDER_ERROR"
            }
        }
    }

    /// The provider already holds a capture for this order.
    pub fn is_already_captured(&self) -> bool {
        matches!(
            self,
            ProviderError::Provider { issue: Some(issue), .. } if issue == "ORDER_ALREADY_CAPTURED"
        )
    }

    /// The provider does not know the order (expired or never existed).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::Provider { name, .. } if name == "RESOURCE_NOT_FOUND"
        )
    }
}

/// Order status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderOrderStatus {
    Created,
    Saved,
    Approved,
    PayerActionRequired,
    Voided,
    Completed,
    /// Provider no longer knows the order.
    NotFound,
}

impl ProviderOrderStatus {
    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "CREATED" => Some(Self::Created),
            "SAVED" => Some(Self::Saved),
            "APPROVED" => Some(Self::Approved),
            "PAYER_ACTION_REQUIRED" => Some(Self::PayerActionRequired),
            "VOIDED" => Some(Self::Voided),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Buyer never finished checkout, or the order is gone.
    pub fn is_unpaid(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Saved | Self::PayerActionRequired | Self::Voided | Self::NotFound
        )
    }
}

/// Capture status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureStatus {
    Completed,
    Pending,
    Declined,
    Failed,
    Refunded,
}

impl CaptureStatus {
    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "COMPLETED" => Some(Self::Completed),
            "PENDING" => Some(Self::Pending),
            "DECLINED" => Some(Self::Declined),
            "FAILED" => Some(Self::Failed),
            "REFUNDED" | "PARTIALLY_REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Funds have moved to the merchant and are still there.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A capture attached to a provider order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDetails {
    pub capture_id: String,
    pub status: CaptureStatus,
    pub amount: BigDecimal,
    pub currency: String,
}

/// Authoritative provider view of an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOrder {
    pub order_id: String,
    pub status: ProviderOrderStatus,
    pub capture: Option<CaptureDetails>,
}

impl ProviderOrder {
    /// Order the provider does not know about.
    pub fn not_found(order_id: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            status: ProviderOrderStatus::NotFound,
            capture: None,
        }
    }
}

/// Result of creating a checkout order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: String,
    pub approve_url: String,
}

/// Thin I/O adapter over a provider's order API. Implementations hold no
/// state that affects correctness and perform no local writes.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create_order(
        &self,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<CreatedOrder, ProviderError>;

    async fn get_order(&self, order_id: &str) -> Result<ProviderOrder, ProviderError>;

    async fn capture_order(&self, order_id: &str) -> Result<ProviderOrder, ProviderError>;
}

/// Configured provider clients, keyed by kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(client.kind(), client);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderClient>, AppError> {
        self.clients
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Payment provider not configured: {}", kind)))
    }

    /// Resolves a path slug such as `paypal`.
    pub fn resolve(&self, slug: &str) -> Result<(ProviderKind, Arc<dyn ProviderClient>), AppError> {
        let kind: ProviderKind = slug.parse().map_err(AppError::NotFound)?;
        Ok((kind, self.get(kind)?))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.clients.keys().copied().collect()
    }
}
