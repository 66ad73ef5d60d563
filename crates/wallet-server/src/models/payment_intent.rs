//! Payment intent model for tracking requested wallet top-ups.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payment providers that can fund a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_provider", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// PayPal Orders API
    Paypal,
}

impl ProviderKind {
    /// Path slug used in the HTTP surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Paypal => "paypal",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paypal" => Ok(ProviderKind::Paypal),
            other => Err(format!("Unsupported payment provider: {}", other)),
        }
    }
}

/// Lifecycle states of a payment intent.
///
/// Status only ever moves forward; see [`IntentStatus::can_advance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "intent_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentStatus {
    /// Order created at the provider, buyer has not approved yet
    Created,
    /// Buyer approved the order, funds not captured yet
    Approved,
    /// Funds captured and wallet credited
    Completed,
    /// Provider declined the capture
    Failed,
    /// Order voided or abandoned past the expiry policy
    Expired,
}

/// Allowed transitions, one row per source state.
const TRANSITIONS: &[(IntentStatus, &[IntentStatus])] = &[
    (
        IntentStatus::Created,
        &[
            IntentStatus::Approved,
            IntentStatus::Completed,
            IntentStatus::Failed,
            IntentStatus::Expired,
        ],
    ),
    (
        IntentStatus::Approved,
        &[
            IntentStatus::Completed,
            IntentStatus::Failed,
            IntentStatus::Expired,
        ],
    ),
    (IntentStatus::Completed, &[]),
    (IntentStatus::Failed, &[]),
    (IntentStatus::Expired, &[]),
];

impl IntentStatus {
    /// Returns the states reachable from this one in a single step.
    pub fn allowed_next(&self) -> &'static [IntentStatus] {
        TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .map(|(_, next)| *next)
            .unwrap_or(&[])
    }

    /// Check if moving from this state to `next` is a legal transition.
    pub fn can_advance_to(&self, next: IntentStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    /// States the reconciliation scanner looks at.
    pub fn is_pending(&self) -> bool {
        matches!(self, IntentStatus::Created | IntentStatus::Approved)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentStatus::Created => "CREATED",
            IntentStatus::Approved => "APPROVED",
            IntentStatus::Completed => "COMPLETED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// A requested top-up, keyed by the provider-issued order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Unique identifier for this intent.
    pub id: Uuid,
    /// Provider order id; globally unique and the capture idempotency key.
    pub order_id: String,
    /// Wallet owner.
    pub user_id: Uuid,
    /// Provider the order was created with.
    pub provider: ProviderKind,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Requested amount, fixed at creation.
    pub amount: BigDecimal,
    /// Current lifecycle state.
    pub status: IntentStatus,
    /// Provider capture reference, set on the transition into COMPLETED.
    pub capture_id: Option<String>,
    /// Most recent webhook event processed for this intent.
    pub last_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new payment intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentIntent {
    pub order_id: String,
    pub user_id: Uuid,
    pub provider: ProviderKind,
    pub currency: String,
    pub amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl NewPaymentIntent {
    /// Create intent data stamped with the current time.
    pub fn new(
        order_id: String,
        user_id: Uuid,
        provider: ProviderKind,
        currency: String,
        amount: BigDecimal,
    ) -> Self {
        Self {
            order_id,
            user_id,
            provider,
            currency,
            amount,
            created_at: Utc::now(),
        }
    }

    /// Builds the persisted record in CREATED state.
    pub fn into_intent(self) -> PaymentIntent {
        PaymentIntent {
            id: Uuid::new_v4(),
            order_id: self.order_id,
            user_id: self.user_id,
            provider: self.provider,
            currency: self.currency,
            amount: self.amount,
            status: IntentStatus::Created,
            capture_id: None,
            last_event_id: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Extra fields written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvanceFields {
    pub capture_id: Option<String>,
}

impl AdvanceFields {
    pub fn with_capture(capture_id: impl Into<String>) -> Self {
        Self {
            capture_id: Some(capture_id.into()),
        }
    }
}

impl PaymentIntent {
    /// Minutes elapsed since the intent was created.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_minutes()
    }

    /// Check if the intent is older than the given number of minutes.
    pub fn is_older_than(&self, minutes: i64, now: DateTime<Utc>) -> bool {
        self.age_minutes(now) >= minutes
    }
}
