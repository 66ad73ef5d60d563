//! Wallet ledger entries. The sum of confirmed entries defines a wallet balance.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use super::payment_intent::ProviderKind;

/// Kinds of ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Wallet funded through a payment provider.
    Topup,
    /// Balance spent on a fulfillment order.
    Order,
    /// Balance returned for a failed or cancelled order.
    Refund,
    /// Manual operator correction.
    Adjustment,
}

/// Settlement state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    /// Applied to the wallet balance; never mutated afterwards.
    Confirmed,
    Failed,
    Expired,
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    /// Signed delta applied to the wallet.
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: Option<ProviderKind>,
    pub provider_order_id: Option<String>,
    pub provider_event_id: Option<String>,
    /// Unique per entry; duplicates are rejected at insert.
    pub idempotency_key: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data required to append a ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub kind: TransactionType,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: Option<ProviderKind>,
    pub provider_order_id: Option<String>,
    pub provider_event_id: Option<String>,
    pub idempotency_key: String,
    pub description: Option<String>,
}

/// Idempotency key for the credit of a provider order.
pub fn topup_key(provider: ProviderKind, order_id: &str) -> String {
    format!("topup:{}:{}", provider, order_id)
}

/// Idempotency key for the refund of a fulfillment order.
pub fn refund_key(order_id: &str) -> String {
    format!("refund:{}", order_id)
}

impl NewTransaction {
    /// Create a top-up entry for a captured provider order.
    pub fn topup(
        user_id: Uuid,
        amount: BigDecimal,
        currency: String,
        provider: ProviderKind,
        order_id: &str,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionType::Topup,
            amount,
            currency,
            provider: Some(provider),
            provider_order_id: Some(order_id.to_string()),
            provider_event_id: None,
            idempotency_key: topup_key(provider, order_id),
            description: Some(format!("{} top-up {}", provider, order_id)),
        }
    }

    /// Create a refund entry crediting back a fulfillment order.
    pub fn refund(user_id: Uuid, amount: BigDecimal, currency: String, order_id: &str) -> Self {
        Self {
            user_id,
            kind: TransactionType::Refund,
            amount,
            currency,
            provider: None,
            provider_order_id: None,
            provider_event_id: None,
            idempotency_key: refund_key(order_id),
            description: Some(format!("Refund for order {}", order_id)),
        }
    }

    /// Create a debit entry for balance spent on a fulfillment order.
    /// `amount` is the positive price; the entry stores its negation.
    pub fn order_debit(
        user_id: Uuid,
        amount: &BigDecimal,
        currency: String,
        idempotency_key: String,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionType::Order,
            amount: -amount.clone(),
            currency,
            provider: None,
            provider_order_id: None,
            provider_event_id: None,
            idempotency_key,
            description: None,
        }
    }

    /// Create a signed operator adjustment.
    pub fn adjustment(
        user_id: Uuid,
        amount: BigDecimal,
        currency: String,
        idempotency_key: String,
        reason: String,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionType::Adjustment,
            amount,
            currency,
            provider: None,
            provider_order_id: None,
            provider_event_id: None,
            idempotency_key,
            description: Some(reason),
        }
    }

    /// Attach the webhook event that led to this entry.
    pub fn with_event(mut self, event_id: Option<String>) -> Self {
        self.provider_event_id = event_id;
        self
    }

    /// Builds the stored, confirmed entry.
    pub fn into_confirmed(self) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            kind: self.kind,
            status: TransactionStatus::Confirmed,
            amount: self.amount,
            currency: self.currency,
            provider: self.provider,
            provider_order_id: self.provider_order_id,
            provider_event_id: self.provider_event_id,
            idempotency_key: self.idempotency_key,
            description: self.description,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transaction_type_serialization() {
        assert_eq!(
            serde_json::to_string(&TransactionType::Topup).unwrap(),
            "\"topup\""
        );
        assert_eq!(
            serde_json::to_string(&TransactionType::Adjustment).unwrap(),
            "\"adjustment\""
        );
        assert_eq!(
            serde_json::from_str::<TransactionType>("\"refund\"").unwrap(),
            TransactionType::Refund
        );
    }

    #[test]
    fn test_transaction_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Confirmed).unwrap(),
            "\"confirmed\""
        );
        assert_eq!(
            serde_json::from_str::<TransactionStatus>("\"expired\"").unwrap(),
            TransactionStatus::Expired
        );
    }

    #[test]
    fn test_topup_entry_keyed_by_provider_order() {
        let user_id = Uuid::new_v4();
        let entry = NewTransaction::topup(
            user_id,
            BigDecimal::from_str("10.00").unwrap(),
            "EUR".to_string(),
            ProviderKind::Paypal,
            "PAY-1",
        );

        assert_eq!(entry.kind, TransactionType::Topup);
        assert_eq!(entry.provider, Some(ProviderKind::Paypal));
        assert_eq!(entry.provider_order_id.as_deref(), Some("PAY-1"));
        assert_eq!(entry.idempotency_key, "topup:paypal:PAY-1");
    }

    #[test]
    fn test_refund_entry_uses_refund_key() {
        let entry = NewTransaction::refund(
            Uuid::new_v4(),
            BigDecimal::from_str("4.50").unwrap(),
            "EUR".to_string(),
            "ORD-77",
        );
        assert_eq!(entry.kind, TransactionType::Refund);
        assert_eq!(entry.idempotency_key, "refund:ORD-77");
        assert!(entry.provider_order_id.is_none());
    }

    #[test]
    fn test_order_debit_is_negative() {
        let entry = NewTransaction::order_debit(
            Uuid::new_v4(),
            &BigDecimal::from_str("3.25").unwrap(),
            "EUR".to_string(),
            "order:ORD-1".to_string(),
        );
        assert_eq!(entry.amount, BigDecimal::from_str("-3.25").unwrap());
        assert_eq!(entry.kind, TransactionType::Order);
    }

    #[test]
    fn test_into_confirmed() {
        let entry = NewTransaction::topup(
            Uuid::new_v4(),
            BigDecimal::from_str("10.00").unwrap(),
            "EUR".to_string(),
            ProviderKind::Paypal,
            "PAY-2",
        )
        .with_event(Some("WH-1".to_string()));
        let tx = entry.into_confirmed();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert_eq!(tx.provider_event_id.as_deref(), Some("WH-1"));

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "topup");
        assert_eq!(json["idempotencyKey"], "topup:paypal:PAY-2");
    }
}
