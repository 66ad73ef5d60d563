//! The only component allowed to change a wallet balance.

use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::require_cents;
use crate::error::AppError;
use crate::models::{
    refund_key, topup_key, LedgerConsistency, NewTransaction, ProviderKind, Transaction, Wallet,
};
use crate::store::{AppendOutcome, LedgerStore};

/// Result of a ledger write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditOutcome {
    pub transaction: Transaction,
    /// False when the idempotency key was already present and this call was a
    /// replay of an earlier write.
    pub created: bool,
    /// Balance after the write, when this call applied it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<BigDecimal>,
}

impl From<AppendOutcome> for CreditOutcome {
    fn from(outcome: AppendOutcome) -> Self {
        match outcome {
            AppendOutcome::Created(transaction, wallet) => Self {
                transaction,
                created: true,
                balance: Some(wallet.balance),
            },
            AppendOutcome::Existing(transaction) => Self {
                transaction,
                created: false,
                balance: None,
            },
        }
    }
}

#[derive(Clone)]
pub struct LedgerWriter {
    ledger: Arc<dyn LedgerStore>,
}

fn require_positive(amount: &BigDecimal, what: &str) -> Result<(), AppError> {
    if amount <= &BigDecimal::from(0) {
        return Err(AppError::BadRequest(format!("{} amount must be positive", what)));
    }
    require_cents(amount)
}

impl LedgerWriter {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Credits a captured provider order. At most one entry per
    /// `(provider, order_id)` ever exists; a repeated call returns it.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
        provider: ProviderKind,
        order_id: &str,
        event_id: Option<&str>,
    ) -> Result<CreditOutcome, AppError> {
        require_positive(amount, "Top-up")?;

        let entry =
            NewTransaction::topup(user_id, amount.clone(), currency.to_string(), provider, order_id)
                .with_event(event_id.map(str::to_string));
        let outcome = CreditOutcome::from(self.ledger.append(entry).await?);

        if outcome.created {
            tracing::info!(
                %user_id,
                order_id,
                amount = %amount,
                currency,
                "Wallet credited"
            );
        } else {
            tracing::warn!(
                %user_id,
                order_id,
                transaction_id = %outcome.transaction.id,
                "Duplicate credit rejected by ledger; returning existing entry"
            );
        }
        Ok(outcome)
    }

    /// The top-up entry for a provider order, if it was credited.
    pub async fn topup_for(
        &self,
        provider: ProviderKind,
        order_id: &str,
    ) -> Result<Option<Transaction>, AppError> {
        self.ledger.find_by_key(&topup_key(provider, order_id)).await
    }

    /// Returns balance to a wallet for a fulfillment order, once per order.
    pub async fn refund(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
        order_id: &str,
    ) -> Result<CreditOutcome, AppError> {
        require_positive(amount, "Refund")?;

        let entry = NewTransaction::refund(user_id, amount.clone(), currency.to_string(), order_id);
        let outcome = CreditOutcome::from(self.ledger.append(entry).await?);
        if outcome.created {
            tracing::info!(%user_id, order_id, amount = %amount, "Order refunded to wallet");
        } else {
            tracing::info!(
                %user_id,
                key = %refund_key(order_id),
                "Refund already applied"
            );
        }
        Ok(outcome)
    }

    /// Spends balance on a fulfillment order. Fails without writing when the
    /// balance does not cover `amount`.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<CreditOutcome, AppError> {
        require_positive(amount, "Debit")?;

        let entry = NewTransaction::order_debit(
            user_id,
            amount,
            currency.to_string(),
            idempotency_key.to_string(),
        );
        let outcome = CreditOutcome::from(self.ledger.append(entry).await?);
        if outcome.created {
            tracing::info!(%user_id, idempotency_key, amount = %amount, "Wallet debited");
        }
        Ok(outcome)
    }

    /// Signed operator correction.
    pub async fn adjust(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
        idempotency_key: &str,
        reason: &str,
    ) -> Result<CreditOutcome, AppError> {
        if amount == &BigDecimal::from(0) {
            return Err(AppError::BadRequest(
                "Adjustment amount must be non-zero".to_string(),
            ));
        }
        require_cents(amount)?;
        if reason.trim().is_empty() {
            return Err(AppError::BadRequest(
                "Adjustment reason is required".to_string(),
            ));
        }

        let entry = NewTransaction::adjustment(
            user_id,
            amount.clone(),
            currency.to_string(),
            idempotency_key.to_string(),
            reason.to_string(),
        );
        let outcome = CreditOutcome::from(self.ledger.append(entry).await?);
        if outcome.created {
            tracing::warn!(%user_id, idempotency_key, amount = %amount, reason, "Wallet adjusted");
        }
        Ok(outcome)
    }

    pub async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, AppError> {
        self.ledger.wallet(user_id).await
    }

    pub async fn recent_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        self.ledger.recent_transactions(user_id, limit).await
    }

    /// Compares the stored balance with the sum of confirmed entries.
    pub async fn verify_consistency(&self, user_id: Uuid) -> Result<LedgerConsistency, AppError> {
        let balance = self
            .ledger
            .wallet(user_id)
            .await?
            .map(|w| w.balance)
            .unwrap_or_else(|| BigDecimal::from(0));
        let ledger_sum = self.ledger.confirmed_sum(user_id).await?;

        let check = LedgerConsistency::new(user_id, balance, ledger_sum);
        if !check.is_consistent() {
            tracing::error!(
                %user_id,
                balance = %check.balance,
                ledger_sum = %check.ledger_sum,
                "Wallet balance diverges from ledger"
            );
        }
        Ok(check)
    }
}
