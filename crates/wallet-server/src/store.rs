//! Persistence seams for payment intents and the wallet ledger.
//!
//! Both stores come in a PostgreSQL flavour and an in-memory flavour with the
//! same atomicity contract:
//!
//! * [`IntentStore::advance`] is a compare-and-set on `status`. Exactly one of
//!   any number of concurrent callers with the same `from` state succeeds.
//! * [`LedgerStore::append`] inserts the entry and applies its amount to the
//!   wallet as one unit. The unique idempotency key is the gate: a duplicate
//!   insert changes nothing and returns the stored entry.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    AdvanceFields, IntentStatus, NewPaymentIntent, NewTransaction, PaymentIntent, ProviderKind,
    Transaction, Wallet,
};

pub use memory::{InMemoryIntentStore, InMemoryLedgerStore};
pub use postgres::{PgIntentStore, PgLedgerStore};

#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Persists a new intent in CREATED state.
    async fn create(&self, intent: NewPaymentIntent) -> Result<PaymentIntent, AppError>;

    async fn get(&self, order_id: &str) -> Result<Option<PaymentIntent>, AppError>;

    /// Moves `order_id` from `from` to `to` only if its persisted status is
    /// still `from`. Returns false, without writing, when it is not.
    /// Transitions outside the state machine fail with `InvalidTransition`.
    async fn advance(
        &self,
        order_id: &str,
        from: IntentStatus,
        to: IntentStatus,
        fields: AdvanceFields,
    ) -> Result<bool, AppError>;

    /// Stores `event_id` as the last processed webhook event. Returns false
    /// when it already is the last one.
    async fn record_event(&self, order_id: &str, event_id: &str) -> Result<bool, AppError>;

    /// CREATED/APPROVED intents of `provider` created before `created_before`,
    /// oldest first.
    async fn list_stale(
        &self,
        provider: ProviderKind,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, AppError>;

    async fn list_for_user(&self, user_id: Uuid, limit: i64)
        -> Result<Vec<PaymentIntent>, AppError>;
}

/// Outcome of appending a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// Entry inserted and applied; carries the updated wallet.
    Created(Transaction, Wallet),
    /// Idempotency key already present; nothing changed.
    Existing(Transaction),
}

impl AppendOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            AppendOutcome::Created(tx, _) | AppendOutcome::Existing(tx) => tx,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, AppendOutcome::Created(..))
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, entry: NewTransaction) -> Result<AppendOutcome, AppError>;

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Transaction>, AppError>;

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, AppError>;

    /// Most recent entries first.
    async fn recent_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError>;

    /// Sum of confirmed entry amounts for a user.
    async fn confirmed_sum(&self, user_id: Uuid) -> Result<BigDecimal, AppError>;
}

/// Rejects transitions the intent state machine does not allow.
pub(crate) fn check_transition(
    order_id: &str,
    from: IntentStatus,
    to: IntentStatus,
) -> Result<(), AppError> {
    if from.can_advance_to(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            order_id: order_id.to_string(),
            from,
            to,
        })
    }
}

/// Validates an entry against the wallet it will be applied to and returns
/// the resulting balance.
pub(crate) fn apply_to_balance(
    wallet: &Wallet,
    entry: &NewTransaction,
) -> Result<BigDecimal, AppError> {
    if wallet.currency != entry.currency {
        return Err(AppError::BadRequest(format!(
            "Wallet currency is {}, entry currency is {}",
            wallet.currency, entry.currency
        )));
    }

    let new_balance = &wallet.balance + &entry.amount;
    if new_balance < BigDecimal::from(0) {
        return Err(AppError::InsufficientFunds {
            balance: wallet.balance.to_string(),
            required: (-entry.amount.clone()).to_string(),
        });
    }

    Ok(new_balance)
}
