//! In-memory stores used by tests and database-less local runs.
//!
//! Each store keeps its state behind a single `tokio::sync::RwLock`; every
//! conditional update runs its check and write under one write guard, which
//! gives the same compare-and-set semantics as the SQL predicates.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{apply_to_balance, check_transition, AppendOutcome, IntentStore, LedgerStore};
use crate::error::AppError;
use crate::models::{
    AdvanceFields, IntentStatus, NewPaymentIntent, NewTransaction, PaymentIntent, ProviderKind,
    Transaction, TransactionStatus, Wallet,
};

/// Payment intents keyed by order id.
#[derive(Default, Clone)]
pub struct InMemoryIntentStore {
    intents: Arc<RwLock<HashMap<String, PaymentIntent>>>,
}

impl InMemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentStore for InMemoryIntentStore {
    async fn create(&self, intent: NewPaymentIntent) -> Result<PaymentIntent, AppError> {
        let mut intents = self.intents.write().await;
        if intents.contains_key(&intent.order_id) {
            return Err(AppError::BadRequest(format!(
                "Payment intent already exists for order {}",
                intent.order_id
            )));
        }
        let intent = intent.into_intent();
        intents.insert(intent.order_id.clone(), intent.clone());
        Ok(intent)
    }

    async fn get(&self, order_id: &str) -> Result<Option<PaymentIntent>, AppError> {
        let intents = self.intents.read().await;
        Ok(intents.get(order_id).cloned())
    }

    async fn advance(
        &self,
        order_id: &str,
        from: IntentStatus,
        to: IntentStatus,
        fields: AdvanceFields,
    ) -> Result<bool, AppError> {
        check_transition(order_id, from, to)?;

        let mut intents = self.intents.write().await;
        let Some(intent) = intents.get_mut(order_id) else {
            return Ok(false);
        };
        if intent.status != from {
            return Ok(false);
        }

        intent.status = to;
        if fields.capture_id.is_some() {
            intent.capture_id = fields.capture_id;
        }
        intent.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_event(&self, order_id: &str, event_id: &str) -> Result<bool, AppError> {
        let mut intents = self.intents.write().await;
        let Some(intent) = intents.get_mut(order_id) else {
            return Ok(false);
        };
        if intent.last_event_id.as_deref() == Some(event_id) {
            return Ok(false);
        }
        intent.last_event_id = Some(event_id.to_string());
        intent.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_stale(
        &self,
        provider: ProviderKind,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, AppError> {
        let intents = self.intents.read().await;
        let mut stale: Vec<PaymentIntent> = intents
            .values()
            .filter(|i| i.provider == provider)
            .filter(|i| i.status.is_pending())
            .filter(|i| i.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|i| i.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, AppError> {
        let intents = self.intents.read().await;
        let mut owned: Vec<PaymentIntent> = intents
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit.max(0) as usize);
        Ok(owned)
    }
}

#[derive(Default)]
struct LedgerState {
    transactions: Vec<Transaction>,
    by_key: HashMap<String, usize>,
    wallets: HashMap<Uuid, Wallet>,
}

/// Ledger entries and wallets behind one lock, so insert and balance update
/// are applied together.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, entry: NewTransaction) -> Result<AppendOutcome, AppError> {
        let mut state = self.state.write().await;

        if let Some(&index) = state.by_key.get(&entry.idempotency_key) {
            return Ok(AppendOutcome::Existing(state.transactions[index].clone()));
        }

        let wallet = state
            .wallets
            .get(&entry.user_id)
            .cloned()
            .unwrap_or_else(|| Wallet::empty(entry.user_id, entry.currency.clone()));
        let new_balance = apply_to_balance(&wallet, &entry)?;

        let tx = entry.into_confirmed();
        let wallet = Wallet {
            balance: new_balance,
            updated_at: tx.created_at,
            ..wallet
        };

        let index = state.transactions.len();
        state.by_key.insert(tx.idempotency_key.clone(), index);
        state.transactions.push(tx.clone());
        state.wallets.insert(wallet.user_id, wallet.clone());

        Ok(AppendOutcome::Created(tx, wallet))
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Transaction>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .get(idempotency_key)
            .map(|&index| state.transactions[index].clone()))
    }

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, AppError> {
        let state = self.state.read().await;
        Ok(state.wallets.get(&user_id).cloned())
    }

    async fn recent_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn confirmed_sum(&self, user_id: Uuid) -> Result<BigDecimal, AppError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id && tx.status == TransactionStatus::Confirmed)
            .fold(BigDecimal::from(0), |sum, tx| sum + &tx.amount))
    }
}
