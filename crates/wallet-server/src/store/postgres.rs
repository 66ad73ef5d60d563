//! PostgreSQL-backed stores.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{apply_to_balance, check_transition, AppendOutcome, IntentStore, LedgerStore};
use crate::error::AppError;
use crate::models::{
    AdvanceFields, IntentStatus, NewPaymentIntent, NewTransaction, PaymentIntent, ProviderKind,
    Transaction, TransactionStatus, Wallet,
};

const INTENT_COLUMNS: &str = "id, order_id, user_id, provider, currency, amount, status, capture_id, last_event_id, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, type, status, amount, currency, provider, provider_order_id, provider_event_id, idempotency_key, description, created_at";

#[derive(Clone)]
pub struct PgIntentStore {
    pool: PgPool,
}

impl PgIntentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntentStore for PgIntentStore {
    async fn create(&self, intent: NewPaymentIntent) -> Result<PaymentIntent, AppError> {
        let intent: PaymentIntent = sqlx::query_as(&format!(
            r#"
            INSERT INTO payment_intents (id, order_id, user_id, provider, currency, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {INTENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&intent.order_id)
        .bind(intent.user_id)
        .bind(intent.provider)
        .bind(&intent.currency)
        .bind(&intent.amount)
        .bind(IntentStatus::Created)
        .bind(intent.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(intent)
    }

    async fn get(&self, order_id: &str) -> Result<Option<PaymentIntent>, AppError> {
        let intent = sqlx::query_as(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(intent)
    }

    async fn advance(
        &self,
        order_id: &str,
        from: IntentStatus,
        to: IntentStatus,
        fields: AdvanceFields,
    ) -> Result<bool, AppError> {
        check_transition(order_id, from, to)?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = $1, capture_id = COALESCE($2, capture_id), updated_at = NOW()
            WHERE order_id = $3 AND status = $4
            "#,
        )
        .bind(to)
        .bind(fields.capture_id)
        .bind(order_id)
        .bind(from)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn record_event(&self, order_id: &str, event_id: &str) -> Result<bool, AppError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE payment_intents
            SET last_event_id = $1, updated_at = NOW()
            WHERE order_id = $2 AND last_event_id IS DISTINCT FROM $1
            "#,
        )
        .bind(event_id)
        .bind(order_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn list_stale(
        &self,
        provider: ProviderKind,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, AppError> {
        let intents = sqlx::query_as(&format!(
            r#"
            SELECT {INTENT_COLUMNS}
            FROM payment_intents
            WHERE provider = $1
              AND status IN ('CREATED', 'APPROVED')
              AND created_at < $2
            ORDER BY created_at ASC
            LIMIT $3
            "#
        ))
        .bind(provider)
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(intents)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, AppError> {
        let intents = sqlx::query_as(&format!(
            r#"
            SELECT {INTENT_COLUMNS}
            FROM payment_intents
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(intents)
    }
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    /// The insert runs first and gates the balance update; both commit in
    /// one database transaction.
    async fn append(&self, entry: NewTransaction) -> Result<AppendOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<Transaction> = sqlx::query_as(&format!(
            r#"
            INSERT INTO wallet_transactions (id, user_id, type, status, amount, currency, provider, provider_order_id, provider_event_id, idempotency_key, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT DO NOTHING
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.kind)
        .bind(TransactionStatus::Confirmed)
        .bind(&entry.amount)
        .bind(&entry.currency)
        .bind(entry.provider)
        .bind(&entry.provider_order_id)
        .bind(&entry.provider_event_id)
        .bind(&entry.idempotency_key)
        .bind(&entry.description)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(inserted) = inserted else {
            // Conflict on the idempotency key or the top-up order index.
            let existing: Transaction = sqlx::query_as(&format!(
                r#"
                SELECT {TRANSACTION_COLUMNS}
                FROM wallet_transactions
                WHERE idempotency_key = $1
                   OR (type = 'topup' AND provider = $2 AND provider_order_id = $3)
                LIMIT 1
                "#
            ))
            .bind(&entry.idempotency_key)
            .bind(entry.provider)
            .bind(&entry.provider_order_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(AppendOutcome::Existing(existing));
        };

        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, balance, currency)
            VALUES ($1, 0, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.currency)
        .execute(&mut *tx)
        .await?;

        let wallet: Wallet = sqlx::query_as(
            r#"
            SELECT user_id, balance, currency, created_at, updated_at
            FROM wallets
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(entry.user_id)
        .fetch_one(&mut *tx)
        .await?;

        // Dropping `tx` on error rolls back the ledger insert as well.
        let new_balance = apply_to_balance(&wallet, &entry)?;

        let wallet: Wallet = sqlx::query_as(
            r#"
            UPDATE wallets
            SET balance = $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING user_id, balance, currency, created_at, updated_at
            "#,
        )
        .bind(entry.user_id)
        .bind(&new_balance)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AppendOutcome::Created(inserted, wallet))
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Transaction>, AppError> {
        let transaction = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, AppError> {
        let wallet = sqlx::query_as(
            r#"
            SELECT user_id, balance, currency, created_at, updated_at
            FROM wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn recent_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let transactions = sqlx::query_as(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM wallet_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn confirmed_sum(&self, user_id: Uuid) -> Result<BigDecimal, AppError> {
        let total: Option<BigDecimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM wallet_transactions
            WHERE user_id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or_else(|| BigDecimal::from(0)))
    }
}
