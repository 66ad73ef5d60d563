//! Wallet model holding a user's spendable balance.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Custodial wallet. Only the ledger writer mutates `balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// Owner of the wallet; one wallet per user.
    pub user_id: Uuid,
    /// Current balance, always equal to the sum of confirmed ledger entries.
    pub balance: BigDecimal,
    /// Currency fixed by the first ledger entry.
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// An empty wallet in the given currency.
    pub fn empty(user_id: Uuid, currency: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: BigDecimal::from(0),
            currency,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of comparing a wallet balance against its ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerConsistency {
    pub user_id: Uuid,
    pub balance: BigDecimal,
    pub ledger_sum: BigDecimal,
    pub consistent: bool,
}

impl LedgerConsistency {
    pub fn new(user_id: Uuid, balance: BigDecimal, ledger_sum: BigDecimal) -> Self {
        let consistent = balance == ledger_sum;
        Self {
            user_id,
            balance,
            ledger_sum,
            consistent,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }
}
