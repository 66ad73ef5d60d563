//! Data model for payment intake and the wallet ledger.

pub mod payment_intent;
pub mod transaction;
pub mod wallet;

pub use payment_intent::{
    AdvanceFields, IntentStatus, NewPaymentIntent, PaymentIntent, ProviderKind,
};
pub use transaction::{
    refund_key, topup_key, NewTransaction, Transaction, TransactionStatus, TransactionType,
};
pub use wallet::{LedgerConsistency, Wallet};
