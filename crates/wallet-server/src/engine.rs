//! Payment intake and wallet reconciliation.
//!
//! [`PaymentEngine`] wires the components together: intents are created here,
//! every confirmation channel goes through [`EventIngestor`], which hands the
//! order to [`CaptureProcessor`], which credits through [`LedgerWriter`].

pub mod capture;
pub mod ingest;
pub mod ledger;
pub mod scanner;

use bigdecimal::BigDecimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{NewPaymentIntent, PaymentIntent};
use crate::provider::ProviderRegistry;
use crate::store::{IntentStore, LedgerStore};

pub use capture::{CaptureOutcome, CaptureProcessor, CaptureResult, CaptureSource};
pub use ingest::{
    sign_webhook_body, verify_webhook_signature, EventIngestor, RedirectStatus, WebhookAck,
    WebhookEvent, SIGNATURE_HEADER,
};
pub use ledger::{CreditOutcome, LedgerWriter};
pub use scanner::{PendingIntent, ReconciliationScanner, ScanEntry, ScanReport, ScanSchedule};

/// Smallest top-up accepted.
pub const MIN_TOPUP: &str = "1.00";
/// Largest top-up accepted.
pub const MAX_TOPUP: &str = "10000.00";

/// Recent intents checked for a conflicting open currency.
const OPEN_INTENT_WINDOW: i64 = 50;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Age after which an unpaid intent is expired.
    pub expiry_minutes: i64,
    pub webhook_secret: Option<String>,
    /// Upper-case ISO 4217 codes accepted for top-ups.
    pub supported_currencies: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiry_minutes: 60,
            webhook_secret: None,
            supported_currencies: vec!["EUR".to_string(), "USD".to_string()],
        }
    }
}

/// Response to a top-up request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedIntent {
    pub order_id: String,
    pub approve_url: String,
    #[serde(skip)]
    pub intent: PaymentIntent,
}

pub struct PaymentEngine {
    intents: Arc<dyn IntentStore>,
    providers: ProviderRegistry,
    ledger: LedgerWriter,
    processor: Arc<CaptureProcessor>,
    ingestor: Arc<EventIngestor>,
    scanner: Arc<ReconciliationScanner>,
    supported_currencies: Vec<String>,
}

impl PaymentEngine {
    pub fn new(
        intents: Arc<dyn IntentStore>,
        ledger: Arc<dyn LedgerStore>,
        providers: ProviderRegistry,
        config: EngineConfig,
    ) -> Self {
        let ledger = LedgerWriter::new(ledger);
        let processor = Arc::new(CaptureProcessor::new(
            intents.clone(),
            ledger.clone(),
            providers.clone(),
            config.expiry_minutes,
        ));
        let ingestor = Arc::new(EventIngestor::new(
            intents.clone(),
            processor.clone(),
            config.webhook_secret,
        ));
        let scanner = Arc::new(ReconciliationScanner::new(intents.clone(), processor.clone()));

        Self {
            intents,
            providers,
            ledger,
            processor,
            ingestor,
            scanner,
            supported_currencies: config.supported_currencies,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn ledger(&self) -> &LedgerWriter {
        &self.ledger
    }

    pub fn processor(&self) -> &Arc<CaptureProcessor> {
        &self.processor
    }

    pub fn ingestor(&self) -> &Arc<EventIngestor> {
        &self.ingestor
    }

    pub fn scanner(&self) -> &Arc<ReconciliationScanner> {
        &self.scanner
    }

    pub async fn intent(&self, order_id: &str) -> Result<Option<PaymentIntent>, AppError> {
        self.intents.get(order_id).await
    }

    pub async fn intents_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, AppError> {
        self.intents.list_for_user(user_id, limit).await
    }

    /// Validates a top-up request, opens a checkout order with the provider
    /// and records the intent in CREATED state.
    pub async fn create_intent(
        &self,
        provider_slug: &str,
        user_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<CreatedIntent, AppError> {
        let (provider, client) = self.providers.resolve(provider_slug)?;
        let currency = self.validate_currency(currency)?;
        validate_amount(amount)?;

        if let Some(wallet) = self.ledger.wallet(user_id).await? {
            if wallet.currency != currency {
                return Err(AppError::BadRequest(format!(
                    "Wallet currency is {}; top-ups must use it",
                    wallet.currency
                )));
            }
        }

        // Until the first credit fixes the wallet currency, open intents do.
        let open = self
            .intents
            .list_for_user(user_id, OPEN_INTENT_WINDOW)
            .await?;
        if let Some(other) = open
            .iter()
            .find(|i| i.status.is_pending() && i.currency != currency)
        {
            return Err(AppError::BadRequest(format!(
                "Top-up {} in {} is still open; top-ups must use the same currency",
                other.order_id, other.currency
            )));
        }

        let amount = amount.with_scale(2);
        let order = client.create_order(&amount, &currency).await.inspect_err(|e| {
            tracing::warn!(%provider, %user_id, code = e.code(), error = %e, "Provider order creation failed")
        })?;

        let intent = self
            .intents
            .create(NewPaymentIntent::new(
                order.order_id.clone(),
                user_id,
                provider,
                currency,
                amount,
            ))
            .await?;

        tracing::info!(
            order_id = %intent.order_id,
            %user_id,
            %provider,
            amount = %intent.amount,
            currency = %intent.currency,
            "Payment intent created"
        );

        Ok(CreatedIntent {
            order_id: order.order_id,
            approve_url: order.approve_url,
            intent,
        })
    }

    fn validate_currency(&self, currency: &str) -> Result<String, AppError> {
        let currency = currency.trim().to_ascii_uppercase();
        if !self.supported_currencies.contains(&currency) {
            return Err(AppError::BadRequest(format!(
                "Unsupported currency: {}",
                currency
            )));
        }
        Ok(currency)
    }
}

/// Rejects amounts finer than one cent.
pub fn require_cents(amount: &BigDecimal) -> Result<(), AppError> {
    if &amount.with_scale(2) != amount {
        return Err(AppError::BadRequest(
            "Amount must have at most two decimal places".to_string(),
        ));
    }
    Ok(())
}

/// Positive, at most two decimals, within the top-up limits.
pub fn validate_amount(amount: &BigDecimal) -> Result<(), AppError> {
    let min = BigDecimal::from_str(MIN_TOPUP)
        .map_err(|e| AppError::Internal(format!("Bad minimum top-up: {}", e)))?;
    let max = BigDecimal::from_str(MAX_TOPUP)
        .map_err(|e| AppError::Internal(format!("Bad maximum top-up: {}", e)))?;

    if amount <= &BigDecimal::from(0) {
        return Err(AppError::BadRequest("Amount must be positive".to_string()));
    }
    require_cents(amount)?;
    if amount < &min || amount > &max {
        return Err(AppError::BadRequest(format!(
            "Amount must be between {} and {}",
            MIN_TOPUP, MAX_TOPUP
        )));
    }
    Ok(())
}
