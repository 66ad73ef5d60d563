//! Idempotent capture: ask the provider whether an order is paid and credit
//! it exactly once, whichever channel asked.
//!
//! The intent store's compare-and-set on `status` is the only
//! synchronization. Callers that lose a transition race never write to the
//! ledger on the strength of that transition; they re-read and report what
//! the winner did.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::ledger::LedgerWriter;
use crate::error::AppError;
use crate::models::{AdvanceFields, IntentStatus, PaymentIntent};
use crate::provider::{
    CaptureDetails, CaptureStatus, ProviderError, ProviderOrder, ProviderOrderStatus,
    ProviderRegistry,
};
use crate::store::IntentStore;

/// How long a COMPLETED intent without a top-up entry is left to the caller
/// that completed it before redirect and webhook calls repair the credit.
const REPAIR_GRACE_SECONDS: i64 = 120;

/// Channel that triggered a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    Redirect,
    Webhook { event_id: String },
    Admin,
    Scanner,
}

impl CaptureSource {
    pub fn label(&self) -> &'static str {
        match self {
            CaptureSource::Redirect => "redirect",
            CaptureSource::Webhook { .. } => "webhook",
            CaptureSource::Admin => "admin",
            CaptureSource::Scanner => "scanner",
        }
    }

    /// Operator and reconciliation calls run outside the live checkout race.
    fn is_out_of_band(&self) -> bool {
        matches!(self, CaptureSource::Admin | CaptureSource::Scanner)
    }

    pub fn event_id(&self) -> Option<&str> {
        match self {
            CaptureSource::Webhook { event_id } => Some(event_id),
            _ => None,
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a capture call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// This call created the top-up entry.
    Credited,
    /// The order was already completed and credited.
    AlreadyCompleted,
    /// The intent was already FAILED or EXPIRED.
    AlreadyTerminal,
    /// Provider declined or reversed the capture; intent is now FAILED.
    Failed,
    /// Buyer never paid within the expiry window; intent is now EXPIRED.
    Expired,
    /// Not paid yet; intent left as it was.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub already_done: bool,
    pub credited: bool,
    pub outcome: CaptureOutcome,
    pub intent: PaymentIntent,
}

impl CaptureResult {
    fn completed(intent: PaymentIntent, created: bool) -> Self {
        Self {
            already_done: !created,
            credited: created,
            outcome: if created {
                CaptureOutcome::Credited
            } else {
                CaptureOutcome::AlreadyCompleted
            },
            intent,
        }
    }

    fn already_done(intent: PaymentIntent) -> Self {
        let outcome = if intent.status == IntentStatus::Completed {
            CaptureOutcome::AlreadyCompleted
        } else {
            CaptureOutcome::AlreadyTerminal
        };
        Self {
            already_done: true,
            credited: false,
            outcome,
            intent,
        }
    }

    fn transitioned(intent: PaymentIntent, outcome: CaptureOutcome) -> Self {
        Self {
            already_done: false,
            credited: false,
            outcome,
            intent,
        }
    }
}

pub struct CaptureProcessor {
    intents: Arc<dyn IntentStore>,
    ledger: LedgerWriter,
    providers: ProviderRegistry,
    expiry_minutes: i64,
}

impl CaptureProcessor {
    pub fn new(
        intents: Arc<dyn IntentStore>,
        ledger: LedgerWriter,
        providers: ProviderRegistry,
        expiry_minutes: i64,
    ) -> Self {
        Self {
            intents,
            ledger,
            providers,
            expiry_minutes,
        }
    }

    pub fn expiry_minutes(&self) -> i64 {
        self.expiry_minutes
    }

    /// Drives `order_id` towards a terminal state using the provider's view
    /// of the order. Provider failures propagate and leave the intent in its
    /// current non-terminal state.
    pub async fn capture(
        &self,
        order_id: &str,
        source: CaptureSource,
    ) -> Result<CaptureResult, AppError> {
        let intent = self.load(order_id).await?;
        if intent.status.is_terminal() {
            tracing::debug!(order_id, status = %intent.status, %source, "Capture on terminal intent");
            let repair = may_repair(&intent, &source);
            return self.settle_terminal(intent, &source, repair).await;
        }

        let client = self.providers.get(intent.provider)?;
        let mut order = client
            .get_order(order_id)
            .await
            .inspect_err(|e| log_provider_failure(order_id, &source, e))?;
        let mut current = intent.status;

        if order.status == ProviderOrderStatus::Approved && order.capture.is_none() {
            if current == IntentStatus::Created {
                current = self.mark_approved(order_id, &source).await?;
                if current.is_terminal() {
                    let intent = self.load(order_id).await?;
                    return self.settle_terminal(intent, &source, false).await;
                }
            }
            order = client
                .capture_order(order_id)
                .await
                .inspect_err(|e| log_provider_failure(order_id, &source, e))?;
        }

        match order.capture.clone() {
            Some(capture) if capture.status.is_settled() => {
                self.complete(&intent, current, &capture, &source).await
            }
            Some(capture) if capture.status == CaptureStatus::Refunded => {
                tracing::error!(
                    order_id,
                    capture_id = %capture.capture_id,
                    amount = %capture.amount,
                    "Capture was refunded before it was credited; not crediting"
                );
                self.finish(order_id, current, IntentStatus::Failed, CaptureOutcome::Failed, &source)
                    .await
            }
            Some(capture)
                if matches!(capture.status, CaptureStatus::Declined | CaptureStatus::Failed) =>
            {
                tracing::warn!(
                    order_id,
                    capture_id = %capture.capture_id,
                    status = ?capture.status,
                    "Provider declined capture"
                );
                self.finish(order_id, current, IntentStatus::Failed, CaptureOutcome::Failed, &source)
                    .await
            }
            Some(capture) => {
                tracing::info!(
                    order_id,
                    capture_id = %capture.capture_id,
                    "Capture pending at provider"
                );
                Ok(CaptureResult::transitioned(
                    self.load(order_id).await?,
                    CaptureOutcome::Pending,
                ))
            }
            None => self.handle_unpaid(&intent, current, &order, &source).await,
        }
    }

    /// CREATED -> APPROVED. Returns the status the intent ended up in.
    async fn mark_approved(
        &self,
        order_id: &str,
        source: &CaptureSource,
    ) -> Result<IntentStatus, AppError> {
        let advanced = self
            .intents
            .advance(
                order_id,
                IntentStatus::Created,
                IntentStatus::Approved,
                AdvanceFields::default(),
            )
            .await?;

        if advanced {
            tracing::info!(order_id, %source, "Intent approved by buyer");
            return Ok(IntentStatus::Approved);
        }
        Ok(self.load(order_id).await?.status)
    }

    async fn complete(
        &self,
        intent: &PaymentIntent,
        current: IntentStatus,
        capture: &CaptureDetails,
        source: &CaptureSource,
    ) -> Result<CaptureResult, AppError> {
        let order_id = intent.order_id.as_str();

        if capture.currency != intent.currency || capture.amount != intent.amount {
            tracing::error!(
                order_id,
                requested = %intent.amount,
                currency = %intent.currency,
                captured = %capture.amount,
                captured_currency = %capture.currency,
                "Captured amount does not match intent; manual review required"
            );
            return Err(ProviderError::AmountMismatch {
                requested: intent.amount.clone(),
                currency: intent.currency.clone(),
                captured: capture.amount.clone(),
                captured_currency: capture.currency.clone(),
            }
            .into());
        }

        // The first ledger entry fixes the wallet currency.
        if let Some(wallet) = self.ledger.wallet(intent.user_id).await? {
            if wallet.currency != capture.currency {
                tracing::error!(
                    order_id,
                    user_id = %intent.user_id,
                    wallet_currency = %wallet.currency,
                    captured_currency = %capture.currency,
                    "Captured currency differs from wallet currency; manual review required"
                );
                return Err(AppError::BadRequest(format!(
                    "Wallet currency is {}, capture is in {}",
                    wallet.currency, capture.currency
                )));
            }
        }

        // A peer may have moved CREATED -> APPROVED under us; retry from the
        // fresh status. Status only moves forward, so this ends.
        let mut from = current;
        while !self
            .intents
            .advance(
                order_id,
                from,
                IntentStatus::Completed,
                AdvanceFields::with_capture(&capture.capture_id),
            )
            .await?
        {
            let fresh = self.load(order_id).await?;
            if fresh.status.is_terminal() || fresh.status == from {
                tracing::debug!(order_id, %source, "Lost completion race");
                return self.settle_terminal_or_pending(fresh, source).await;
            }
            from = fresh.status;
        }

        tracing::info!(
            order_id,
            capture_id = %capture.capture_id,
            %source,
            "Intent completed"
        );

        let credit = self
            .ledger
            .credit(
                intent.user_id,
                &capture.amount,
                &capture.currency,
                intent.provider,
                order_id,
                source.event_id(),
            )
            .await
            .inspect_err(|e| {
                tracing::error!(
                    order_id,
                    error = %e,
                    "Credit failed after completion; next capture call will repair it"
                )
            })?;

        let intent = self.load(order_id).await?;
        Ok(CaptureResult::completed(intent, credit.created))
    }

    async fn handle_unpaid(
        &self,
        intent: &PaymentIntent,
        current: IntentStatus,
        order: &ProviderOrder,
        source: &CaptureSource,
    ) -> Result<CaptureResult, AppError> {
        let order_id = intent.order_id.as_str();

        if order.status.is_unpaid() && intent.is_older_than(self.expiry_minutes, Utc::now()) {
            tracing::info!(
                order_id,
                provider_status = ?order.status,
                age_minutes = intent.age_minutes(Utc::now()),
                "Expiring unpaid intent"
            );
            return self
                .finish(order_id, current, IntentStatus::Expired, CaptureOutcome::Expired, source)
                .await;
        }

        if order.status == ProviderOrderStatus::Completed {
            tracing::warn!(order_id, "Provider order completed without a capture");
        }
        Ok(CaptureResult::transitioned(
            self.load(order_id).await?,
            CaptureOutcome::Pending,
        ))
    }

    /// Moves to a terminal state other than COMPLETED.
    async fn finish(
        &self,
        order_id: &str,
        current: IntentStatus,
        to: IntentStatus,
        outcome: CaptureOutcome,
        source: &CaptureSource,
    ) -> Result<CaptureResult, AppError> {
        if !self
            .intents
            .advance(order_id, current, to, AdvanceFields::default())
            .await?
        {
            return self.after_lost_race(order_id, source).await;
        }

        tracing::info!(order_id, from = %current, to = %to, %source, "Intent closed");
        Ok(CaptureResult::transitioned(self.load(order_id).await?, outcome))
    }

    async fn after_lost_race(
        &self,
        order_id: &str,
        source: &CaptureSource,
    ) -> Result<CaptureResult, AppError> {
        let intent = self.load(order_id).await?;
        self.settle_terminal_or_pending(intent, source).await
    }

    /// Reports what the race winner did. Never writes to the ledger.
    async fn settle_terminal_or_pending(
        &self,
        intent: PaymentIntent,
        source: &CaptureSource,
    ) -> Result<CaptureResult, AppError> {
        if intent.status.is_terminal() {
            return self.settle_terminal(intent, source, false).await;
        }
        Ok(CaptureResult::transitioned(intent, CaptureOutcome::Pending))
    }

    /// A COMPLETED intent whose credit never landed (crash between the
    /// transition and the ledger write) is credited here when `repair` is
    /// set. The ledger's uniqueness gate decides which caller actually
    /// credits.
    async fn settle_terminal(
        &self,
        intent: PaymentIntent,
        source: &CaptureSource,
        repair: bool,
    ) -> Result<CaptureResult, AppError> {
        if intent.status != IntentStatus::Completed || !repair {
            return Ok(CaptureResult::already_done(intent));
        }

        if self
            .ledger
            .topup_for(intent.provider, &intent.order_id)
            .await?
            .is_some()
        {
            return Ok(CaptureResult::already_done(intent));
        }

        tracing::warn!(
            order_id = %intent.order_id,
            %source,
            "Completed intent has no top-up entry; crediting"
        );
        let credit = self
            .ledger
            .credit(
                intent.user_id,
                &intent.amount,
                &intent.currency,
                intent.provider,
                &intent.order_id,
                source.event_id(),
            )
            .await?;
        Ok(CaptureResult::completed(intent, credit.created))
    }

    async fn load(&self, order_id: &str) -> Result<PaymentIntent, AppError> {
        self.intents
            .get(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment intent not found: {}", order_id)))
    }
}

/// Repair credits are left to out-of-band callers, or to anyone once the
/// completing caller has had time to write its own entry.
fn may_repair(intent: &PaymentIntent, source: &CaptureSource) -> bool {
    source.is_out_of_band()
        || Utc::now() - intent.updated_at >= Duration::seconds(REPAIR_GRACE_SECONDS)
}

fn log_provider_failure(order_id: &str, source: &CaptureSource, error: &ProviderError) {
    tracing::warn!(
        order_id,
        %source,
        code = error.code(),
        error = %error,
        "Provider call failed; intent left for retry"
    );
}
