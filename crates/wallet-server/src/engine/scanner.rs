//! Periodic sweep over stale pending intents.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::capture::{CaptureProcessor, CaptureResult, CaptureSource};
use crate::error::AppError;
use crate::models::{IntentStatus, PaymentIntent, ProviderKind};
use crate::store::IntentStore;

/// Upper bound on intents handled by a single scan.
pub const MAX_SCAN_LIMIT: i64 = 500;

/// A stale intent as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingIntent {
    pub order_id: String,
    pub user_id: Uuid,
    pub provider: ProviderKind,
    pub status: IntentStatus,
    pub amount: BigDecimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub age_minutes: i64,
}

impl PendingIntent {
    fn from_intent(intent: &PaymentIntent, now: DateTime<Utc>) -> Self {
        Self {
            order_id: intent.order_id.clone(),
            user_id: intent.user_id,
            provider: intent.provider,
            status: intent.status,
            amount: intent.amount.clone(),
            currency: intent.currency.clone(),
            created_at: intent.created_at,
            age_minutes: intent.age_minutes(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEntry {
    pub order_id: String,
    pub age_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CaptureResult>,
    /// Error code when the capture failed; the intent stays pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub count: usize,
    pub results: Vec<ScanEntry>,
}

impl ScanReport {
    pub fn credited(&self) -> usize {
        self.results
            .iter()
            .filter(|e| e.result.as_ref().is_some_and(|r| r.credited))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|e| e.error.is_some()).count()
    }
}

/// Settings for the background tick.
#[derive(Debug, Clone)]
pub struct ScanSchedule {
    pub every: Duration,
    pub older_than_minutes: i64,
    pub limit: i64,
}

pub struct ReconciliationScanner {
    intents: Arc<dyn IntentStore>,
    processor: Arc<CaptureProcessor>,
}

fn validate_window(older_than_minutes: i64, limit: i64) -> Result<(), AppError> {
    if older_than_minutes < 0 {
        return Err(AppError::BadRequest(
            "minutes must not be negative".to_string(),
        ));
    }
    if !(1..=MAX_SCAN_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_SCAN_LIMIT
        )));
    }
    Ok(())
}

impl ReconciliationScanner {
    pub fn new(intents: Arc<dyn IntentStore>, processor: Arc<CaptureProcessor>) -> Self {
        Self { intents, processor }
    }

    async fn stale(
        &self,
        provider: ProviderKind,
        older_than_minutes: i64,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, AppError> {
        validate_window(older_than_minutes, limit)?;
        let cutoff = Utc::now() - ChronoDuration::minutes(older_than_minutes);
        self.intents.list_stale(provider, cutoff, limit).await
    }

    /// CREATED/APPROVED intents older than `older_than_minutes`, oldest first.
    pub async fn pending(
        &self,
        provider: ProviderKind,
        older_than_minutes: i64,
        limit: i64,
    ) -> Result<Vec<PendingIntent>, AppError> {
        let now = Utc::now();
        Ok(self
            .stale(provider, older_than_minutes, limit)
            .await?
            .iter()
            .map(|intent| PendingIntent::from_intent(intent, now))
            .collect())
    }

    /// Re-drives capture for every stale intent. A failure on one intent is
    /// recorded in its entry and the sweep continues.
    pub async fn scan(
        &self,
        provider: ProviderKind,
        older_than_minutes: i64,
        limit: i64,
    ) -> Result<ScanReport, AppError> {
        let stale = self.stale(provider, older_than_minutes, limit).await?;
        let now = Utc::now();

        let mut results = Vec::with_capacity(stale.len());
        for intent in &stale {
            let entry = match self
                .processor
                .capture(&intent.order_id, CaptureSource::Scanner)
                .await
            {
                Ok(result) => ScanEntry {
                    order_id: intent.order_id.clone(),
                    age_minutes: intent.age_minutes(now),
                    result: Some(result),
                    error: None,
                },
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(order_id = %intent.order_id, error = %e, "Reconciliation capture failed; will retry");
                    } else {
                        tracing::error!(order_id = %intent.order_id, error = %e, "Reconciliation capture needs manual review");
                    }
                    ScanEntry {
                        order_id: intent.order_id.clone(),
                        age_minutes: intent.age_minutes(now),
                        result: None,
                        error: Some(e.code().to_string()),
                    }
                }
            };
            results.push(entry);
        }

        let report = ScanReport {
            count: results.len(),
            results,
        };
        tracing::info!(
            %provider,
            scanned = report.count,
            credited = report.credited(),
            failed = report.failed(),
            "Reconciliation scan finished"
        );
        Ok(report)
    }

    /// Runs `scan` for each provider on every tick until `shutdown` flips to
    /// true or its sender is dropped.
    pub fn spawn(
        self: Arc<Self>,
        providers: Vec<ProviderKind>,
        schedule: ScanSchedule,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(schedule.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;

            tracing::info!(
                every_secs = schedule.every.as_secs(),
                older_than_minutes = schedule.older_than_minutes,
                limit = schedule.limit,
                "Reconciliation scanner started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for provider in &providers {
                            if let Err(e) = self
                                .scan(*provider, schedule.older_than_minutes, schedule.limit)
                                .await
                            {
                                tracing::error!(%provider, error = %e, "Reconciliation scan failed");
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Reconciliation scanner stopped");
        })
    }
}
