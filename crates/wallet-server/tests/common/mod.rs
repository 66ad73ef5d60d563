//! Shared fixtures: a scripted provider and an engine on in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use wallet_server::engine::{sign_webhook_body, EngineConfig};
use wallet_server::models::{NewPaymentIntent, PaymentIntent, ProviderKind};
use wallet_server::provider::{
    CaptureDetails, CaptureStatus, CreatedOrder, ProviderClient, ProviderError, ProviderOrder,
    ProviderOrderStatus, ProviderRegistry,
};
use wallet_server::store::{InMemoryIntentStore, InMemoryLedgerStore, IntentStore};
use wallet_server::{create_router, AppState, PaymentEngine};

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const ADMIN_TOKEN: &str = "admin-test-token";

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

#[derive(Debug, Clone)]
struct FakeOrder {
    status: ProviderOrderStatus,
    amount: BigDecimal,
    currency: String,
    capture: Option<CaptureDetails>,
    /// Status the next capture will report.
    capture_status: CaptureStatus,
    /// Overrides the captured amount.
    captured_amount: Option<BigDecimal>,
}

/// Provider double whose orders are driven by the test.
#[derive(Default)]
pub struct FakeProvider {
    orders: Mutex<HashMap<String, FakeOrder>>,
    next_id: AtomicU64,
    capture_calls: AtomicUsize,
    get_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an order as if the provider had created it.
    pub fn insert(&self, order_id: &str, amount: &BigDecimal, currency: &str) {
        self.orders.lock().unwrap().insert(
            order_id.to_string(),
            FakeOrder {
                status: ProviderOrderStatus::Created,
                amount: amount.clone(),
                currency: currency.to_string(),
                capture: None,
                capture_status: CaptureStatus::Completed,
                captured_amount: None,
            },
        );
    }

    fn update(&self, order_id: &str, f: impl FnOnce(&mut FakeOrder)) {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(order_id).expect("unknown fake order");
        f(order);
    }

    /// Buyer approved checkout.
    pub fn approve(&self, order_id: &str) {
        self.update(order_id, |o| o.status = ProviderOrderStatus::Approved);
    }

    pub fn void(&self, order_id: &str) {
        self.update(order_id, |o| o.status = ProviderOrderStatus::Voided);
    }

    pub fn forget(&self, order_id: &str) {
        self.orders.lock().unwrap().remove(order_id);
    }

    pub fn set_capture_status(&self, order_id: &str, status: CaptureStatus) {
        self.update(order_id, |o| o.capture_status = status);
    }

    pub fn set_captured_amount(&self, order_id: &str, amount: &BigDecimal) {
        self.update(order_id, |o| o.captured_amount = Some(amount.clone()));
    }

    /// Every call fails with a transport error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Http("connection reset".to_string()));
        }
        Ok(())
    }

    fn snapshot(&self, order_id: &str) -> ProviderOrder {
        match self.orders.lock().unwrap().get(order_id) {
            Some(order) => ProviderOrder {
                order_id: order_id.to_string(),
                status: order.status,
                capture: order.capture.clone(),
            },
            None => ProviderOrder::not_found(order_id),
        }
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    async fn create_order(
        &self,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<CreatedOrder, ProviderError> {
        self.check_available()?;
        let order_id = format!("PAY-FAKE-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.insert(&order_id, amount, currency);
        Ok(CreatedOrder {
            approve_url: format!("https://provider.test/checkout?token={}", order_id),
            order_id,
        })
    }

    async fn get_order(&self, order_id: &str) -> Result<ProviderOrder, ProviderError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers interleave.
        tokio::task::yield_now().await;
        self.check_available()?;
        Ok(self.snapshot(order_id))
    }

    async fn capture_order(&self, order_id: &str) -> Result<ProviderOrder, ProviderError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.check_available()?;

        {
            let mut orders = self.orders.lock().unwrap();
            let Some(order) = orders.get_mut(order_id) else {
                return Err(ProviderError::Provider {
                    name: "RESOURCE_NOT_FOUND".to_string(),
                    message: "The specified resource does not exist.".to_string(),
                    issue: Some("INVALID_RESOURCE_ID".to_string()),
                    raw: json!({}),
                });
            };
            if order.capture.is_none() {
                if order.status != ProviderOrderStatus::Approved {
                    return Err(ProviderError::Provider {
                        name: "UNPROCESSABLE_ENTITY".to_string(),
                        message: "Order not approved".to_string(),
                        issue: Some("ORDER_NOT_APPROVED".to_string()),
                        raw: json!({}),
                    });
                }
                order.capture = Some(CaptureDetails {
                    capture_id: format!("CAP-{}", order_id),
                    status: order.capture_status,
                    amount: order.captured_amount.clone().unwrap_or_else(|| order.amount.clone()),
                    currency: order.currency.clone(),
                });
                if order.capture_status.is_settled() {
                    order.status = ProviderOrderStatus::Completed;
                }
            }
        }

        Ok(self.snapshot(order_id))
    }
}

pub struct Harness {
    pub engine: Arc<PaymentEngine>,
    pub provider: Arc<FakeProvider>,
    pub intents: InMemoryIntentStore,
    pub ledger: InMemoryLedgerStore,
    state: AppState,
}

pub fn harness() -> Harness {
    let provider = Arc::new(FakeProvider::new());
    let intents = InMemoryIntentStore::new();
    let ledger = InMemoryLedgerStore::new();

    let registry = ProviderRegistry::new().register(provider.clone());
    let engine = PaymentEngine::new(
        Arc::new(intents.clone()),
        Arc::new(ledger.clone()),
        registry,
        EngineConfig {
            expiry_minutes: 60,
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            supported_currencies: vec!["EUR".to_string(), "USD".to_string()],
        },
    );
    let state = AppState::new(engine).with_admin_token(Some(ADMIN_TOKEN.to_string()));

    Harness {
        engine: state.engine.clone(),
        provider,
        intents,
        ledger,
        state,
    }
}

impl Harness {
    pub fn app(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Creates an intent `age_minutes` old and the matching provider order.
    pub async fn seed_intent(
        &self,
        order_id: &str,
        user_id: Uuid,
        amount: &str,
        currency: &str,
        age_minutes: i64,
    ) -> PaymentIntent {
        let amount = dec(amount);
        self.provider.insert(order_id, &amount, currency);

        let mut new_intent = NewPaymentIntent::new(
            order_id.to_string(),
            user_id,
            ProviderKind::Paypal,
            currency.to_string(),
            amount,
        );
        new_intent.created_at = Utc::now() - Duration::minutes(age_minutes);
        self.intents.create(new_intent).await.unwrap()
    }

    pub async fn balance(&self, user_id: Uuid) -> BigDecimal {
        self.engine
            .ledger()
            .wallet(user_id)
            .await
            .unwrap()
            .map(|w| w.balance)
            .unwrap_or_else(|| BigDecimal::from(0))
    }

    pub async fn assert_consistent(&self, user_id: Uuid) {
        let check = self.engine.ledger().verify_consistency(user_id).await.unwrap();
        assert!(
            check.is_consistent(),
            "balance {} != ledger sum {}",
            check.balance,
            check.ledger_sum
        );
    }
}

pub fn webhook_payload(event_id: &str, event_type: &str, order_id: &str) -> Value {
    if event_type.starts_with("PAYMENT.CAPTURE.") {
        json!({
            "id": event_id,
            "event_type": event_type,
            "resource": {
                "id": format!("CAP-{}", order_id),
                "supplementary_data": { "related_ids": { "order_id": order_id } }
            }
        })
    } else {
        json!({
            "id": event_id,
            "event_type": event_type,
            "resource": { "id": order_id }
        })
    }
}

/// Serialized body and its signature header value.
pub fn signed_webhook(event_id: &str, event_type: &str, order_id: &str) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&webhook_payload(event_id, event_type, order_id)).unwrap();
    let signature = sign_webhook_body(WEBHOOK_SECRET, &body).unwrap();
    (body, signature)
}

/// Helper to parse JSON response body.
pub async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&body).expect("Failed to parse JSON response")
}
