//! Engine-level tests for exactly-once crediting across confirmation channels.

mod common;

use common::{dec, harness, webhook_payload};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use wallet_server::engine::{
    CaptureOutcome, CaptureSource, RedirectStatus, ScanSchedule, WebhookAck, WebhookEvent,
};
use wallet_server::models::{AdvanceFields, IntentStatus, ProviderKind, TransactionType};
use wallet_server::provider::CaptureStatus;
use wallet_server::store::{IntentStore, LedgerStore};
use wallet_server::AppError;

fn event(event_id: &str, event_type: &str, order_id: &str) -> WebhookEvent {
    serde_json::from_value(webhook_payload(event_id, event_type, order_id)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_captures_credit_once() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");

    let handles: Vec<_> = (0..24)
        .map(|i| {
            let engine = h.engine.clone();
            let source = match i % 4 {
                0 => CaptureSource::Redirect,
                1 => CaptureSource::Admin,
                2 => CaptureSource::Scanner,
                _ => CaptureSource::Webhook {
                    event_id: format!("WH-{}", i),
                },
            };
            tokio::spawn(async move { engine.processor().capture("PAY-1", source).await })
        })
        .collect();

    let mut credited = 0;
    let mut already_done = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.intent.status, IntentStatus::Completed);
        if result.credited {
            credited += 1;
        }
        if result.already_done {
            already_done += 1;
        }
    }

    assert_eq!(credited, 1);
    assert_eq!(already_done, 23);
    assert_eq!(h.balance(user).await, dec("10.00"));
    h.assert_consistent(user).await;

    let entries = h.ledger.recent_transactions(user, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, TransactionType::Topup);
    assert_eq!(entries[0].provider_order_id.as_deref(), Some("PAY-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scenario_a_redirect_and_webhook_same_tick() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");

    let ingestor = h.engine.ingestor().clone();
    let redirect = {
        let ingestor = ingestor.clone();
        tokio::spawn(async move { ingestor.on_redirect("PAY-1", RedirectStatus::Success).await })
    };
    let webhook = {
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            ingestor
                .on_webhook(
                    ProviderKind::Paypal,
                    event("WH-1", "CHECKOUT.ORDER.APPROVED", "PAY-1"),
                )
                .await
        })
    };

    let redirect = redirect.await.unwrap().unwrap();
    let webhook = webhook.await.unwrap().unwrap();

    let webhook_credited = match webhook {
        WebhookAck::Processed { capture, .. } => capture.credited,
        other => panic!("unexpected ack: {:?}", other),
    };
    assert!(redirect.credited ^ webhook_credited);

    let intent = h.intents.get("PAY-1").await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Completed);
    assert_eq!(intent.capture_id.as_deref(), Some("CAP-PAY-1"));
    assert_eq!(intent.last_event_id.as_deref(), Some("WH-1"));
    assert_eq!(h.balance(user).await, dec("10.00"));
    h.assert_consistent(user).await;
}

#[tokio::test]
async fn test_scenario_b_voided_order_expires() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-OLD", user, "25.00", "EUR", 120).await;
    h.provider.void("PAY-OLD");

    let report = h
        .engine
        .scanner()
        .scan(ProviderKind::Paypal, 10, 50)
        .await
        .unwrap();

    assert_eq!(report.count, 1);
    let entry = &report.results[0];
    assert_eq!(entry.order_id, "PAY-OLD");
    let result = entry.result.as_ref().unwrap();
    assert_eq!(result.outcome, CaptureOutcome::Expired);
    assert!(!result.credited);

    let intent = h.intents.get("PAY-OLD").await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Expired);
    assert_eq!(h.balance(user).await, dec("0"));
    assert_eq!(h.provider.capture_calls(), 0);
}

#[tokio::test]
async fn test_scenario_c_unknown_order_not_found() {
    let h = harness();

    let err = h
        .engine
        .processor()
        .capture("PAY-MISSING", CaptureSource::Admin)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(h.provider.get_calls(), 0);
    assert!(h.intents.get("PAY-MISSING").await.unwrap().is_none());
}

#[tokio::test]
async fn test_webhook_replay_is_noop() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    let ingestor = h.engine.ingestor();

    let first = ingestor
        .on_webhook(
            ProviderKind::Paypal,
            event("WH-1", "CHECKOUT.ORDER.APPROVED", "PAY-1"),
        )
        .await
        .unwrap();
    assert!(matches!(first, WebhookAck::Processed { ref capture, .. } if capture.credited));
    let calls_after_first = h.provider.get_calls();

    let replay = ingestor
        .on_webhook(
            ProviderKind::Paypal,
            event("WH-1", "CHECKOUT.ORDER.APPROVED", "PAY-1"),
        )
        .await
        .unwrap();
    assert_eq!(
        replay,
        WebhookAck::Duplicate {
            order_id: "PAY-1".to_string()
        }
    );
    assert_eq!(h.provider.get_calls(), calls_after_first);
    assert_eq!(h.balance(user).await, dec("10.00"));
}

#[tokio::test]
async fn test_distinct_webhook_after_completion_is_already_done() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    let ingestor = h.engine.ingestor();

    ingestor
        .on_webhook(
            ProviderKind::Paypal,
            event("WH-1", "CHECKOUT.ORDER.APPROVED", "PAY-1"),
        )
        .await
        .unwrap();
    let second = ingestor
        .on_webhook(
            ProviderKind::Paypal,
            event("WH-2", "PAYMENT.CAPTURE.COMPLETED", "PAY-1"),
        )
        .await
        .unwrap();

    match second {
        WebhookAck::Processed { capture, .. } => {
            assert!(capture.already_done);
            assert!(!capture.credited);
        }
        other => panic!("unexpected ack: {:?}", other),
    }
    assert_eq!(h.balance(user).await, dec("10.00"));
}

#[tokio::test]
async fn test_webhook_for_unknown_order_is_ignored() {
    let h = harness();
    let ack = h
        .engine
        .ingestor()
        .on_webhook(
            ProviderKind::Paypal,
            event("WH-9", "PAYMENT.CAPTURE.COMPLETED", "PAY-NOPE"),
        )
        .await
        .unwrap();
    assert!(matches!(ack, WebhookAck::Ignored { .. }));
}

#[tokio::test]
async fn test_webhook_capture_failure_is_deferred() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 1).await;
    h.provider.approve("PAY-1");
    h.provider.set_unavailable(true);

    let ack = h
        .engine
        .ingestor()
        .on_webhook(
            ProviderKind::Paypal,
            event("WH-1", "CHECKOUT.ORDER.APPROVED", "PAY-1"),
        )
        .await
        .unwrap();
    assert_eq!(
        ack,
        WebhookAck::Deferred {
            order_id: "PAY-1".to_string(),
            error: "PROVIDER_HTTP_ERROR".to_string(),
            retryable: true,
        }
    );

    let intent = h.intents.get("PAY-1").await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Created);

    // The scanner picks it up once the provider is back.
    h.provider.set_unavailable(false);
    let report = h
        .engine
        .scanner()
        .scan(ProviderKind::Paypal, 0, 50)
        .await
        .unwrap();
    assert_eq!(report.credited(), 1);
    assert_eq!(h.balance(user).await, dec("10.00"));
}

#[tokio::test]
async fn test_provider_error_leaves_intent_retryable() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    h.provider.set_unavailable(true);

    let err = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Redirect)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        h.intents.get("PAY-1").await.unwrap().unwrap().status,
        IntentStatus::Created
    );

    h.provider.set_unavailable(false);
    let result = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Redirect)
        .await
        .unwrap();
    assert!(result.credited);
}

#[tokio::test]
async fn test_unapproved_young_intent_stays_pending() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 5).await;

    let result = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Redirect)
        .await
        .unwrap();

    assert_eq!(result.outcome, CaptureOutcome::Pending);
    assert!(!result.already_done);
    assert_eq!(result.intent.status, IntentStatus::Created);
    assert_eq!(h.provider.capture_calls(), 0);
}

#[tokio::test]
async fn test_declined_capture_fails_intent() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    h.provider.set_capture_status("PAY-1", CaptureStatus::Declined);

    let result = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Redirect)
        .await
        .unwrap();

    assert_eq!(result.outcome, CaptureOutcome::Failed);
    assert_eq!(result.intent.status, IntentStatus::Failed);
    assert_eq!(h.balance(user).await, dec("0"));
}

#[tokio::test]
async fn test_pending_capture_keeps_intent_approved() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    h.provider.set_capture_status("PAY-1", CaptureStatus::Pending);

    let result = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Redirect)
        .await
        .unwrap();

    assert_eq!(result.outcome, CaptureOutcome::Pending);
    assert_eq!(result.intent.status, IntentStatus::Approved);
    assert_eq!(h.balance(user).await, dec("0"));
}

#[tokio::test]
async fn test_amount_mismatch_needs_review() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    h.provider.set_captured_amount("PAY-1", &dec("9.00"));

    let err = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Admin)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "PROVIDER_ERROR");
    let intent = h.intents.get("PAY-1").await.unwrap().unwrap();
    assert!(!intent.status.is_terminal());
    assert_eq!(h.balance(user).await, dec("0"));
}

#[tokio::test]
async fn test_completed_intent_without_credit_is_repaired() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;

    // Simulates a crash between the transition and the ledger write.
    assert!(h
        .intents
        .advance(
            "PAY-1",
            IntentStatus::Created,
            IntentStatus::Completed,
            AdvanceFields::with_capture("CAP-PAY-1"),
        )
        .await
        .unwrap());
    assert_eq!(h.balance(user).await, dec("0"));

    let repaired = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Scanner)
        .await
        .unwrap();
    assert!(repaired.credited);
    assert_eq!(h.balance(user).await, dec("10.00"));

    let again = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Scanner)
        .await
        .unwrap();
    assert!(again.already_done);
    assert!(!again.credited);
    assert_eq!(h.balance(user).await, dec("10.00"));
    h.assert_consistent(user).await;
}

#[tokio::test]
async fn test_scan_never_touches_terminal_intents() {
    let h = harness();
    let user = Uuid::new_v4();

    h.seed_intent("PAY-DONE", user, "10.00", "EUR", 120).await;
    h.provider.approve("PAY-DONE");
    h.engine
        .processor()
        .capture("PAY-DONE", CaptureSource::Redirect)
        .await
        .unwrap();

    h.seed_intent("PAY-FAILED", user, "5.00", "EUR", 120).await;
    h.provider.approve("PAY-FAILED");
    h.provider.set_capture_status("PAY-FAILED", CaptureStatus::Declined);
    h.engine
        .processor()
        .capture("PAY-FAILED", CaptureSource::Redirect)
        .await
        .unwrap();

    h.seed_intent("PAY-GONE", user, "7.00", "EUR", 120).await;
    h.provider.forget("PAY-GONE");
    h.engine
        .processor()
        .capture("PAY-GONE", CaptureSource::Redirect)
        .await
        .unwrap();

    let before: Vec<_> = ["PAY-DONE", "PAY-FAILED", "PAY-GONE"]
        .iter()
        .map(|id| id.to_string())
        .collect();
    let mut snapshots = Vec::new();
    for id in &before {
        snapshots.push(h.intents.get(id).await.unwrap().unwrap());
    }
    assert_eq!(snapshots[0].status, IntentStatus::Completed);
    assert_eq!(snapshots[1].status, IntentStatus::Failed);
    assert_eq!(snapshots[2].status, IntentStatus::Expired);

    let calls = h.provider.get_calls();
    let report = h
        .engine
        .scanner()
        .scan(ProviderKind::Paypal, 0, 50)
        .await
        .unwrap();
    assert_eq!(report.count, 0);
    assert_eq!(h.provider.get_calls(), calls);

    for (id, snapshot) in before.iter().zip(&snapshots) {
        assert_eq!(&h.intents.get(id).await.unwrap().unwrap(), snapshot);
    }
    assert_eq!(h.balance(user).await, dec("10.00"));
}

#[tokio::test]
async fn test_scan_respects_age_and_limit() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-NEW", user, "10.00", "EUR", 1).await;
    for i in 0..3 {
        let order_id = format!("PAY-OLD-{}", i);
        h.seed_intent(&order_id, user, "10.00", "EUR", 30 + i).await;
        h.provider.approve(&order_id);
    }

    let pending = h
        .engine
        .scanner()
        .pending(ProviderKind::Paypal, 10, 2)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].order_id, "PAY-OLD-2");
    assert!(pending[0].age_minutes >= 32);

    let report = h
        .engine
        .scanner()
        .scan(ProviderKind::Paypal, 10, 2)
        .await
        .unwrap();
    assert_eq!(report.count, 2);
    assert_eq!(report.credited(), 2);
    assert_eq!(h.balance(user).await, dec("20.00"));

    assert_eq!(
        h.intents.get("PAY-NEW").await.unwrap().unwrap().status,
        IntentStatus::Created
    );
}

#[tokio::test]
async fn test_scan_collects_per_intent_errors() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 30).await;
    h.provider.set_unavailable(true);

    let report = h
        .engine
        .scanner()
        .scan(ProviderKind::Paypal, 10, 50)
        .await
        .unwrap();
    assert_eq!(report.count, 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(
        report.results[0].error.as_deref(),
        Some("PROVIDER_HTTP_ERROR")
    );
}

#[tokio::test]
async fn test_create_intent_and_full_checkout() {
    let h = harness();
    let user = Uuid::new_v4();

    let created = h
        .engine
        .create_intent("paypal", user, &dec("12.5"), "eur")
        .await
        .unwrap();
    assert!(created.approve_url.contains(&created.order_id));
    assert_eq!(created.intent.status, IntentStatus::Created);
    assert_eq!(created.intent.currency, "EUR");
    assert_eq!(created.intent.amount, dec("12.50"));

    h.provider.approve(&created.order_id);
    let result = h
        .engine
        .ingestor()
        .on_redirect(&created.order_id, RedirectStatus::Success)
        .await
        .unwrap();
    assert!(result.credited);
    assert_eq!(h.balance(user).await, dec("12.50"));
}

#[tokio::test]
async fn test_create_intent_validation() {
    let h = harness();
    let user = Uuid::new_v4();
    let engine = &h.engine;

    for (amount, currency) in [("0.50", "EUR"), ("10.001", "EUR"), ("10", "JPY")] {
        let err = engine
            .create_intent("paypal", user, &dec(amount), currency)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR", "{} {}", amount, currency);
    }

    let err = engine
        .create_intent("stripe", user, &dec("10"), "EUR")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_create_intent_rejects_foreign_currency_for_wallet() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    h.engine
        .processor()
        .capture("PAY-1", CaptureSource::Redirect)
        .await
        .unwrap();

    let err = h
        .engine
        .create_intent("paypal", user, &dec("10"), "USD")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_refund_and_debit_keep_ledger_consistent() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "20.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    h.engine
        .processor()
        .capture("PAY-1", CaptureSource::Redirect)
        .await
        .unwrap();

    let ledger = h.engine.ledger();
    ledger.debit(user, &dec("15.00"), "EUR", "order:ORD-1").await.unwrap();
    let refund = ledger.refund(user, &dec("15.00"), "EUR", "ORD-1").await.unwrap();
    let replay = ledger.refund(user, &dec("15.00"), "EUR", "ORD-1").await.unwrap();
    assert!(refund.created);
    assert!(!replay.created);

    let err = ledger
        .debit(user, &dec("20.01"), "EUR", "order:ORD-2")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_FUNDS");

    assert_eq!(h.balance(user).await, dec("20.00"));
    h.assert_consistent(user).await;
}

#[tokio::test]
async fn test_create_intent_rejects_second_open_currency() {
    let h = harness();
    let user = Uuid::new_v4();

    h.engine
        .create_intent("paypal", user, &dec("10"), "EUR")
        .await
        .unwrap();
    let err = h
        .engine
        .create_intent("paypal", user, &dec("10"), "USD")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    // Another user is unaffected.
    assert!(h
        .engine
        .create_intent("paypal", Uuid::new_v4(), &dec("10"), "USD")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_foreign_currency_capture_stays_open_for_review() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-EUR", user, "10.00", "EUR", 0).await;
    h.seed_intent("PAY-USD", user, "10.00", "USD", 0).await;
    h.provider.approve("PAY-EUR");
    h.provider.approve("PAY-USD");

    let first = h
        .engine
        .processor()
        .capture("PAY-EUR", CaptureSource::Redirect)
        .await
        .unwrap();
    assert!(first.credited);

    let ack = h
        .engine
        .ingestor()
        .on_webhook(
            ProviderKind::Paypal,
            event("WH-1", "PAYMENT.CAPTURE.COMPLETED", "PAY-USD"),
        )
        .await
        .unwrap();
    assert_eq!(
        ack,
        WebhookAck::Deferred {
            order_id: "PAY-USD".to_string(),
            error: "VALIDATION_ERROR".to_string(),
            retryable: false,
        }
    );

    // The intent never reached COMPLETED, so it is still visible to operators.
    let intent = h.intents.get("PAY-USD").await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Approved);
    let pending = h
        .engine
        .scanner()
        .pending(ProviderKind::Paypal, 0, 50)
        .await
        .unwrap();
    assert!(pending.iter().any(|p| p.order_id == "PAY-USD"));

    assert!(h.ledger.find_by_key("topup:paypal:PAY-USD").await.unwrap().is_none());
    assert_eq!(h.balance(user).await, dec("10.00"));
    h.assert_consistent(user).await;
}

#[tokio::test]
async fn test_fresh_completion_is_not_repaired_by_live_triggers() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");

    // Another worker has just won the transition and is about to credit.
    assert!(h
        .intents
        .advance(
            "PAY-1",
            IntentStatus::Created,
            IntentStatus::Completed,
            AdvanceFields::with_capture("CAP-PAY-1"),
        )
        .await
        .unwrap());

    for source in [
        CaptureSource::Redirect,
        CaptureSource::Webhook {
            event_id: "WH-9".to_string(),
        },
    ] {
        let result = h.engine.processor().capture("PAY-1", source).await.unwrap();
        assert!(result.already_done);
        assert!(!result.credited);
    }
    assert_eq!(h.balance(user).await, dec("0"));
    assert!(h.engine.ledger().topup_for(ProviderKind::Paypal, "PAY-1").await.unwrap().is_none());

    // An operator-driven capture still repairs the missing credit.
    let repaired = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Admin)
        .await
        .unwrap();
    assert!(repaired.credited);
    assert_eq!(h.balance(user).await, dec("10.00"));
    h.assert_consistent(user).await;
}

#[tokio::test]
async fn test_refunded_capture_is_not_credited() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 0).await;
    h.provider.approve("PAY-1");
    h.provider.set_capture_status("PAY-1", CaptureStatus::Refunded);

    let result = h
        .engine
        .processor()
        .capture("PAY-1", CaptureSource::Redirect)
        .await
        .unwrap();
    assert_eq!(result.outcome, CaptureOutcome::Failed);
    assert!(!result.credited);

    let intent = h.intents.get("PAY-1").await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(h.balance(user).await, dec("0"));
    assert!(h.ledger.recent_transactions(user, 10).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_spawned_scanner_credits_and_stops_on_shutdown() {
    let h = harness();
    let user = Uuid::new_v4();
    h.seed_intent("PAY-1", user, "10.00", "EUR", 30).await;
    h.provider.approve("PAY-1");

    let (tx, rx) = watch::channel(false);
    let handle = h.engine.scanner().clone().spawn(
        vec![ProviderKind::Paypal],
        ScanSchedule {
            every: Duration::from_secs(60),
            older_than_minutes: 10,
            limit: 10,
        },
        rx,
    );

    // Nothing runs before the first interval elapses.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.balance(user).await, dec("0"));

    for _ in 0..10 {
        if h.balance(user).await == dec("10.00") {
            break;
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    assert_eq!(h.balance(user).await, dec("10.00"));
    let intent = h.intents.get("PAY-1").await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Completed);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scanner task should stop after shutdown")
        .unwrap();
    h.assert_consistent(user).await;
}
