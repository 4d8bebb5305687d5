//! Cross-module flows against a single store, the way the engine drives it.

use fanout_core::{DeliveryAttempt, DeliveryStatus, ReceiverType};
use fanout_metastore::{Metastore, ScheduleStatus, ScheduledEmit, WebhookSubscription};
use serde_json::json;
use time::OffsetDateTime;

#[tokio::test]
async fn token_bootstrap_creates_the_project() {
    let store = Metastore::open_in_memory().unwrap();
    store.insert_token("tok_acme", "acme", "web").await.unwrap();

    let record = store.resolve_token("tok_acme").await.unwrap().unwrap();
    assert_eq!(record.org_id, "acme");

    let projects = store.list_projects("acme").await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].project_id, "web");
}

#[tokio::test]
async fn webhook_lifecycle_drives_the_worker_boot_scan() {
    let store = Metastore::open_in_memory().unwrap();
    assert!(store.orgs_with_active_webhooks().await.unwrap().is_empty());

    let sub = WebhookSubscription::new(
        "acme",
        "web",
        "https://example.com/hook",
        vec!["orders.>".into()],
        "s3cret",
    );
    store.insert_webhook(&sub).await.unwrap();
    assert_eq!(
        store.orgs_with_active_webhooks().await.unwrap(),
        vec!["acme".to_string()]
    );

    store
        .set_webhook_active("acme", &sub.id, false)
        .await
        .unwrap();
    assert!(store.orgs_with_active_webhooks().await.unwrap().is_empty());
}

#[tokio::test]
async fn a_full_delivery_chain_leaves_one_terminal_row() {
    let store = Metastore::open_in_memory().unwrap();

    // Two failed webhook attempts, then the third lands.
    for attempt in 1..=2u32 {
        let row =
            DeliveryAttempt::delivered("evt_1", "acme", ReceiverType::Webhook, "whs_1", attempt);
        store.record_attempt(&row).await.unwrap();
        store
            .update_attempt_status(
                "evt_1",
                ReceiverType::Webhook,
                "whs_1",
                attempt,
                DeliveryStatus::Retrying,
                Some("http 500".into()),
            )
            .await
            .unwrap();
    }
    let row = DeliveryAttempt::delivered("evt_1", "acme", ReceiverType::Webhook, "whs_1", 3);
    store.record_attempt(&row).await.unwrap();
    store
        .update_attempt_status(
            "evt_1",
            ReceiverType::Webhook,
            "whs_1",
            3,
            DeliveryStatus::Acked,
            None,
        )
        .await
        .unwrap();

    let attempts = store.list_attempts("evt_1").await.unwrap();
    assert_eq!(attempts.len(), 3);
    let terminal: Vec<_> = attempts
        .iter()
        .filter(|row| row.status.is_terminal())
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].attempt, 3);
    assert!(terminal[0].acked_at.is_some());
}

#[tokio::test]
async fn schedule_fire_and_cancel_race_resolves_one_way() {
    let store = Metastore::open_in_memory().unwrap();
    let row = ScheduledEmit::new(
        "acme",
        "web",
        "promo.now",
        json!({"pct": 20}),
        OffsetDateTime::now_utc(),
    );
    store.insert_schedule(&row).await.unwrap();

    let due = store
        .due_schedules(OffsetDateTime::now_utc().unix_timestamp(), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);

    // The fire path wins the row.
    assert!(
        store
            .mark_schedule_completed(&row.id, "evt_9")
            .await
            .unwrap()
    );
    // The late cancel sees the conflict.
    let err = store.cancel_schedule("acme", &row.id).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let fetched = store.get_schedule("acme", &row.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, ScheduleStatus::Completed);
    assert_eq!(fetched.event_id.as_deref(), Some("evt_9"));
    assert!(
        store
            .due_schedules(OffsetDateTime::now_utc().unix_timestamp(), 10)
            .await
            .unwrap()
            .is_empty()
    );
}
