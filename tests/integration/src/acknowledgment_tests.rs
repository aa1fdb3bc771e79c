//! Caregiver acknowledgment against live and stored alerts.

use crate::test_utils::{test_config, wearable, Harness, USER_ID};
use careband_alerts::{watch_alerts, AckOutcome};
use careband_link::ScriptedTransport;
use careband_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

const T0: u64 = 1_700_000_000_000;

fn scripted() -> ScriptedTransport {
    ScriptedTransport::new(vec![wearable()])
}

async fn raise_tachycardia(harness: &mut Harness, start_ms: u64) {
    let tokens: Vec<_> = (0..=5).map(|s| (start_ms + s * 1_000, "BPM:130")).collect();
    harness.feed(&tokens).await;
}

#[tokio::test]
async fn test_ack_racing_persistence_leaves_one_record() {
    for round in 0..20u64 {
        let mut harness = Harness::start(scripted());
        harness.connect().await;

        // Acknowledge as soon as the token is processed, usually before the
        // dispatcher's write lands.
        let at = T0 + round * 100_000;
        harness.feed(&[(at, "FALL")]).await;
        let outcome = harness.acknowledge("fall", at + 10).await;
        assert_eq!(
            outcome,
            AckOutcome::UpdatedExisting {
                timestamp_key: at.to_string()
            }
        );

        let alerts = harness.alert_records(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let alerts_after = harness.alert_records(1).await;
        assert_eq!(alerts.len(), 1, "round {round}");
        assert_eq!(alerts_after.len(), 1, "round {round}");
        assert!(alerts_after[0].response_received, "round {round}");
    }
}

#[tokio::test]
async fn test_ack_without_alert_creates_resolved_record() {
    let harness = Harness::start(scripted());

    let outcome = harness.acknowledge("spo2_low", T0).await;
    assert_eq!(
        outcome,
        AckOutcome::CreatedNew {
            timestamp_key: T0.to_string()
        }
    );

    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts[0].alert_type, "spo2_low");
    assert!(alerts[0].response_received);
}

#[tokio::test]
async fn test_declined_prompt_changes_nothing() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;
    raise_tachycardia(&mut harness, T0).await;
    harness.alert_records(1).await;

    let outcome = harness.respond(None, "hr_high", false, T0 + 6_000).await;
    assert_eq!(outcome, AckOutcome::Declined);

    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts.len(), 1);
    assert!(!alerts[0].response_received);

    // Still open for a later acknowledgment.
    let outcome = harness.acknowledge("hr_high", T0 + 7_000).await;
    assert!(matches!(outcome, AckOutcome::UpdatedExisting { .. }));
}

#[tokio::test]
async fn test_ack_by_id_targets_that_alert() {
    let mut harness = Harness::start(scripted());
    let mut alerts = harness.handle.subscribe_alerts();
    harness.connect().await;

    raise_tachycardia(&mut harness, T0).await;
    raise_tachycardia(&mut harness, T0 + 6_000).await;
    let first = alerts.recv().await.unwrap();
    let second = alerts.recv().await.unwrap();
    assert!(second.key_ms() > first.key_ms());
    harness.alert_records(2).await;

    let outcome = harness
        .respond(Some(first.alert_id.as_str()), "hr_high", true, T0 + 20_000)
        .await;
    assert_eq!(
        outcome,
        AckOutcome::UpdatedExisting {
            timestamp_key: first.timestamp_key.clone()
        }
    );

    let records = harness.alert_records(2).await;
    assert!(records[0].response_received);
    assert!(!records[1].response_received);
}

#[tokio::test]
async fn test_ack_after_restart_finds_stored_alerts_newest_first() {
    let store = Arc::new(MemoryStore::new());

    let mut first = Harness::start_on(test_config(), scripted(), store.clone());
    first.connect().await;
    raise_tachycardia(&mut first, T0).await;
    raise_tachycardia(&mut first, T0 + 6_000).await;
    let stored = first.alert_records(2).await;
    first.handle.shutdown().await.unwrap();

    // Fresh monitor and acknowledgment loop; nothing registered in memory.
    let second = Harness::start_on(test_config(), scripted(), store);
    let newest = second.acknowledge("hr_high", T0 + 30_000).await;
    assert_eq!(
        newest,
        AckOutcome::UpdatedExisting {
            timestamp_key: stored[1].timestamp_key.clone()
        }
    );
    let older = second.acknowledge("hr_high", T0 + 31_000).await;
    assert_eq!(
        older,
        AckOutcome::UpdatedExisting {
            timestamp_key: stored[0].timestamp_key.clone()
        }
    );

    // Nothing left open: the next one is recorded as new.
    let fresh = second.acknowledge("hr_high", T0 + 32_000).await;
    assert!(matches!(fresh, AckOutcome::CreatedNew { .. }));
    assert_eq!(second.alert_records(3).await.len(), 3);
}

#[tokio::test]
async fn test_alert_in_millisecond_of_created_record_is_kept() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    let outcome = harness.acknowledge("spo2_low", T0).await;
    assert_eq!(
        outcome,
        AckOutcome::CreatedNew {
            timestamp_key: T0.to_string()
        }
    );
    harness.feed(&[(T0, "FALL")]).await;

    let alerts = harness.alert_records(2).await;
    assert_eq!(alerts[0].alert_type, "spo2_low");
    assert!(alerts[0].response_received);
    assert_eq!(alerts[1].alert_type, "fall");
    assert_eq!(alerts[1].timestamp_key, (T0 + 1).to_string());
    assert!(!alerts[1].response_received);

    // The fall is resolved where it actually landed.
    let outcome = harness.acknowledge("fall", T0 + 2_000).await;
    assert_eq!(
        outcome,
        AckOutcome::UpdatedExisting {
            timestamp_key: (T0 + 1).to_string()
        }
    );
    let alerts = harness.alert_records(2).await;
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().all(|a| a.response_received));
}

#[tokio::test]
async fn test_live_alert_list_follows_acknowledgment() {
    let mut harness = Harness::start(scripted());
    let mut live = watch_alerts(harness.store.as_ref(), USER_ID).await.unwrap();
    assert!(live.borrow().is_empty());
    harness.connect().await;

    harness.feed(&[(T0, "FALL"), (T0 + 5_000, "FALL")]).await;
    let listed = tokio::time::timeout(Duration::from_secs(5), live.wait_for(|a| a.len() == 2))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(listed[0].timestamp_key, (T0 + 5_000).to_string());
    assert!(listed.iter().all(|a| !a.response_received));

    harness.acknowledge("fall", T0 + 6_000).await;
    let listed = tokio::time::timeout(
        Duration::from_secs(5),
        live.wait_for(|a| a.first().is_some_and(|newest| newest.response_received)),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert!(!listed[1].response_received);
}
