//! Token-to-alert scenarios through the full monitor.

use crate::test_utils::{test_config, wearable, Harness, USER_ID};
use careband_alerts::alert_history;
use careband_core::Channel;
use careband_link::ScriptedTransport;
use careband_monitor::{vitals_in_range, VitalRecord};
use careband_store::{MemoryStore, VITALS_COLLECTION};
use std::sync::Arc;
use std::time::Duration;

const T0: u64 = 1_700_000_000_000;

fn scripted() -> ScriptedTransport {
    ScriptedTransport::new(vec![wearable()])
}

/// `(T0 + offset, token)` for each offset.
fn series(token: &'static str, offsets: impl IntoIterator<Item = u64>) -> Vec<(u64, &'static str)> {
    offsets.into_iter().map(|ms| (T0 + ms, token)).collect()
}

async fn vital_records(harness: &Harness, expected: usize) -> Vec<VitalRecord> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let docs = harness.store.documents(VITALS_COLLECTION).await;
            if docs.len() >= expected {
                return docs
                    .iter()
                    .map(|d| d.decode::<VitalRecord>().unwrap())
                    .collect::<Vec<_>>();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for vital records")
}

#[tokio::test]
async fn test_sustained_tachycardia_fires_once_then_rearms() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness.feed(&series("BPM:130", (0..=5).map(|s| s * 1_000))).await;
    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "hr_high");
    assert_eq!(alerts[0].user_id, USER_ID);
    assert_eq!(alerts[0].timestamp_key, (T0 + 5_000).to_string());
    assert!(!alerts[0].response_received);

    // Re-enters Pending at 6 s, so the next alert is due at 11 s.
    harness.feed(&series("BPM:130", (6..=10).map(|s| s * 1_000))).await;
    assert_eq!(harness.status().alerts_raised, 1);

    harness.feed(&[(T0 + 11_000, "BPM:130")]).await;
    let alerts = harness.alert_records(2).await;
    assert_eq!(alerts[1].timestamp_key, (T0 + 11_000).to_string());
    assert_eq!(harness.status().alerts_raised, 2);
}

#[tokio::test]
async fn test_spo2_recovery_resets_sustain_window() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness
        .feed(&[(T0, "SpO2:85"), (T0 + 5_000, "SpO2:95")])
        .await;
    harness.feed(&series("SpO2:85", (6..=15).map(|s| s * 1_000))).await;
    assert_eq!(harness.status().alerts_raised, 0);

    harness.feed(&[(T0 + 16_000, "SpO2:85")]).await;
    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts[0].alert_type, "spo2_low");
    assert_eq!(alerts[0].timestamp_key, (T0 + 16_000).to_string());
}

#[tokio::test]
async fn test_malformed_token_changes_nothing() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness.feed(&[(T0, "BPM:abc")]).await;
    let status = harness.status();
    assert_eq!(status.parse_stats.malformed, 1);
    assert_eq!(status.parse_stats.samples, 0);
    assert_eq!(status.samples_persisted, 0);
    assert_eq!(harness.handle.latest().borrow().heart_rate, None);

    // Pending survives a malformed token in the middle of the window.
    harness
        .feed(&[
            (T0, "BPM:130"),
            (T0 + 3_000, "BPM:abc"),
            (T0 + 4_000, "HELLO"),
            (T0 + 5_000, "BPM:130"),
        ])
        .await;
    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts[0].timestamp_key, (T0 + 5_000).to_string());
    assert_eq!(harness.status().parse_stats.dropped(), 3);
}

#[tokio::test]
async fn test_in_range_sample_resets_pending() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness
        .feed(&[(T0, "BPM:130"), (T0 + 3_000, "BPM:80")])
        .await;
    harness.feed(&series("BPM:130", (4..=8).map(|s| s * 1_000))).await;
    assert_eq!(harness.status().alerts_raised, 0);

    harness.feed(&[(T0 + 9_000, "BPM:130")]).await;
    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts[0].timestamp_key, (T0 + 9_000).to_string());
}

#[tokio::test]
async fn test_artifact_is_displayed_but_not_kept() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness.feed(&series("BPM:200", (0..=10).map(|s| s * 1_000))).await;

    let status = harness.status();
    assert_eq!(status.alerts_raised, 0);
    assert_eq!(status.samples_persisted, 0);
    assert_eq!(harness.handle.latest().borrow().heart_rate, Some(200.0));
}

#[tokio::test]
async fn test_reconnect_starts_sustain_fresh() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness.feed(&series("BPM:130", (0..=3).map(|s| s * 1_000))).await;
    harness.drop_link("out of range").await;
    harness.connect().await;

    // Without the reset this would fire at 5 s.
    harness.feed(&series("BPM:130", (4..=8).map(|s| s * 1_000))).await;
    assert_eq!(harness.status().alerts_raised, 0);

    harness.feed(&[(T0 + 9_000, "BPM:130")]).await;
    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts[0].timestamp_key, (T0 + 9_000).to_string());
}

#[tokio::test]
async fn test_explicit_disconnect_discards_state() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness.feed(&series("BPM:40", (0..=4).map(|s| s * 1_000))).await;
    harness.handle.disconnect().await.unwrap();
    harness.connect().await;

    harness.feed(&series("BPM:40", (5..=9).map(|s| s * 1_000))).await;
    assert_eq!(harness.status().alerts_raised, 0);

    harness.feed(&[(T0 + 10_000, "BPM:40")]).await;
    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts[0].alert_type, "hr_low");
}

#[tokio::test]
async fn test_fall_cooldown_and_device_faults() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness
        .feed(&[(T0, "FALL"), (T0 + 3_000, "FALL"), (T0 + 5_000, "FALL")])
        .await;
    let alerts = harness.alert_records(2).await;
    let falls: Vec<_> = alerts.iter().map(|a| a.timestamp_key.clone()).collect();
    assert_eq!(falls, vec![T0.to_string(), (T0 + 5_000).to_string()]);

    // Both sensor faults share one cooldown.
    harness
        .feed(&[(T0 + 10_000, "MPU_ERROR"), (T0 + 11_000, "MAX_ERROR")])
        .await;
    let alerts = harness.alert_records(3).await;
    assert_eq!(alerts[2].alert_type, "mpu_error");
    assert_eq!(harness.status().alerts_raised, 3);
    assert!(harness.handle.latest().borrow().last_fault.is_some());
}

#[tokio::test]
async fn test_raw_samples_saved_once_per_minute() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness.feed(&series("BPM:72", (0..=60).map(|s| s * 1_000))).await;
    harness.feed(&[(T0 + 61_000, "MPU_ERROR")]).await;

    assert_eq!(harness.status().samples_persisted, 2);
    let records = vital_records(&harness, 2).await;
    let mut times: Vec<_> = records.iter().map(|r| r.timestamp_key.clone()).collect();
    times.sort();
    assert_eq!(times, vec![T0.to_string(), (T0 + 60_000).to_string()]);
    assert!(records.iter().all(|r| r.channel == Channel::HeartRate));

    let window = vitals_in_range(harness.store.as_ref(), USER_ID, T0 + 1, T0 + 60_000)
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].timestamp_key, (T0 + 60_000).to_string());
}

#[tokio::test]
async fn test_wearables_sharing_a_store_keep_their_own_alerts() {
    let store = Arc::new(MemoryStore::new());
    let mut first = Harness::start_on(test_config(), scripted(), store.clone());
    let mut config = test_config();
    config.session.user_id = "user-2".to_string();
    let mut second = Harness::start_on(config, scripted(), store.clone());
    first.connect().await;
    second.connect().await;

    first.feed(&[(T0, "FALL")]).await;
    second.feed(&[(T0, "FALL")]).await;
    let alerts = first.alert_records(2).await;
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().all(|a| a.timestamp_key == T0.to_string()));

    for user in [USER_ID, "user-2"] {
        let history = alert_history(store.as_ref(), user).await.unwrap();
        assert_eq!(history.len(), 1, "{user}");
        assert_eq!(history[0].user_id, user);
    }
}

#[tokio::test]
async fn test_partial_subscription_runs_degraded() {
    let transport = scripted().failing_channel(Channel::SpO2);
    let mut harness = Harness::start(transport.clone());

    let status = harness.connect().await;
    assert_eq!(status.degraded, vec![Channel::SpO2]);
    assert!(status.last_error.unwrap().contains("Partial subscription"));
    assert_eq!(transport.subscribe_log(), Channel::ALL.to_vec());
    assert_eq!(transport.max_outstanding_writes(), 1);

    // The remaining channels still alert.
    harness.feed(&series("BPM:130", (0..=5).map(|s| s * 1_000))).await;
    let alerts = harness.alert_records(1).await;
    assert_eq!(alerts[0].alert_type, "hr_high");
}

#[tokio::test]
async fn test_notifications_follow_alerts() {
    let mut harness = Harness::start(scripted());
    harness.connect().await;

    harness.feed(&[(T0, "FALL")]).await;
    harness.alert_records(1).await;

    let notifier = harness.notifier.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while notifier.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].alert_type, "fall");
    assert_eq!(sent[0].subject_user_id, USER_ID);
}
