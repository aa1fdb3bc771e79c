//! Fixtures for the pipeline scenario tests.

use async_trait::async_trait;
use careband_alerts::{
    AckMessage, AckOutcome, AckResponse, AcknowledgmentLoop, Alert, Notification, Notifier,
    NotifyError, RetryPolicy,
};
use careband_core::Config;
use careband_link::{PeerHandle, ScriptedTransport};
use careband_monitor::{LinkStatus, Monitor, MonitorHandle, SessionStatus};
use careband_store::{DocumentStore, MemoryStore, Order, Query, ALERTS_COLLECTION};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Subject user in every scenario.
pub const USER_ID: &str = "user-1";

const TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-friendly subscriber. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Defaults with a fast retry schedule.
pub fn test_config() -> Config {
    let mut config = Config::default_config();
    config.session.user_id = USER_ID.to_string();
    config.retry.max_attempts = 3;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config
}

/// The one wearable the scripted adapter knows about.
pub fn wearable() -> PeerHandle {
    PeerHandle::new("C0:FF:EE:00:00:01", Some("CareBand".to_string()))
}

/// Records every notification it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Shared instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Closed)?
            .push(notification.clone());
        Ok(())
    }
}

/// A running monitor plus acknowledgment loop over a memory store.
pub struct Harness {
    /// Scripted wearable link
    pub transport: ScriptedTransport,
    /// Backing store
    pub store: Arc<MemoryStore>,
    /// Notification sink
    pub notifier: Arc<RecordingNotifier>,
    /// Monitor control handle
    pub handle: MonitorHandle,
    /// Acknowledgment loop input
    pub acks: mpsc::Sender<AckMessage>,
    status: watch::Receiver<SessionStatus>,
    injected: u64,
}

impl Harness {
    /// Start with [`test_config`].
    pub fn start(transport: ScriptedTransport) -> Self {
        Self::start_with(test_config(), transport)
    }

    /// Start with an explicit config.
    pub fn start_with(config: Config, transport: ScriptedTransport) -> Self {
        Self::start_on(config, transport, Arc::new(MemoryStore::new()))
    }

    /// Start over an existing store.
    pub fn start_on(config: Config, transport: ScriptedTransport, store: Arc<MemoryStore>) -> Self {
        init_tracing();
        let notifier = RecordingNotifier::new();
        let (ack_loop, acks) = AcknowledgmentLoop::new(
            store.clone(),
            RetryPolicy::from_config(&config.retry),
            config.session.notified_to.as_str(),
            64,
        );
        tokio::spawn(ack_loop.run());

        let (monitor, handle) = Monitor::new(
            &config,
            Arc::new(transport.clone()),
            store.clone(),
            notifier.clone(),
            Some(acks.clone()),
        );
        tokio::spawn(monitor.run());

        Self {
            transport,
            store,
            notifier,
            status: handle.status(),
            handle,
            acks,
            injected: 0,
        }
    }

    /// Connect to the wearable and wait for the handshake to finish.
    pub async fn connect(&mut self) -> SessionStatus {
        self.handle.connect(wearable()).await.unwrap();
        self.wait_status(|s| matches!(s.link, LinkStatus::Ready { .. }))
            .await
    }

    /// Deliver `(received_at_ms, token)` pairs and wait until all are processed.
    pub async fn feed(&mut self, tokens: &[(u64, &str)]) {
        for (at, token) in tokens {
            assert!(
                self.transport.inject_token(*token, *at).await,
                "no link for {token}"
            );
            self.injected += 1;
        }
        let injected = self.injected;
        self.wait_status(move |s| s.parse_stats.total() >= injected)
            .await;
    }

    /// Drop the link from the wearable side and wait for the monitor to notice.
    pub async fn drop_link(&mut self, reason: &str) {
        assert!(self.transport.drop_link(reason).await);
        self.wait_status(|s| s.link == LinkStatus::Idle).await;
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Wait for a status condition.
    pub async fn wait_status(
        &mut self,
        done: impl Fn(&SessionStatus) -> bool,
    ) -> SessionStatus {
        tokio::time::timeout(TIMEOUT, self.status.wait_for(|s| done(s)))
            .await
            .expect("timed out waiting for monitor status")
            .expect("monitor stopped")
            .clone()
    }

    /// Caregiver acknowledges the newest alert of `alert_type`.
    pub async fn acknowledge(&self, alert_type: &str, at_ms: u64) -> AckOutcome {
        self.respond(None, alert_type, true, at_ms).await
    }

    /// Send a caregiver response and wait for the loop's verdict.
    pub async fn respond(
        &self,
        alert_id: Option<&str>,
        alert_type: &str,
        acknowledged: bool,
        at_ms: u64,
    ) -> AckOutcome {
        let (message, reply) = AckMessage::respond(AckResponse {
            alert_id: alert_id.map(str::to_string),
            alert_type: alert_type.to_string(),
            subject_user_id: USER_ID.to_string(),
            acknowledged,
            responded_at_ms: at_ms,
        });
        self.acks.send(message).await.unwrap();
        tokio::time::timeout(TIMEOUT, reply)
            .await
            .expect("timed out waiting for acknowledgment")
            .unwrap()
    }

    /// Alert records in key order, once at least `expected` exist.
    pub async fn alert_records(&self, expected: usize) -> Vec<Alert> {
        let query = Query::collection(ALERTS_COLLECTION).order_by("timestampKey", Order::Ascending);
        tokio::time::timeout(TIMEOUT, async {
            loop {
                let docs = self.store.query(&query).await.unwrap();
                if docs.len() >= expected {
                    return docs
                        .iter()
                        .map(|d| d.decode::<Alert>().unwrap())
                        .collect::<Vec<_>>();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for alert records")
    }
}
