//! The per-session event loop.

use careband_alerts::{AckMessage, Alert, AlertDispatcher, Notifier, RetryPolicy};
use careband_core::Config;
use careband_link::{
    PeerHandle, SessionError, SessionEvent, SessionSignal, SubscriptionReport, Transport,
    TransportSession,
};
use careband_store::DocumentStore;
use careband_vitals::{Ingested, VitalsProcessor};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::MonitorError;
use crate::latest::LatestVitals;
use crate::recorder::VitalsRecorder;
use crate::status::{LinkStatus, SessionStatus};

const EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 16;
const ALERT_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, MonitorError>>;

/// Control messages accepted by the loop.
#[derive(Debug)]
pub enum MonitorCommand {
    /// Start scanning
    StartDiscovery(Reply<mpsc::Receiver<PeerHandle>>),
    /// Stop scanning
    StopDiscovery(Reply<()>),
    /// Connect to a peer
    Connect(PeerHandle, Reply<()>),
    /// Close the link
    Disconnect(Reply<()>),
    /// Close the link if open and stop the loop
    Shutdown,
}

/// Cloneable handle to a running [`Monitor`].
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
    latest: watch::Receiver<LatestVitals>,
    status: watch::Receiver<SessionStatus>,
    alerts: broadcast::Sender<Alert>,
}

impl MonitorHandle {
    /// Start scanning; peers stream through the receiver.
    pub async fn start_discovery(&self) -> Result<mpsc::Receiver<PeerHandle>, MonitorError> {
        self.request(MonitorCommand::StartDiscovery).await
    }

    /// Stop scanning.
    pub async fn stop_discovery(&self) -> Result<(), MonitorError> {
        self.request(MonitorCommand::StopDiscovery).await
    }

    /// Connect to `peer`.
    pub async fn connect(&self, peer: PeerHandle) -> Result<(), MonitorError> {
        self.request(|reply| MonitorCommand::Connect(peer, reply)).await
    }

    /// Disconnect and discard all per-channel state.
    pub async fn disconnect(&self) -> Result<(), MonitorError> {
        self.request(MonitorCommand::Disconnect).await
    }

    /// Stop the monitor.
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        self.commands
            .send(MonitorCommand::Shutdown)
            .await
            .map_err(|_| MonitorError::Stopped)
    }

    /// Display snapshot.
    pub fn latest(&self) -> watch::Receiver<LatestVitals> {
        self.latest.clone()
    }

    /// Session status.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Stream of dispatched alerts.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> MonitorCommand,
    ) -> Result<T, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| MonitorError::Stopped)?;
        rx.await.map_err(|_| MonitorError::Stopped)?
    }
}

/// Event loop for one wearable session.
pub struct Monitor {
    session: TransportSession,
    events: mpsc::Receiver<SessionEvent>,
    commands: mpsc::Receiver<MonitorCommand>,
    processor: VitalsProcessor,
    recorder: VitalsRecorder,
    dispatcher: AlertDispatcher,
    latest: watch::Sender<LatestVitals>,
    status: watch::Sender<SessionStatus>,
    alerts: broadcast::Sender<Alert>,
}

impl Monitor {
    /// Build a monitor and its handle.
    ///
    /// When `ack` is set, every dispatched alert is registered with that
    /// acknowledgment loop.
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        ack: Option<mpsc::Sender<AckMessage>>,
    ) -> (Self, MonitorHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (latest_tx, latest_rx) = watch::channel(LatestVitals::default());
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let (alerts_tx, _) = broadcast::channel(ALERT_BUFFER);

        let retry = RetryPolicy::from_config(&config.retry);
        let session = TransportSession::new(transport, config.session.channels.clone(), events_tx);
        let mut dispatcher = AlertDispatcher::new(
            Arc::clone(&store),
            notifier,
            retry.clone(),
            config.session.user_id.as_str(),
            config.session.notified_to.as_str(),
        );
        if let Some(ack) = ack {
            dispatcher = dispatcher.with_ack_channel(ack);
        }

        let monitor = Self {
            session,
            events: events_rx,
            commands: commands_rx,
            processor: VitalsProcessor::from_config(config),
            recorder: VitalsRecorder::new(store, retry, config.session.user_id.as_str()),
            dispatcher,
            latest: latest_tx,
            status: status_tx,
            alerts: alerts_tx.clone(),
        };
        let handle = MonitorHandle {
            commands: commands_tx,
            latest: latest_rx,
            status: status_rx,
            alerts: alerts_tx,
        };
        (monitor, handle)
    }

    /// Run until shut down or every handle is dropped.
    ///
    /// Link events are drained before commands so a command never overtakes
    /// samples that arrived ahead of it.
    pub async fn run(mut self) {
        info!(user_id = self.dispatcher.user_id(), "Monitor started");
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.handle_event(event).await,
                command = self.commands.recv() => match command {
                    Some(MonitorCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        if self.session.is_connected() {
            if let Err(err) = self.session.disconnect().await {
                warn!(error = %err, "Disconnect on shutdown failed");
            }
        }
        info!("Monitor stopped");
    }

    async fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::StartDiscovery(reply) => {
                let result = self.session.start_discovery().await;
                match &result {
                    Ok(_) => self.set_link(LinkStatus::Scanning),
                    Err(err) => self.surface_error(err),
                }
                let _ = reply.send(result.map_err(MonitorError::from));
            }
            MonitorCommand::StopDiscovery(reply) => {
                let result = self.session.stop_discovery().await;
                if result.is_ok() && !self.session.is_connected() {
                    self.set_link(LinkStatus::Idle);
                }
                let _ = reply.send(result.map_err(MonitorError::from));
            }
            MonitorCommand::Connect(peer, reply) => {
                let peer_id = peer.id.clone();
                let result = self.session.connect(peer).await;
                match &result {
                    Ok(()) => self.status.send_modify(|s| {
                        s.link = LinkStatus::Connected { peer_id };
                        s.degraded.clear();
                        s.last_error = None;
                        s.remediation = None;
                    }),
                    Err(err) => self.surface_error(err),
                }
                let _ = reply.send(result.map_err(MonitorError::from));
            }
            MonitorCommand::Disconnect(reply) => {
                let result = self.session.disconnect().await;
                self.processor.reset();
                self.status.send_modify(|s| {
                    s.link = LinkStatus::Idle;
                    s.degraded.clear();
                });
                let _ = reply.send(result.map_err(MonitorError::from));
            }
            MonitorCommand::Shutdown => {}
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match self.session.handle_event(event).await {
            SessionSignal::Token {
                payload,
                received_at_ms,
            } => self.ingest(&payload, received_at_ms),
            SessionSignal::Ready(report) => self.on_ready(report),
            SessionSignal::LinkLost { reason } => {
                self.processor.reset();
                self.status.send_modify(|s| {
                    s.link = LinkStatus::Idle;
                    s.degraded.clear();
                    s.last_error = Some(match reason {
                        Some(reason) => format!("Link lost: {reason}"),
                        None => "Link lost".to_string(),
                    });
                });
            }
            SessionSignal::None | SessionSignal::Stale => {}
        }
    }

    fn ingest(&mut self, payload: &str, received_at_ms: u64) {
        match self.processor.ingest_token(payload, received_at_ms) {
            Ingested::Sample(outcome) => {
                self.latest.send_modify(|l| l.apply(&outcome.sample));

                if outcome.persist {
                    // Detached; the task logs its own failure.
                    drop(self.recorder.record(&outcome.sample));
                    self.status.send_modify(|s| s.samples_persisted += 1);
                }

                if let Some(decision) = outcome.alert() {
                    if let Some(handle) = self.dispatcher.dispatch(decision) {
                        let _ = self.alerts.send(handle.alert.clone());
                        self.status.send_modify(|s| s.alerts_raised += 1);
                    }
                }
            }
            Ingested::SleepMode => self.latest.send_modify(|l| l.sleeping = true),
            Ingested::Dropped(_) => {}
        }

        let stats = self.processor.stats();
        self.status.send_if_modified(|s| {
            let changed = s.parse_stats != stats;
            s.parse_stats = stats;
            changed
        });
    }

    fn on_ready(&mut self, report: SubscriptionReport) {
        let degraded = report.failed_channels();
        let partial = report.partial_error().map(|err| err.to_string());
        self.status.send_modify(|s| {
            if let LinkStatus::Connected { peer_id } = &s.link {
                s.link = LinkStatus::Ready {
                    peer_id: peer_id.clone(),
                };
            }
            s.degraded = degraded;
            if partial.is_some() {
                s.last_error = partial;
            }
        });
        debug!("Monitor ready");
    }

    fn set_link(&self, link: LinkStatus) {
        self.status.send_modify(|s| s.link = link);
    }

    fn surface_error(&self, err: &SessionError) {
        let remediation = match err {
            SessionError::Transport(transport) => transport.remediation(),
            _ => None,
        };
        self.status.send_modify(|s| {
            s.last_error = Some(err.to_string());
            s.remediation = remediation.map(str::to_string);
        });
    }
}
