//! Transport session lifecycle.
//!
//! A session owns at most one link. Each successful `connect` starts a new
//! link generation; events stamped with an older generation are dropped, so
//! callbacks that race a disconnect can never leak into the next session.

use careband_core::Channel;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, TransportError};
use crate::subscription::{SequencerStep, SubscriptionReport, SubscriptionSequencer};
use crate::transport::{EventSink, Link, LinkEvent, PeerHandle, SessionEvent, Transport};

/// Connection state of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No link
    Idle,
    /// Link open, notification handshake in progress
    Connected {
        /// Connected peer
        peer: PeerHandle,
    },
    /// Handshake finished; samples flow
    Ready {
        /// Connected peer
        peer: PeerHandle,
        /// Channels that failed to subscribe
        degraded: Vec<Channel>,
    },
}

/// What a handled event means for the layers above.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// Nothing for the caller to do
    None,
    /// Event from a previous link generation, discarded
    Stale,
    /// Notification payload to parse
    Token {
        /// Raw payload
        payload: String,
        /// Arrival time (Unix epoch milliseconds)
        received_at_ms: u64,
    },
    /// Handshake finished
    Ready(SubscriptionReport),
    /// The link dropped; per-session state must be discarded
    LinkLost {
        /// Transport-supplied reason
        reason: Option<String>,
    },
}

/// Session over an injected transport.
pub struct TransportSession {
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<SessionEvent>,
    channels: Vec<Channel>,
    link: Option<Box<dyn Link>>,
    state: SessionState,
    generation: u64,
    sequencer: SubscriptionSequencer,
    scanning: bool,
}

impl TransportSession {
    /// Create an idle session.
    ///
    /// # Arguments
    /// * `transport` - Wireless adapter
    /// * `channels` - Channels to subscribe to after discovery, in order
    /// * `events` - Inbound stream the link delivers its callbacks to
    pub fn new(
        transport: Arc<dyn Transport>,
        channels: Vec<Channel>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            events,
            channels,
            link: None,
            state: SessionState::Idle,
            generation: 0,
            sequencer: SubscriptionSequencer::new(),
            scanning: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current link generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a link is open.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Start scanning for peers.
    pub async fn start_discovery(&mut self) -> Result<mpsc::Receiver<PeerHandle>, SessionError> {
        let peers = self.transport.scan().await.map_err(|err| {
            error!(error = %err, "Scan failed");
            err
        })?;
        self.scanning = true;
        info!("Scanning for wearables");
        Ok(peers)
    }

    /// Stop scanning.
    pub async fn stop_discovery(&mut self) -> Result<(), SessionError> {
        if !self.scanning {
            return Ok(());
        }
        self.transport.stop_scan().await?;
        self.scanning = false;
        debug!("Scan stopped");
        Ok(())
    }

    /// Open a link to `peer` and start service discovery.
    ///
    /// `Unavailable` and `PermissionDenied` are returned as-is and never
    /// retried here.
    pub async fn connect(&mut self, peer: PeerHandle) -> Result<(), SessionError> {
        if let Some(link) = &self.link {
            return Err(SessionError::AlreadyConnected(link.peer().id.clone()));
        }

        self.generation += 1;
        let sink = EventSink::new(self.generation, self.events.clone());

        let link = self.transport.connect(&peer, sink).await.map_err(|err| {
            match &err {
                TransportError::Unavailable | TransportError::PermissionDenied(_) => {
                    error!(peer = %peer.id, error = %err, "Connect refused");
                }
                _ => warn!(peer = %peer.id, error = %err, "Connect failed"),
            }
            err
        })?;

        info!(
            peer = %peer.id,
            name = peer.display_name(),
            generation = self.generation,
            "Link established"
        );
        self.state = SessionState::Connected { peer: peer.clone() };

        if let Err(err) = link.discover_services().await {
            error!(peer = %peer.id, error = %err, "Service discovery failed");
            if let Err(close_err) = link.disconnect().await {
                warn!(error = %close_err, "Failed to close link after discovery failure");
            }
            self.reset_link();
            return Err(err.into());
        }

        self.link = Some(link);
        Ok(())
    }

    /// Close the link and cancel any pending subscription writes.
    ///
    /// This is the only cancellation point of a session.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        let link = self.link.take().ok_or(SessionError::NotConnected)?;
        let peer = link.peer().id.clone();
        self.reset_link();

        if let Err(err) = link.disconnect().await {
            warn!(peer = %peer, error = %err, "Link close reported an error");
        }
        info!(peer = %peer, "Disconnected");
        Ok(())
    }

    /// Apply one inbound event.
    pub async fn handle_event(&mut self, event: SessionEvent) -> SessionSignal {
        if event.generation != self.generation || self.link.is_none() {
            debug!(
                event_generation = event.generation,
                generation = self.generation,
                "Dropping event from a closed link"
            );
            return SessionSignal::Stale;
        }

        match event.event {
            LinkEvent::ServicesDiscovered { characteristics } => {
                let channels: Vec<Channel> = characteristics
                    .iter()
                    .filter_map(Channel::from_characteristic_id)
                    .collect();
                let (offered, unavailable): (Vec<Channel>, Vec<Channel>) = self
                    .channels
                    .iter()
                    .copied()
                    .partition(|c| channels.contains(c));
                let unavailable = unavailable
                    .into_iter()
                    .map(|c| {
                        (
                            c,
                            TransportError::Link(format!("peer does not offer {c}")),
                        )
                    })
                    .collect();
                debug!(offered = offered.len(), "Services discovered");
                let step = self.sequencer.begin(&offered, unavailable);
                self.drive(step).await
            }
            LinkEvent::SubscriptionWritten { channel, result } => {
                let step = self.sequencer.on_write_complete(channel, result);
                self.drive(step).await
            }
            LinkEvent::Token {
                payload,
                received_at_ms,
            } => SessionSignal::Token {
                payload,
                received_at_ms,
            },
            LinkEvent::Disconnected { reason } => {
                warn!(reason = ?reason, "Link lost");
                self.link = None;
                self.reset_link();
                SessionSignal::LinkLost { reason }
            }
        }
    }

    /// Issue writes until one is in flight or the queue drains.
    async fn drive(&mut self, mut step: SequencerStep) -> SessionSignal {
        loop {
            match step {
                SequencerStep::Issue(request) => {
                    let Some(link) = &self.link else {
                        return SessionSignal::None;
                    };
                    match link.subscribe(request.channel).await {
                        Ok(()) => return SessionSignal::None,
                        Err(err) => {
                            // The write never left the host; treat it as a
                            // completed failure and move on.
                            step = self.sequencer.on_write_complete(request.channel, Err(err));
                        }
                    }
                }
                SequencerStep::Waiting => return SessionSignal::None,
                SequencerStep::Ready(report) => {
                    let peer = match &self.state {
                        SessionState::Connected { peer } | SessionState::Ready { peer, .. } => {
                            peer.clone()
                        }
                        SessionState::Idle => return SessionSignal::None,
                    };
                    if let Some(partial) = report.partial_error() {
                        warn!(error = %partial, failed = ?report.failed_channels(), "Session running degraded");
                    } else {
                        info!(channels = report.subscribed.len(), "Session ready");
                    }
                    self.state = SessionState::Ready {
                        peer,
                        degraded: report.failed_channels(),
                    };
                    return SessionSignal::Ready(report);
                }
            }
        }
    }

    /// Forget the current link generation.
    fn reset_link(&mut self) {
        self.sequencer.cancel();
        self.state = SessionState::Idle;
        // Bump so late callbacks from the closed link are recognised as stale.
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedTransport;
    use std::time::Duration;
    use uuid::Uuid;

    fn peer() -> PeerHandle {
        PeerHandle::new("AA:BB:CC:DD:EE:FF", Some("CareBand".into()))
    }

    async fn pump(
        session: &mut TransportSession,
        rx: &mut mpsc::Receiver<SessionEvent>,
    ) -> Vec<SessionSignal> {
        // Scripted callbacks arrive from spawned tasks; stop once quiet.
        let mut signals = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            signals.push(session.handle_event(event).await);
        }
        signals
    }

    #[tokio::test]
    async fn test_connect_runs_handshake_to_ready() {
        let transport = ScriptedTransport::new(vec![peer()]);
        let (tx, mut rx) = mpsc::channel(64);
        let mut session =
            TransportSession::new(Arc::new(transport.clone()), Channel::ALL.to_vec(), tx);

        session.connect(peer()).await.unwrap();
        assert!(matches!(session.state(), SessionState::Connected { .. }));

        let signals = pump(&mut session, &mut rx).await;
        assert!(signals
            .iter()
            .any(|s| matches!(s, SessionSignal::Ready(r) if !r.is_partial())));
        assert!(matches!(session.state(), SessionState::Ready { degraded, .. } if degraded.is_empty()));
        assert_eq!(transport.subscribe_log(), Channel::ALL.to_vec());
        assert_eq!(transport.max_outstanding_writes(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_adapter_is_reported() {
        let transport = ScriptedTransport::new(vec![peer()]).without_adapter();
        let (tx, _rx) = mpsc::channel(8);
        let mut session = TransportSession::new(Arc::new(transport), Channel::ALL.to_vec(), tx);

        let err = session.connect(peer()).await.unwrap_err();
        assert_eq!(err, SessionError::Transport(TransportError::Unavailable));
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[tokio::test]
    async fn test_permission_denied_is_reported() {
        let transport = ScriptedTransport::new(vec![peer()]).without_permission();
        let (tx, _rx) = mpsc::channel(8);
        let mut session = TransportSession::new(Arc::new(transport), Channel::ALL.to_vec(), tx);

        let err = session.connect(peer()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transport(TransportError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let transport = ScriptedTransport::new(vec![peer()]);
        let (tx, _rx) = mpsc::channel(64);
        let mut session = TransportSession::new(Arc::new(transport), Channel::ALL.to_vec(), tx);

        session.connect(peer()).await.unwrap();
        assert!(matches!(
            session.connect(peer()).await,
            Err(SessionError::AlreadyConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_events_after_disconnect_are_stale() {
        let transport = ScriptedTransport::new(vec![peer()]);
        let (tx, mut rx) = mpsc::channel(64);
        let mut session =
            TransportSession::new(Arc::new(transport.clone()), Channel::ALL.to_vec(), tx);

        session.connect(peer()).await.unwrap();
        pump(&mut session, &mut rx).await;
        let old_generation = session.generation();

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), &SessionState::Idle);

        let late = SessionEvent {
            generation: old_generation,
            event: LinkEvent::Token {
                payload: "BPM:130".into(),
                received_at_ms: 0,
            },
        };
        assert_eq!(session.handle_event(late).await, SessionSignal::Stale);
    }

    #[tokio::test]
    async fn test_link_loss_returns_to_idle() {
        let transport = ScriptedTransport::new(vec![peer()]);
        let (tx, mut rx) = mpsc::channel(64);
        let mut session =
            TransportSession::new(Arc::new(transport.clone()), Channel::ALL.to_vec(), tx);

        session.connect(peer()).await.unwrap();
        pump(&mut session, &mut rx).await;

        transport.drop_link("out of range").await;
        let signals = pump(&mut session, &mut rx).await;
        assert!(signals
            .iter()
            .any(|s| matches!(s, SessionSignal::LinkLost { .. })));
        assert!(!session.is_connected());
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[tokio::test]
    async fn test_missing_characteristic_degrades_session() {
        let transport = ScriptedTransport::new(vec![peer()])
            .offering(vec![Channel::HeartRate, Channel::Fall])
            .advertising(Uuid::nil());
        let (tx, mut rx) = mpsc::channel(64);
        let mut session = TransportSession::new(
            Arc::new(transport.clone()),
            vec![Channel::HeartRate, Channel::SpO2, Channel::Fall],
            tx,
        );

        session.connect(peer()).await.unwrap();
        pump(&mut session, &mut rx).await;

        assert_eq!(
            transport.subscribe_log(),
            vec![Channel::HeartRate, Channel::Fall]
        );
        match session.state() {
            SessionState::Ready { degraded, .. } => assert_eq!(degraded, &vec![Channel::SpO2]),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_discovery_toggles_scanning() {
        let transport = ScriptedTransport::new(vec![peer()]);
        let (tx, _rx) = mpsc::channel(8);
        let mut session = TransportSession::new(Arc::new(transport), Channel::ALL.to_vec(), tx);

        let mut peers = session.start_discovery().await.unwrap();
        assert!(session.is_scanning());
        assert_eq!(peers.recv().await, Some(peer()));

        session.stop_discovery().await.unwrap();
        assert!(!session.is_scanning());
    }
}
