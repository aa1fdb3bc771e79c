//! In-process transport driven by a script.
//!
//! Used by tests and by the replay node. Clones share state, so a test keeps
//! one handle to inject payloads and drop links while the session owns
//! another.

use async_trait::async_trait;
use careband_core::Channel;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{EventSink, Link, LinkEvent, PeerHandle, Transport};

#[derive(Debug)]
struct ScriptState {
    adapter_present: bool,
    permission_granted: bool,
    peers: Vec<PeerHandle>,
    offered: Vec<Channel>,
    extra_characteristics: Vec<Uuid>,
    failing: HashSet<Channel>,
    auto_complete: bool,
    sink: Option<EventSink>,
    subscribe_log: Vec<Channel>,
    outstanding: usize,
    max_outstanding: usize,
}

/// Scripted transport.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// Transport that finds `peers`, offers every channel and completes
    /// descriptor writes immediately.
    pub fn new(peers: Vec<PeerHandle>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                adapter_present: true,
                permission_granted: true,
                peers,
                offered: Channel::ALL.to_vec(),
                extra_characteristics: Vec::new(),
                failing: HashSet::new(),
                auto_complete: true,
                sink: None,
                subscribe_log: Vec::new(),
                outstanding: 0,
                max_outstanding: 0,
            })),
        }
    }

    /// Simulate a host with no wireless adapter.
    pub fn without_adapter(self) -> Self {
        self.lock().adapter_present = false;
        self
    }

    /// Simulate missing scan/connect grants.
    pub fn without_permission(self) -> Self {
        self.lock().permission_granted = false;
        self
    }

    /// Restrict the channels the peer advertises.
    pub fn offering(self, channels: Vec<Channel>) -> Self {
        self.lock().offered = channels;
        self
    }

    /// Also advertise a characteristic that maps to no channel.
    pub fn advertising(self, characteristic: Uuid) -> Self {
        self.lock().extra_characteristics.push(characteristic);
        self
    }

    /// Make the descriptor write for `channel` fail.
    pub fn failing_channel(self, channel: Channel) -> Self {
        self.lock().failing.insert(channel);
        self
    }

    /// Leave descriptor writes outstanding until [`Self::complete_write`].
    pub fn manual_completion(self) -> Self {
        self.lock().auto_complete = false;
        self
    }

    /// Deliver a notification payload on the current link.
    ///
    /// Returns `false` if no link is open.
    pub async fn inject_token(&self, payload: impl Into<String>, received_at_ms: u64) -> bool {
        let Some(sink) = self.current_sink() else {
            return false;
        };
        sink.emit(LinkEvent::Token {
            payload: payload.into(),
            received_at_ms,
        })
        .await
    }

    /// Complete an outstanding descriptor write.
    pub async fn complete_write(&self, channel: Channel, result: Result<(), TransportError>) -> bool {
        let sink = {
            let mut state = self.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            state.sink.clone()
        };
        match sink {
            Some(sink) => {
                sink.emit(LinkEvent::SubscriptionWritten { channel, result })
                    .await
            }
            None => false,
        }
    }

    /// Drop the current link as if the peer went out of range.
    pub async fn drop_link(&self, reason: &str) -> bool {
        let sink = self.lock().sink.take();
        match sink {
            Some(sink) => {
                sink.emit(LinkEvent::Disconnected {
                    reason: Some(reason.to_string()),
                })
                .await
            }
            None => false,
        }
    }

    /// Channels a descriptor write was issued for, in issue order.
    pub fn subscribe_log(&self) -> Vec<Channel> {
        self.lock().subscribe_log.clone()
    }

    /// Highest number of descriptor writes outstanding at once.
    pub fn max_outstanding_writes(&self) -> usize {
        self.lock().max_outstanding
    }

    fn current_sink(&self) -> Option<EventSink> {
        self.lock().sink.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_access(&self) -> Result<(), TransportError> {
        let state = self.lock();
        if !state.adapter_present {
            return Err(TransportError::Unavailable);
        }
        if !state.permission_granted {
            return Err(TransportError::PermissionDenied(
                "scan and connect grants missing".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn scan(&self) -> Result<mpsc::Receiver<PeerHandle>, TransportError> {
        self.check_access()?;
        let peers = self.lock().peers.clone();
        let (tx, rx) = mpsc::channel(peers.len().max(1));
        for peer in peers {
            let _ = tx.try_send(peer);
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect(
        &self,
        peer: &PeerHandle,
        sink: EventSink,
    ) -> Result<Box<dyn Link>, TransportError> {
        self.check_access()?;
        let mut state = self.lock();
        if !state.peers.iter().any(|p| p.id == peer.id) {
            return Err(TransportError::PeerNotFound(peer.id.clone()));
        }
        debug!(peer = %peer.id, generation = sink.generation(), "Scripted link opened");
        state.sink = Some(sink);
        state.outstanding = 0;
        Ok(Box::new(ScriptedLink {
            peer: peer.clone(),
            transport: self.clone(),
        }))
    }
}

struct ScriptedLink {
    peer: PeerHandle,
    transport: ScriptedTransport,
}

/// Emit from a detached task, as a radio stack's callback thread would.
fn deliver(sink: EventSink, event: LinkEvent) {
    tokio::spawn(async move {
        sink.emit(event).await;
    });
}

#[async_trait]
impl Link for ScriptedLink {
    fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    async fn discover_services(&self) -> Result<(), TransportError> {
        let (sink, characteristics) = {
            let state = self.transport.lock();
            let mut characteristics: Vec<Uuid> =
                state.offered.iter().map(Channel::characteristic_id).collect();
            characteristics.extend(state.extra_characteristics.iter().copied());
            (state.sink.clone(), characteristics)
        };
        let sink = sink.ok_or(TransportError::NotConnected)?;
        deliver(sink, LinkEvent::ServicesDiscovered { characteristics });
        Ok(())
    }

    async fn subscribe(&self, channel: Channel) -> Result<(), TransportError> {
        let (sink, completion) = {
            let mut state = self.transport.lock();
            let sink = state.sink.clone().ok_or(TransportError::NotConnected)?;
            state.subscribe_log.push(channel);
            state.outstanding += 1;
            state.max_outstanding = state.max_outstanding.max(state.outstanding);

            let completion = if state.auto_complete {
                state.outstanding -= 1;
                Some(if state.failing.contains(&channel) {
                    Err(TransportError::DescriptorWrite {
                        channel,
                        reason: "scripted failure".into(),
                    })
                } else {
                    Ok(())
                })
            } else {
                None
            };
            (sink, completion)
        };

        if let Some(result) = completion {
            deliver(sink, LinkEvent::SubscriptionWritten { channel, result });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.transport.lock();
        state.sink = None;
        state.outstanding = 0;
        Ok(())
    }
}
