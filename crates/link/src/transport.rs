//! Transport boundary consumed by the session.
//!
//! A platform adapter implements [`Transport`] and [`Link`]. Everything the
//! link reports after `connect` (service discovery, descriptor-write
//! completions, notification payloads, link loss) arrives through the
//! [`EventSink`] handed to it, so the session sees one ordered stream.

use async_trait::async_trait;
use careband_core::Channel;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;

/// Opaque handle to a discovered peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    /// Adapter-level address
    pub id: String,
    /// Advertised name, if any
    pub name: Option<String>,
}

impl PeerHandle {
    /// Create a handle.
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> &str {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.id,
        }
    }
}

/// Callback delivered by a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Service discovery finished
    ServicesDiscovered {
        /// Characteristic UUIDs the peer advertises, known or not
        characteristics: Vec<Uuid>,
    },
    /// A descriptor write finished
    SubscriptionWritten {
        /// Channel the write targeted
        channel: Channel,
        /// Outcome reported by the transport
        result: Result<(), TransportError>,
    },
    /// A notification payload
    Token {
        /// Raw UTF-8 payload
        payload: String,
        /// Arrival time (Unix epoch milliseconds)
        received_at_ms: u64,
    },
    /// The link dropped
    Disconnected {
        /// Transport-supplied reason
        reason: Option<String>,
    },
}

/// Link event stamped with the generation of the link that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Link generation at emission time
    pub generation: u64,
    /// The event itself
    pub event: LinkEvent,
}

/// Sender side of the session's inbound stream, bound to one link generation.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    /// Bind a sender to a generation.
    pub fn new(generation: u64, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sink stamps onto events.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event, waiting for buffer space.
    ///
    /// Returns `false` once the session has gone away.
    pub async fn emit(&self, event: LinkEvent) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }

    /// Deliver an event from a synchronous callback.
    ///
    /// Returns `false` if the buffer is full or the session has gone away.
    pub fn try_emit(&self, event: LinkEvent) -> bool {
        self.tx
            .try_send(SessionEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Wireless adapter.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start scanning; discovered peers stream through the receiver.
    async fn scan(&self) -> Result<mpsc::Receiver<PeerHandle>, TransportError>;

    /// Stop an active scan.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Open a link to `peer`. All subsequent callbacks go through `sink`.
    async fn connect(
        &self,
        peer: &PeerHandle,
        sink: EventSink,
    ) -> Result<Box<dyn Link>, TransportError>;
}

/// Open connection to one peer.
#[async_trait]
pub trait Link: Send + Sync {
    /// Peer this link is connected to.
    fn peer(&self) -> &PeerHandle;

    /// Start service discovery; completion arrives as
    /// [`LinkEvent::ServicesDiscovered`].
    async fn discover_services(&self) -> Result<(), TransportError>;

    /// Issue the notification-enable descriptor write for `channel`;
    /// completion arrives as [`LinkEvent::SubscriptionWritten`].
    ///
    /// The transport tolerates only one outstanding descriptor write.
    ///
    /// The session awaits this call on the task that drains the event
    /// stream. Implementations must return once the write is issued and must
    /// not wait for buffer space to deliver the completion from inside it.
    async fn subscribe(&self, channel: Channel) -> Result<(), TransportError>;

    /// Close the link. No events are delivered afterwards.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let named = PeerHandle::new("AA:BB", Some("CareBand".into()));
        assert_eq!(named.display_name(), "CareBand");

        let blank = PeerHandle::new("AA:BB", Some("  ".into()));
        assert_eq!(blank.display_name(), "AA:BB");

        let anonymous = PeerHandle::new("AA:BB", None);
        assert_eq!(anonymous.display_name(), "AA:BB");
    }

    #[tokio::test]
    async fn test_sink_stamps_generation() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(7, tx);

        assert!(sink.emit(LinkEvent::Disconnected { reason: None }).await);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.generation, 7);
    }

    #[tokio::test]
    async fn test_sink_reports_closed_session() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventSink::new(1, tx);
        assert!(!sink.try_emit(LinkEvent::Disconnected { reason: None }));
    }
}
