//! Notification subscription sequencer.
//!
//! The transport accepts a single outstanding descriptor write. Overlapping
//! writes are dropped or reordered silently, so enabling notifications on
//! several channels has to be serialized: issue one request, wait for its
//! completion callback, then issue the next.
//!
//! The sequencer is a plain FIFO state machine. It never touches the link
//! itself; it tells the caller what to issue next.

use careband_core::Channel;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::error::{SessionError, TransportError};

/// One queued notification-enable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Target channel
    pub channel: Channel,
    /// Enable (true) or disable (false) notifications
    pub enable: bool,
}

/// Result of a completed handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// Channels now delivering notifications
    pub subscribed: Vec<Channel>,
    /// Channels that will stay silent, with the failure that caused it
    pub failed: Vec<(Channel, TransportError)>,
}

impl SubscriptionReport {
    /// Whether any channel failed to subscribe.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Channels that failed.
    pub fn failed_channels(&self) -> Vec<Channel> {
        self.failed.iter().map(|(c, _)| *c).collect()
    }

    /// Degraded-mode condition to report upward, if any.
    pub fn partial_error(&self) -> Option<SessionError> {
        self.is_partial().then(|| SessionError::PartialSubscription {
            failed: self.failed_channels(),
        })
    }
}

/// What the caller must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerStep {
    /// Issue this write on the link
    Issue(SubscriptionRequest),
    /// A write is in flight; wait for its completion
    Waiting,
    /// Queue drained; the session is ready
    Ready(SubscriptionReport),
}

/// FIFO sequencer enforcing one in-flight descriptor write.
#[derive(Debug, Default)]
pub struct SubscriptionSequencer {
    queue: VecDeque<SubscriptionRequest>,
    in_flight: Option<SubscriptionRequest>,
    report: SubscriptionReport,
    active: bool,
}

impl SubscriptionSequencer {
    /// Create an idle sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one enable request per channel and return the first step.
    ///
    /// `unavailable` lists channels that cannot be subscribed at all (the
    /// peer does not offer them); they go straight into the report. Any
    /// previous handshake is discarded.
    pub fn begin(
        &mut self,
        channels: &[Channel],
        unavailable: Vec<(Channel, TransportError)>,
    ) -> SequencerStep {
        self.cancel();
        self.report.failed = unavailable;
        self.queue.extend(channels.iter().map(|&channel| SubscriptionRequest {
            channel,
            enable: true,
        }));
        self.active = true;
        debug!(queued = self.queue.len(), "Subscription handshake started");
        self.advance()
    }

    /// Handle the completion callback for a descriptor write.
    ///
    /// Completions that do not match the in-flight request are ignored.
    pub fn on_write_complete(
        &mut self,
        channel: Channel,
        result: Result<(), TransportError>,
    ) -> SequencerStep {
        match self.in_flight {
            Some(request) if request.channel == channel => {
                self.in_flight = None;
                match result {
                    Ok(()) => {
                        debug!(%channel, "Notifications enabled");
                        self.report.subscribed.push(channel);
                    }
                    Err(err) => {
                        warn!(%channel, error = %err, "Descriptor write failed, continuing");
                        self.report.failed.push((channel, err));
                    }
                }
                self.advance()
            }
            Some(request) => {
                warn!(
                    %channel,
                    in_flight = %request.channel,
                    "Ignoring completion for a request that is not in flight"
                );
                SequencerStep::Waiting
            }
            None => {
                debug!(%channel, "Ignoring completion with no request in flight");
                SequencerStep::Waiting
            }
        }
    }

    /// Drop every queued and in-flight request.
    pub fn cancel(&mut self) {
        if self.in_flight.is_some() || !self.queue.is_empty() {
            debug!(
                dropped = self.queue.len() + usize::from(self.in_flight.is_some()),
                "Subscription handshake cancelled"
            );
        }
        self.queue.clear();
        self.in_flight = None;
        self.report = SubscriptionReport::default();
        self.active = false;
    }

    /// Request currently awaiting its completion callback.
    pub fn in_flight(&self) -> Option<&SubscriptionRequest> {
        self.in_flight.as_ref()
    }

    /// Requests not yet issued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether a handshake is running.
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn advance(&mut self) -> SequencerStep {
        debug_assert!(self.in_flight.is_none());
        match self.queue.pop_front() {
            Some(request) => {
                self.in_flight = Some(request);
                SequencerStep::Issue(request)
            }
            None => {
                self.active = false;
                SequencerStep::Ready(std::mem::take(&mut self.report))
            }
        }
    }
}
