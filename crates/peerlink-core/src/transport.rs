//! Transport abstraction for the session layer
//!
//! The ICE socket, its socket sessions, the reliable messaging channels layered
//! on top and the TCP link to the finder all live outside this crate. Sessions
//! see them through the traits below: every call returns immediately, and state
//! changes are reported back as [`TransportEvent`]s that wake the owning account.
//! Sessions then query the handles for their current state.

use core::fmt;
use core::time::Duration;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::types::{Candidate, Candidates, ChannelId, IceRole, RelayChannelBinding};

/// Bound on queued relay chunks in each direction
pub const RELAY_STREAM_BUFFER: usize = 64;

// ----------------------------------------------------------------------------
// Transport States
// ----------------------------------------------------------------------------

/// State of an ICE socket session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IceSessionState {
    Pending,
    Searching,
    Nominated,
    Completed,
    ShuttingDown,
    Shutdown,
}

impl IceSessionState {
    /// Connectivity established; channels can be opened
    pub fn is_ready(self) -> bool {
        matches!(self, IceSessionState::Nominated | IceSessionState::Completed)
    }
}

/// State of a messaging channel or of the finder link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelState {
    Pending,
    Connected,
    ShuttingDown,
    Shutdown,
}

/// Why a transport object shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownReason {
    /// Closed on request of either side
    Closed,
    /// No data arrived within the expected interval
    Timeout,
    /// Application was backgrounded for too long
    BackgroundingTimeout,
    /// Connectivity checks or connection attempt failed
    ConnectionFailure,
}

impl ShutdownReason {
    /// Reasons after which peer discovery should be retried
    pub fn warrants_refind(self) -> bool {
        matches!(self, ShutdownReason::Timeout | ShutdownReason::BackgroundingTimeout)
    }
}

/// Keep-alive timing applied to an ICE socket session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveProperties {
    pub send_indication_interval: Duration,
    pub expect_data_interval: Duration,
    pub backgrounding_timeout: Duration,
}

// ----------------------------------------------------------------------------
// Transport Handles
// ----------------------------------------------------------------------------

/// ICE-negotiated socket session with one remote location
pub trait IceSession: Send {
    fn id(&self) -> ChannelId;

    fn state(&self) -> IceSessionState;

    /// Set once the session reaches [`IceSessionState::Shutdown`]
    fn shutdown_reason(&self) -> Option<ShutdownReason>;

    fn set_keep_alive_properties(&mut self, properties: KeepAliveProperties);

    /// Begin a graceful shutdown; completion is reported by a state change
    fn shutdown(&mut self);
}

/// Reliable ordered messaging channel layered over an ICE session
pub trait MessagingChannel: Send {
    fn id(&self) -> ChannelId;

    fn state(&self) -> ChannelState;

    fn shutdown_reason(&self) -> Option<ShutdownReason>;

    /// Queue one framed message; `false` if the channel cannot take it
    fn send(&mut self, bytes: &[u8]) -> bool;

    /// Begin a graceful shutdown; completion is reported by a state change
    fn shutdown(&mut self);
}

/// Relayed channel through the finder, used when direct ICE fails
pub trait RelayChannel: Send {
    fn channel_number(&self) -> u32;

    fn shutdown(&mut self);
}

/// Connection from the account to its finder
pub trait FinderLink: Send {
    fn id(&self) -> ChannelId;

    fn state(&self) -> ChannelState;

    fn send(&mut self, bytes: &[u8]) -> bool;

    /// Accept an inbound relay request, binding it to the given stream ends
    fn accept_relay(
        &mut self,
        binding: &RelayChannelBinding,
        ends: RelayStreamEnds,
    ) -> Option<Box<dyn RelayChannel>>;

    /// Begin a graceful shutdown; completion is reported by a state change
    fn shutdown(&mut self);
}

/// Handle to a subscription on the shared ICE socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketSubscription(pub u64);

// ----------------------------------------------------------------------------
// Transport Provider
// ----------------------------------------------------------------------------

/// Factory for every transport object a session needs
///
/// The ICE socket itself is shared by all locations of the account; sessions
/// only subscribe to it and create their own socket sessions from it.
pub trait TransportProvider: Send {
    /// Subscribe to readiness of the shared ICE socket; `None` if there is no socket
    fn subscribe_socket(&mut self) -> Option<SocketSubscription>;

    fn unsubscribe_socket(&mut self, subscription: SocketSubscription);

    fn is_socket_ready(&self) -> bool;

    /// Ask the socket to (re)gather candidates; readiness is reported later
    fn wake_socket(&mut self);

    /// Candidates of the local location
    fn local_candidates(&self) -> Candidates;

    fn create_session_from_candidates(
        &mut self,
        candidates: &[Candidate],
        role: IceRole,
    ) -> Option<Box<dyn IceSession>>;

    fn open_channel(
        &mut self,
        session: &dyn IceSession,
        protocol_tag: &str,
    ) -> Option<Box<dyn MessagingChannel>>;

    /// Accept a channel the remote side opened on `session`
    fn accept_channel(&mut self, session: &dyn IceSession) -> Option<Box<dyn MessagingChannel>>;

    fn connect_finder(&mut self, endpoint: SocketAddr) -> Option<Box<dyn FinderLink>>;
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Callbacks from the transport layer, delivered to the account actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SocketStateChanged,
    FinderLinkStateChanged {
        link: ChannelId,
    },
    FinderLinkData {
        link: ChannelId,
        data: Vec<u8>,
    },
    FinderRelayRequested {
        link: ChannelId,
        binding: RelayChannelBinding,
    },
    IceSessionStateChanged {
        session: ChannelId,
    },
    /// The remote side opened a messaging channel that awaits acceptance
    IceChannelWaiting {
        session: ChannelId,
    },
    ChannelStateChanged {
        channel: ChannelId,
    },
    ChannelData {
        channel: ChannelId,
        data: Vec<u8>,
    },
}

// ----------------------------------------------------------------------------
// Relay Streams
// ----------------------------------------------------------------------------

/// Stream ends handed to the transport when a relay channel is accepted
#[derive(Debug)]
pub struct RelayStreamEnds {
    /// Bytes the application wants relayed to the remote party
    pub outgoing: mpsc::Receiver<Vec<u8>>,
    /// Bytes the transport received from the remote party
    pub incoming: mpsc::Sender<Vec<u8>>,
}

/// Stream ends kept by the application side of a relay channel
#[derive(Debug)]
pub struct RelayStreams {
    pub receive: mpsc::Receiver<Vec<u8>>,
    pub send: mpsc::Sender<Vec<u8>>,
}

/// Create the paired receive/send streams for one relay channel
pub fn relay_stream_pair(buffer: usize) -> (RelayStreamEnds, RelayStreams) {
    let (send, outgoing) = mpsc::channel(buffer);
    let (incoming, receive) = mpsc::channel(buffer);
    (RelayStreamEnds { outgoing, incoming }, RelayStreams { receive, send })
}

/// A relay channel accepted by the finder session, handed to the account
pub struct IncomingRelayChannel {
    pub binding: RelayChannelBinding,
    pub channel: Box<dyn RelayChannel>,
    pub streams: RelayStreams,
}

impl IncomingRelayChannel {
    pub fn channel_number(&self) -> u32 {
        self.binding.channel_number
    }
}

impl fmt::Debug for IncomingRelayChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRelayChannel")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refind_reasons() {
        assert!(ShutdownReason::Timeout.warrants_refind());
        assert!(ShutdownReason::BackgroundingTimeout.warrants_refind());
        assert!(!ShutdownReason::Closed.warrants_refind());
        assert!(!ShutdownReason::ConnectionFailure.warrants_refind());
    }

    #[test]
    fn test_ice_ready_states() {
        assert!(!IceSessionState::Searching.is_ready());
        assert!(IceSessionState::Nominated.is_ready());
        assert!(IceSessionState::Completed.is_ready());
        assert!(!IceSessionState::Shutdown.is_ready());
    }

    #[test]
    fn test_relay_stream_pair_is_crossed() {
        let (mut ends, mut streams) = relay_stream_pair(4);

        streams.send.try_send(b"to-remote".to_vec()).unwrap();
        assert_eq!(ends.outgoing.try_recv().unwrap(), b"to-remote".to_vec());

        ends.incoming.try_send(b"from-remote".to_vec()).unwrap();
        assert_eq!(streams.receive.try_recv().unwrap(), b"from-remote".to_vec());
    }
}
