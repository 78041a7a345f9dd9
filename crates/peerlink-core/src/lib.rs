//! Peerlink Core
//!
//! Stable API definitions for the peerlink session layer: identifiers and
//! time, peer file identity material, the JSON wire protocol, configuration,
//! the transport interfaces sessions are driven through, and the message
//! correlator that matches requests to their results.
//!
//! The session engine itself lives in `peerlink-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod correlator;
pub mod errors;
pub mod identity;
pub mod transport;
pub mod types;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ChannelConfig, FinderConfig, LocationConfig, StackConfig};
pub use correlator::{Completion, CorrelatorStatistics, MessageCorrelator, MonitorHandle};
pub use errors::{
    CorrelatorError, IdentityError, PeerlinkError, PeerlinkResult, Result, SessionError,
    TransportError, WireError,
};
pub use identity::{contact_hash, PeerFilePrivate, PeerFilePublic, PeerFiles, PeerIdentity};
pub use transport::{
    relay_stream_pair, ChannelState, FinderLink, IceSession, IceSessionState,
    IncomingRelayChannel, KeepAliveProperties, MessagingChannel, RelayChannel, RelayStreamEnds,
    RelayStreams, ShutdownReason, SocketSubscription, TransportEvent, TransportProvider,
};
pub use types::{
    Candidate, CandidateClass, Candidates, ChannelId, FindSecret, FinderDescriptor,
    FinderProtocol, IceRole, LocationDescriptor, LocationId, MessageId, PeerUri,
    RelayChannelBinding, SessionState, SystemTimeSource, TimeSource, Timestamp,
};
pub use wire::{ErrorInfo, Message, Method, Request, RequestBody, Response, ResponseBody};
