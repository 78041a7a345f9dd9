//! Account-owned services lent to sessions
//!
//! Sessions hold no reference to their account. Every call into a session
//! receives a [`SessionContext`] borrowing the account's shared services for
//! the duration of that call, which keeps the account the single owner of
//! all state.

use core::fmt;
use core::time::Duration;

use peerlink_core::{
    IncomingRelayChannel, LocationDescriptor, LocationId, Message, MessageCorrelator, PeerFiles,
    SessionState, StackConfig, Timestamp, TransportProvider,
};
use tracing::trace;

use crate::finder::FinderRotation;
use crate::timers::{TimerId, TimerQueue};

// ----------------------------------------------------------------------------
// Session Keys
// ----------------------------------------------------------------------------

/// Non-owning reference to a session, resolved through the account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// The account itself, for requests it issues directly
    Account,
    Finder,
    Location(LocationId),
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Account => f.write_str("account"),
            SessionKey::Finder => f.write_str("finder"),
            SessionKey::Location(id) => write!(f, "location:{}", id),
        }
    }
}

// ----------------------------------------------------------------------------
// Account Notices
// ----------------------------------------------------------------------------

/// Notifications raised upward to the application
#[derive(Debug)]
pub enum AccountNotice {
    SessionStateChanged {
        session: SessionKey,
        state: SessionState,
    },
    /// Authenticated traffic no monitor was waiting for
    MessageIncoming {
        location: LocationId,
        message: Message,
    },
    /// A relay channel accepted through the finder
    IncomingRelayChannel(IncomingRelayChannel),
    /// A location session reached `Shutdown` and was released
    LocationClosed {
        location: LocationId,
        should_refind: bool,
    },
}

// ----------------------------------------------------------------------------
// Local Identity
// ----------------------------------------------------------------------------

/// The account's own identity and location
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub domain: String,
    pub peer_files: PeerFiles,
    pub location: LocationDescriptor,
}

impl LocalIdentity {
    pub fn new(domain: String, peer_files: PeerFiles) -> Self {
        let mut location =
            LocationDescriptor::new(LocationId::generate(), peer_files.peer_uri().clone());
        location.user_agent = concat!("peerlink/", env!("CARGO_PKG_VERSION")).to_string();
        location.os = std::env::consts::OS.to_string();
        location.system = std::env::consts::ARCH.to_string();
        Self {
            domain,
            peer_files,
            location,
        }
    }

    pub fn location_id(&self) -> &LocationId {
        &self.location.location_id
    }
}

// ----------------------------------------------------------------------------
// Session Context
// ----------------------------------------------------------------------------

/// Shared services borrowed into a session for one call
pub struct SessionContext<'a> {
    pub now: Timestamp,
    pub config: &'a StackConfig,
    pub identity: &'a LocalIdentity,
    pub transport: &'a mut dyn TransportProvider,
    pub correlator: &'a mut MessageCorrelator<SessionKey>,
    pub timers: &'a mut TimerQueue<SessionKey>,
    pub rotation: &'a mut FinderRotation,
    pub notices: &'a mut Vec<AccountNotice>,
    /// Messages to be delivered through the finder link
    pub relay_outbox: &'a mut Vec<Message>,
    pub finder_ready: bool,
}

impl<'a> SessionContext<'a> {
    pub fn domain(&self) -> &str {
        &self.identity.domain
    }

    pub fn peer_files(&self) -> &PeerFiles {
        &self.identity.peer_files
    }

    pub fn is_finder_ready(&self) -> bool {
        self.finder_ready
    }

    /// Local location advertising the transport's current candidates
    pub fn local_location(&self) -> LocationDescriptor {
        self.identity
            .location
            .with_candidates(self.transport.local_candidates())
    }

    pub fn schedule(&mut self, owner: SessionKey, after: Duration) -> TimerId {
        self.timers.schedule(owner, self.now + after)
    }

    pub fn notify(&mut self, notice: AccountNotice) {
        self.notices.push(notice);
    }
}

// ----------------------------------------------------------------------------
// Step Stages
// ----------------------------------------------------------------------------

/// Outcome of one reconciliation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Stage satisfied; evaluate the next one
    Continue,
    /// Stage not satisfied; stop until the session is woken again
    Wait,
}

/// Named guard evaluated in order by a session's step
pub type Stage<S> = (&'static str, fn(&mut S, &mut SessionContext<'_>) -> StepResult);

/// Evaluate `stages` in order; `true` when all of them are satisfied
pub fn run_stages<S>(session: &mut S, ctx: &mut SessionContext<'_>, stages: &[Stage<S>]) -> bool {
    for (name, stage) in stages {
        if stage(session, ctx) == StepResult::Wait {
            trace!(stage = *name, "step waiting");
            return false;
        }
    }
    true
}
