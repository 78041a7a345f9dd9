//! Account aggregate
//!
//! The account owns every session of one local identity: at most one finder
//! session and a table of location sessions keyed by remote location id. It
//! also owns the services sessions share (transport provider, correlator,
//! timers, finder rotation) and lends them to a session for each call.
//!
//! All mutation happens on one logical thread. Transport callbacks, timers and
//! application commands are fed in one at a time; after each input the account
//! settles: completions are routed to their owners, relayed messages are
//! flushed through the finder and finished sessions are reaped.

use core::mem;

use hashbrown::HashMap;
use peerlink_core::wire::{PeerLocationFindReply, PeerLocationFindRequest};
use peerlink_core::{
    Completion, ErrorInfo, FindSecret, FinderDescriptor, IceRole, LocationId, Message, MessageId,
    MonitorHandle, PeerFiles, PeerIdentity, PeerUri, PeerlinkError, Request, RequestBody,
    ResponseBody, Result, SessionError, SessionState, StackConfig, Timestamp, TransportEvent,
    TransportProvider,
};
use peerlink_core::{ChannelId, MessageCorrelator};
use tracing::{debug, info, trace, warn};

use crate::context::{AccountNotice, LocalIdentity, SessionContext, SessionKey};
use crate::finder::{FinderRotation, FinderSession};
use crate::location::LocationSession;
use crate::timers::TimerQueue;

// ----------------------------------------------------------------------------
// Shared Services
// ----------------------------------------------------------------------------

/// Services owned by the account and lent to sessions
struct AccountShared {
    config: StackConfig,
    identity: LocalIdentity,
    transport: Box<dyn TransportProvider>,
    correlator: MessageCorrelator<SessionKey>,
    timers: TimerQueue<SessionKey>,
    rotation: FinderRotation,
    notices: Vec<AccountNotice>,
    relay_outbox: Vec<Message>,
}

impl AccountShared {
    fn context(&mut self, now: Timestamp, finder_ready: bool) -> SessionContext<'_> {
        SessionContext {
            now,
            config: &self.config,
            identity: &self.identity,
            transport: &mut *self.transport,
            correlator: &mut self.correlator,
            timers: &mut self.timers,
            rotation: &mut self.rotation,
            notices: &mut self.notices,
            relay_outbox: &mut self.relay_outbox,
            finder_ready,
        }
    }
}

/// An outstanding find issued by the account
#[derive(Debug, Clone)]
struct FindRequest {
    target: PeerUri,
    /// Presented in the identify sent to each replying location
    find_secret: Option<FindSecret>,
    handle: MonitorHandle,
    /// Replies arriving after this are ignored
    expires: Timestamp,
}

// ----------------------------------------------------------------------------
// Account
// ----------------------------------------------------------------------------

pub struct Account {
    shared: AccountShared,
    finder: Option<FinderSession>,
    locations: HashMap<LocationId, LocationSession>,
    finds: HashMap<MessageId, FindRequest>,
    finder_was_ready: bool,
    shutting_down: bool,
}

impl Account {
    pub fn new(
        config: StackConfig,
        peer_files: PeerFiles,
        transport: Box<dyn TransportProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let identity = LocalIdentity::new(config.domain.clone(), peer_files);
        info!(peer = %identity.peer_files.peer_uri(), location = %identity.location_id(), "account created");

        Ok(Self {
            shared: AccountShared {
                config,
                identity,
                transport,
                correlator: MessageCorrelator::new(),
                timers: TimerQueue::new(),
                rotation: FinderRotation::default(),
                notices: Vec::new(),
                relay_outbox: Vec::new(),
            },
            finder: None,
            locations: HashMap::new(),
            finds: HashMap::new(),
            finder_was_ready: false,
            shutting_down: false,
        })
    }

    pub fn config(&self) -> &StackConfig {
        &self.shared.config
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.shared.identity
    }

    pub fn peer_uri(&self) -> &PeerUri {
        self.shared.identity.peer_files.peer_uri()
    }

    pub fn finder(&self) -> Option<&FinderSession> {
        self.finder.as_ref()
    }

    pub fn is_finder_ready(&self) -> bool {
        self.finder.as_ref().is_some_and(FinderSession::is_ready)
    }

    pub fn location(&self, id: &LocationId) -> Option<&LocationSession> {
        self.locations.get(id)
    }

    pub fn locations(&self) -> impl Iterator<Item = &LocationSession> {
        self.locations.values()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Shutdown requested and every session has finished winding down
    pub fn is_shutdown(&self) -> bool {
        self.shutting_down
            && self.locations.is_empty()
            && self
                .finder
                .as_ref()
                .map_or(true, |finder| finder.state() == SessionState::Shutdown)
    }

    /// Earliest timer or request deadline
    pub fn next_deadline(&self) -> Option<Timestamp> {
        match (
            self.shared.timers.next_deadline(),
            self.shared.correlator.next_deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Notices raised since the last call
    pub fn take_notices(&mut self) -> Vec<AccountNotice> {
        mem::take(&mut self.shared.notices)
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    /// Create the finder session and start connecting
    pub fn start(&mut self, now: Timestamp) {
        if self.finder.is_none() && !self.shutting_down {
            self.finder = Some(FinderSession::new());
        }
        self.wake(now);
    }

    /// Replace the finder rotation
    pub fn set_finders(&mut self, now: Timestamp, finders: Vec<FinderDescriptor>) {
        debug!(count = finders.len(), "finder list updated");
        self.shared.rotation.replace(finders);
        self.wake(now);
    }

    /// Re-run every session's step
    pub fn wake(&mut self, now: Timestamp) {
        self.with_finder(now, |finder, ctx| finder.step(ctx));
        self.step_locations(now);
        self.settle(now);
    }

    pub fn handle_transport_event(&mut self, now: Timestamp, event: TransportEvent) {
        match event {
            TransportEvent::SocketStateChanged => self.step_locations(now),
            TransportEvent::FinderLinkStateChanged { link } => {
                if self.owns_finder_link(link) {
                    self.with_finder(now, |finder, ctx| finder.step(ctx));
                }
            }
            TransportEvent::FinderLinkData { link, data } => {
                if self.owns_finder_link(link) {
                    let unsolicited = self
                        .with_finder(now, |finder, ctx| finder.handle_link_data(ctx, &data))
                        .flatten();
                    if let Some(message) = unsolicited {
                        self.handle_finder_message(now, message);
                    }
                }
            }
            TransportEvent::FinderRelayRequested { link, binding } => {
                if self.owns_finder_link(link) {
                    self.with_finder(now, |finder, ctx| finder.handle_relay_request(ctx, binding));
                }
            }
            TransportEvent::IceSessionStateChanged { session } => {
                match self.location_by(|location| location.ice_id() == Some(session)) {
                    Some(id) => {
                        self.with_location(now, &id, |location, ctx| {
                            location.handle_transport_change(ctx)
                        });
                    }
                    None => trace!(ice = %session, "state change for unknown ICE session"),
                }
            }
            TransportEvent::IceChannelWaiting { session } => {
                match self.location_by(|location| location.ice_id() == Some(session)) {
                    Some(id) => {
                        self.with_location(now, &id, |location, ctx| {
                            location.accept_incoming_channel(ctx)
                        });
                    }
                    None => trace!(ice = %session, "channel waiting on unknown ICE session"),
                }
            }
            TransportEvent::ChannelStateChanged { channel } => {
                match self.location_by_channel(channel) {
                    Some(id) => {
                        self.with_location(now, &id, |location, ctx| {
                            location.handle_transport_change(ctx)
                        });
                    }
                    None => trace!(%channel, "state change for released channel"),
                }
            }
            TransportEvent::ChannelData { channel, data } => match self.location_by_channel(channel) {
                Some(id) => {
                    self.with_location(now, &id, |location, ctx| {
                        location.handle_channel_data(ctx, &data)
                    });
                }
                None => trace!(%channel, "data on released channel dropped"),
            },
        }
        self.settle(now);
    }

    /// Fire due timers and expire overdue requests
    pub fn handle_timers(&mut self, now: Timestamp) {
        self.shared.correlator.expire(now);
        for (timer, owner) in self.shared.timers.pop_due(now) {
            match owner {
                SessionKey::Finder => {
                    self.with_finder(now, |finder, ctx| finder.on_timer(ctx, timer));
                }
                SessionKey::Location(id) => {
                    self.with_location(now, &id, |location, ctx| location.on_timer(ctx, timer));
                }
                SessionKey::Account => {}
            }
        }
        self.finds.retain(|_, find| find.expires > now);
        self.settle(now);
    }

    /// Ask the finder for the locations of `target`
    ///
    /// Each reply creates an outgoing location session toward the replying
    /// location. `find_secret` is the target's published secret, if known.
    pub fn find_peer(
        &mut self,
        now: Timestamp,
        target: PeerUri,
        find_secret: Option<FindSecret>,
    ) -> Result<MessageId> {
        let finder_state = self.finder.as_ref().map(FinderSession::state);
        if self.shutting_down || finder_state != Some(SessionState::Ready) {
            return Err(SessionError::InvalidState {
                session: "finder".to_string(),
                expected: SessionState::Ready.to_string(),
                actual: finder_state.map_or("absent".to_string(), |state| state.to_string()),
            }
            .into());
        }

        let exclude_locations = self
            .locations
            .values()
            .filter(|location| location.peer().peer_uri == target)
            .map(|location| location.location_id().clone())
            .collect();

        let timeout = self.shared.config.finder.location_find_timeout;
        let mut ctx = self.shared.context(now, true);
        let request = Request::new(
            ctx.domain(),
            RequestBody::PeerLocationFind(PeerLocationFindRequest {
                target: target.clone(),
                find_secret: find_secret.clone(),
                location: ctx.local_location(),
                peer_file: Some(ctx.peer_files().public().clone()),
                exclude_locations,
            }),
        );
        let message_id = request.id.clone();

        let Some(finder) = self.finder.as_mut() else {
            return Err(PeerlinkError::session_not_found("finder"));
        };
        let handle = finder.send_request(&mut ctx, SessionKey::Account, request, timeout)?;
        info!(%target, %message_id, "finding peer");

        self.finds.insert(
            message_id.clone(),
            FindRequest {
                target,
                find_secret,
                handle,
                expires: now + timeout,
            },
        );
        self.settle(now);
        Ok(message_id)
    }

    /// Send an application message on an established location session
    pub fn send(&mut self, now: Timestamp, location: &LocationId, message: &Message) -> Result<bool> {
        let session = self
            .locations
            .get_mut(location)
            .ok_or_else(|| PeerlinkError::session_not_found(location.as_str()))?;
        Ok(session.send(now, message))
    }

    /// Cancel one location session
    pub fn close_location(&mut self, now: Timestamp, location: &LocationId) -> Result<()> {
        if !self.locations.contains_key(location) {
            return Err(PeerlinkError::session_not_found(location.as_str()));
        }
        self.with_location(now, location, |session, ctx| session.cancel(ctx));
        self.settle(now);
        Ok(())
    }

    /// Cancel every session; completion is observed through [`Account::is_shutdown`]
    pub fn shutdown(&mut self, now: Timestamp) {
        if !self.shutting_down {
            info!("account shutting down");
            self.shutting_down = true;
        }
        let ids: Vec<LocationId> = self.locations.keys().cloned().collect();
        for id in &ids {
            self.with_location(now, id, |location, ctx| location.cancel(ctx));
        }
        self.with_finder(now, |finder, ctx| finder.cancel(ctx));
        self.settle(now);
    }

    // ------------------------------------------------------------------------
    // Finder Traffic
    // ------------------------------------------------------------------------

    fn handle_finder_message(&mut self, now: Timestamp, message: Message) {
        match message {
            Message::Notify(Request {
                id,
                body: RequestBody::PeerLocationFindReply(reply),
                ..
            }) => self.handle_find_reply(now, id, reply),
            Message::Request(request) => {
                if matches!(request.body, RequestBody::PeerLocationFind(_)) {
                    self.handle_incoming_find(now, request);
                } else {
                    debug!(method = %request.method(), "unsupported request from finder");
                    self.reply_via_finder(request.failure(ErrorInfo::new(ErrorInfo::NOT_FOUND), now));
                }
            }
            other => trace!(method = %other.method(), kind = other.kind(), "unhandled finder message"),
        }
    }

    fn handle_find_reply(&mut self, now: Timestamp, id: MessageId, reply: PeerLocationFindReply) {
        let Some(find) = self.finds.get(&id) else {
            debug!(message_id = %id, "reply to unknown find");
            return;
        };
        let target = find.target.clone();
        let find_secret = find.find_secret.clone();

        if reply.location.peer_uri != target {
            warn!(%target, claimed = %reply.location.peer_uri, "find reply from unexpected peer");
            return;
        }
        let peer = match reply.peer_file {
            Some(peer_file) => {
                if peer_file.peer_uri != target || peer_file.verify().is_err() {
                    warn!(%target, "find reply carries an invalid peer file");
                    return;
                }
                PeerIdentity::from_peer_file(peer_file)
            }
            None => PeerIdentity::new(target),
        }
        .with_find_secret(find_secret);

        let location_id = reply.location.location_id.clone();
        if &location_id == self.shared.identity.location_id() {
            return;
        }
        if self.locations.contains_key(&location_id) {
            trace!(location = %location_id, "location session already exists");
            return;
        }

        debug!(location = %location_id, "creating outgoing location session");
        let candidates = reply.location.candidates.clone();
        let mut session = LocationSession::outgoing(reply.location, peer);
        let finder_ready = self.is_finder_ready();
        let mut ctx = self.shared.context(now, finder_ready);
        session.connect(&mut ctx, &candidates, IceRole::Controlling);
        session.step(&mut ctx);
        self.locations.insert(location_id, session);
    }

    fn handle_incoming_find(&mut self, now: Timestamp, request: Request) {
        let RequestBody::PeerLocationFind(find) = &request.body else {
            return;
        };
        let identity = &self.shared.identity;

        if &find.target != identity.peer_files.peer_uri() {
            debug!(target = %find.target, "find for another peer");
            self.reply_via_finder(request.failure(ErrorInfo::new(ErrorInfo::NOT_FOUND), now));
            return;
        }
        let secret_matches = find
            .find_secret
            .as_ref()
            .is_some_and(|secret| secret.matches(identity.peer_files.find_secret()));
        if !secret_matches {
            warn!(from = %find.location.peer_uri, "find with wrong secret rejected");
            self.reply_via_finder(request.failure(ErrorInfo::forbidden(), now));
            return;
        }
        if &find.location.location_id == identity.location_id()
            || find.exclude_locations.contains(identity.location_id())
        {
            trace!("find excludes this location");
            return;
        }

        let peer = match &find.peer_file {
            Some(peer_file)
                if peer_file.peer_uri == find.location.peer_uri && peer_file.verify().is_ok() =>
            {
                PeerIdentity::from_peer_file(peer_file.clone())
            }
            _ => PeerIdentity::new(find.location.peer_uri.clone()),
        };
        let location_id = find.location.location_id.clone();

        if !self.locations.contains_key(&location_id) {
            debug!(location = %location_id, "creating incoming location session");
            self.locations
                .insert(location_id.clone(), LocationSession::new(location_id.clone(), peer));
        }
        self.with_location(now, &location_id, |location, ctx| {
            location.queue_incoming_find(ctx, request);
            location.step(ctx);
        });
    }

    fn handle_find_completion(&mut self, completion: Completion<SessionKey>) {
        let Some(find) = self.finds.get(&completion.message_id) else {
            trace!(message_id = %completion.message_id, "completion for forgotten find");
            return;
        };
        if find.handle != completion.handle {
            return;
        }
        match completion.outcome {
            Ok(ResponseBody::PeerLocationFind(result)) => {
                debug!(target = %find.target, locations = result.locations.len(), "find completed");
            }
            Ok(_) => {}
            Err(error) => {
                debug!(target = %find.target, %error, "find failed");
                self.finds.remove(&completion.message_id);
            }
        }
    }

    fn reply_via_finder(&mut self, response: peerlink_core::Response) {
        let message = Message::Result(response);
        let sent = self
            .finder
            .as_mut()
            .is_some_and(|finder| finder.send(&message));
        if !sent {
            debug!(message_id = %message.id(), "finder reply dropped");
        }
    }

    // ------------------------------------------------------------------------
    // Settling
    // ------------------------------------------------------------------------

    /// Route completions, maintain the finder, flush relayed messages and reap
    /// finished sessions until nothing changes
    fn settle(&mut self, now: Timestamp) {
        loop {
            let mut progressed = false;

            while let Some(completion) = self.shared.correlator.pop_ready() {
                progressed = true;
                self.route_completion(now, completion);
            }
            progressed |= self.maintain_finder(now);
            self.flush_relay_outbox();
            progressed |= self.reap_locations();

            if !progressed {
                break;
            }
        }
    }

    fn route_completion(&mut self, now: Timestamp, completion: Completion<SessionKey>) {
        match completion.owner.clone() {
            SessionKey::Account => self.handle_find_completion(completion),
            SessionKey::Finder => {
                if self.finder.is_none() {
                    trace!(handle = %completion.handle, "finder gone, completion skipped");
                }
                self.with_finder(now, |finder, ctx| finder.handle_completion(ctx, completion));
            }
            SessionKey::Location(id) => {
                if !self.locations.contains_key(&id) {
                    trace!(location = %id, handle = %completion.handle, "owner gone, completion skipped");
                    return;
                }
                self.with_location(now, &id, |location, ctx| {
                    location.handle_completion(ctx, completion)
                });
            }
        }
    }

    /// Replace a finished finder and wake locations when readiness flips
    fn maintain_finder(&mut self, now: Timestamp) -> bool {
        let mut progressed = false;

        let finished = self
            .finder
            .as_ref()
            .is_some_and(|finder| finder.state() == SessionState::Shutdown);
        if finished && !self.shutting_down {
            info!("finder session ended, rotating");
            self.finder = Some(FinderSession::new());
            self.with_finder(now, |finder, ctx| finder.step(ctx));
            progressed = true;
        }

        let ready = self.is_finder_ready();
        if ready != self.finder_was_ready {
            self.finder_was_ready = ready;
            self.step_locations(now);
            progressed = true;
        }
        progressed
    }

    fn flush_relay_outbox(&mut self) {
        if self.shared.relay_outbox.is_empty() {
            return;
        }
        let outbox = mem::take(&mut self.shared.relay_outbox);
        for message in outbox {
            let sent = self
                .finder
                .as_mut()
                .is_some_and(|finder| finder.send(&message));
            if !sent {
                debug!(message_id = %message.id(), method = %message.method(), "relayed message dropped");
            }
        }
    }

    fn reap_locations(&mut self) -> bool {
        let finished: Vec<LocationId> = self
            .locations
            .iter()
            .filter(|(_, location)| location.state() == SessionState::Shutdown)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &finished {
            if let Some(location) = self.locations.remove(id) {
                let key = location.key();
                self.shared.correlator.cancel_owner(&key);
                self.shared.timers.cancel_owner(&key);
                info!(location = %id, should_refind = location.should_refind(), "location session released");
                self.shared.notices.push(AccountNotice::LocationClosed {
                    location: id.clone(),
                    should_refind: location.should_refind(),
                });
            }
        }
        !finished.is_empty()
    }

    // ------------------------------------------------------------------------
    // Session Access
    // ------------------------------------------------------------------------

    fn with_finder<R>(
        &mut self,
        now: Timestamp,
        f: impl FnOnce(&mut FinderSession, &mut SessionContext<'_>) -> R,
    ) -> Option<R> {
        let finder_ready = self.is_finder_ready();
        let finder = self.finder.as_mut()?;
        let mut ctx = self.shared.context(now, finder_ready);
        Some(f(finder, &mut ctx))
    }

    fn with_location<R>(
        &mut self,
        now: Timestamp,
        id: &LocationId,
        f: impl FnOnce(&mut LocationSession, &mut SessionContext<'_>) -> R,
    ) -> Option<R> {
        let finder_ready = self.is_finder_ready();
        let location = self.locations.get_mut(id)?;
        let mut ctx = self.shared.context(now, finder_ready);
        Some(f(location, &mut ctx))
    }

    fn step_locations(&mut self, now: Timestamp) {
        let ids: Vec<LocationId> = self.locations.keys().cloned().collect();
        for id in &ids {
            self.with_location(now, id, |location, ctx| location.step(ctx));
        }
    }

    fn owns_finder_link(&self, link: ChannelId) -> bool {
        let owned = self
            .finder
            .as_ref()
            .and_then(FinderSession::link_id)
            .is_some_and(|id| id == link);
        if !owned {
            trace!(%link, "event for unknown finder link");
        }
        owned
    }

    fn location_by(&self, predicate: impl Fn(&LocationSession) -> bool) -> Option<LocationId> {
        self.locations
            .values()
            .find(|location| predicate(location))
            .map(|location| location.location_id().clone())
    }

    fn location_by_channel(&self, channel: ChannelId) -> Option<LocationId> {
        self.location_by(|location| location.channel_id() == Some(channel))
    }
}

impl core::fmt::Debug for Account {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Account")
            .field("peer", self.peer_uri())
            .field("finder", &self.finder)
            .field("locations", &self.locations.len())
            .field("shutting_down", &self.shutting_down)
            .finish_non_exhaustive()
    }
}
