//! Peer location session
//!
//! A direct link to one location of a remote peer. The session negotiates an
//! ICE socket session from the remote candidates, layers a messaging channel on
//! it and authenticates the peer with the identify handshake before any
//! application traffic is accepted.
//!
//! Outgoing sessions are created after a find reply and send the identify
//! themselves. Incoming sessions start from a find request relayed by the
//! finder and must receive a valid identify before progressing.

use core::mem;
use core::time::Duration;

use peerlink_core::wire::{PeerIdentifyRequest, PeerIdentifyResult, PeerLocationFindReply};
use peerlink_core::{
    Candidate, ChannelId, ChannelState, Completion, ErrorInfo, IceRole, IceSession,
    IceSessionState, KeepAliveProperties, LocationDescriptor, LocationId, Message,
    MessagingChannel, Method, MonitorHandle, PeerIdentity, Request, RequestBody, ResponseBody,
    Result, SessionState, ShutdownReason, SocketSubscription, Timestamp,
};
use tracing::{debug, info, trace, warn};

use crate::context::{run_stages, AccountNotice, SessionContext, SessionKey, Stage, StepResult};
use crate::timers::TimerId;

pub struct LocationSession {
    location_id: LocationId,
    state: SessionState,
    /// The peer this location is expected to belong to
    peer: PeerIdentity,
    remote: Option<LocationDescriptor>,
    incoming: bool,
    identify_time: Option<Timestamp>,
    should_refind: bool,
    last_activity: Option<Timestamp>,
    subscription: Option<SocketSubscription>,
    socket_woken: bool,
    queued_finds: Vec<Request>,
    ice: Option<Box<dyn IceSession>>,
    channel: Option<Box<dyn MessagingChannel>>,
    identify_monitor: Option<MonitorHandle>,
    keep_alive_monitor: Option<MonitorHandle>,
    identify_deadline: Option<TimerId>,
}

impl LocationSession {
    const STAGES: &'static [Stage<LocationSession>] = &[
        ("socket-subscription", LocationSession::step_socket_subscription),
        ("queued-finds", LocationSession::step_queued_finds),
        ("ice-session", LocationSession::step_ice_session),
        ("incoming-identify", LocationSession::step_incoming_identify),
        ("messaging-channel", LocationSession::step_messaging_channel),
        ("outgoing-identify", LocationSession::step_outgoing_identify),
    ];

    pub fn new(location_id: LocationId, peer: PeerIdentity) -> Self {
        Self {
            location_id,
            state: SessionState::Pending,
            peer,
            remote: None,
            incoming: false,
            identify_time: None,
            should_refind: false,
            last_activity: None,
            subscription: None,
            socket_woken: false,
            queued_finds: Vec::new(),
            ice: None,
            channel: None,
            identify_monitor: None,
            keep_alive_monitor: None,
            identify_deadline: None,
        }
    }

    /// Session toward a location learned from a find reply
    pub fn outgoing(remote: LocationDescriptor, peer: PeerIdentity) -> Self {
        let mut session = Self::new(remote.location_id.clone(), peer);
        session.remote = Some(remote);
        session
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::Location(self.location_id.clone())
    }

    pub fn location_id(&self) -> &LocationId {
        &self.location_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn remote(&self) -> Option<&LocationDescriptor> {
        self.remote.as_ref()
    }

    pub fn is_incoming(&self) -> bool {
        self.incoming
    }

    pub fn identify_time(&self) -> Option<Timestamp> {
        self.identify_time
    }

    /// Sticky request for the owner to re-run peer discovery
    pub fn should_refind(&self) -> bool {
        self.should_refind
    }

    pub fn last_activity(&self) -> Option<Timestamp> {
        self.last_activity
    }

    pub fn ice_id(&self) -> Option<ChannelId> {
        self.ice.as_ref().map(|ice| ice.id())
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|channel| channel.id())
    }

    pub fn queued_find_count(&self) -> usize {
        self.queued_finds.len()
    }

    // ------------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------------

    /// Create the ICE session toward the given remote candidates
    ///
    /// No-op while shutting down or without a local socket. An ICE session that
    /// is already connected is kept; one still negotiating is replaced.
    pub fn connect(&mut self, ctx: &mut SessionContext<'_>, candidates: &[Candidate], role: IceRole) {
        if self.state.is_shutting_down_or_shutdown() {
            return;
        }
        if self.subscription.is_none() {
            self.subscription = ctx.transport.subscribe_socket();
        }
        if self.subscription.is_none() {
            debug!(location = %self.location_id, "no local socket, connect ignored");
            return;
        }
        if self.ice.as_ref().is_some_and(|ice| ice.state().is_ready()) {
            trace!(location = %self.location_id, "ICE session already connected");
            return;
        }

        if let Some(mut stale) = self.ice.take() {
            debug!(location = %self.location_id, ice = %stale.id(), "replacing negotiating ICE session");
            if let Some(mut channel) = self.channel.take() {
                channel.shutdown();
            }
            if let Some(handle) = self.identify_monitor.take() {
                ctx.correlator.cancel(handle);
            }
            stale.shutdown();
        }

        match ctx.transport.create_session_from_candidates(candidates, role) {
            Some(mut ice) => {
                let location = &ctx.config.location;
                ice.set_keep_alive_properties(KeepAliveProperties {
                    send_indication_interval: location.send_indication_interval,
                    expect_data_interval: location.expect_data_interval,
                    backgrounding_timeout: location.backgrounding_timeout,
                });
                debug!(
                    location = %self.location_id,
                    ice = %ice.id(),
                    candidates = candidates.len(),
                    ?role,
                    "ICE session created"
                );
                self.ice = Some(ice);
            }
            None => {
                warn!(location = %self.location_id, "ICE session could not be created");
                self.cancel(ctx);
            }
        }
    }

    /// Buffer an inbound find request until the finder link can carry the reply
    pub fn queue_incoming_find(&mut self, ctx: &mut SessionContext<'_>, request: Request) {
        if self.state.is_shutting_down_or_shutdown() {
            return;
        }
        if !matches!(request.body, RequestBody::PeerLocationFind(_)) {
            debug!(location = %self.location_id, method = %request.method(), "not a find request");
            return;
        }
        self.incoming = true;
        self.arm_identify_deadline(ctx);
        self.queued_finds.push(request);
    }

    // ------------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------------

    /// Send a message to the remote location
    ///
    /// Before `Ready` only identify requests and results may pass.
    pub fn send(&mut self, now: Timestamp, message: &Message) -> bool {
        let allowed = match self.state {
            SessionState::Ready => true,
            SessionState::Pending => {
                message.method() == Method::PeerIdentify && !matches!(message, Message::Notify(_))
            }
            SessionState::ShuttingDown | SessionState::Shutdown => false,
        };
        if !allowed {
            trace!(location = %self.location_id, state = %self.state, method = %message.method(), "send rejected");
            return false;
        }
        self.write(now, message)
    }

    /// Send a request and monitor its result on behalf of `owner`
    ///
    /// A request that cannot be sent resolves as a synthetic send failure.
    pub fn send_request(
        &mut self,
        ctx: &mut SessionContext<'_>,
        owner: SessionKey,
        request: Request,
        timeout: Duration,
    ) -> Result<MonitorHandle> {
        let handle = ctx.correlator.monitor(owner, &request, timeout, ctx.now)?;
        if !self.send(ctx.now, &Message::Request(request)) {
            ctx.correlator.fail(handle, ErrorInfo::send_failed());
        }
        Ok(handle)
    }

    /// Put a message on the channel regardless of session state
    fn write(&mut self, now: Timestamp, message: &Message) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        if channel.state() != ChannelState::Connected {
            return false;
        }
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(location = %self.location_id, error = %err, "cannot encode message");
                return false;
            }
        };
        if !channel.send(&bytes) {
            return false;
        }
        self.last_activity = Some(now);
        true
    }

    // ------------------------------------------------------------------------
    // Step
    // ------------------------------------------------------------------------

    /// Reconcile toward `Ready`, or toward `Shutdown` once cancelled
    pub fn step(&mut self, ctx: &mut SessionContext<'_>) {
        match self.state {
            SessionState::Shutdown => {}
            SessionState::ShuttingDown => self.step_shutdown(ctx),
            SessionState::Pending | SessionState::Ready => {
                if run_stages(self, ctx, Self::STAGES) && self.state == SessionState::Pending {
                    info!(location = %self.location_id, incoming = self.incoming, "location session ready");
                    self.set_state(ctx, SessionState::Ready);
                }
            }
        }
    }

    fn step_socket_subscription(&mut self, ctx: &mut SessionContext<'_>) -> StepResult {
        if self.subscription.is_none() {
            match ctx.transport.subscribe_socket() {
                Some(subscription) => self.subscription = Some(subscription),
                None => {
                    warn!(location = %self.location_id, "no ICE socket available");
                    self.cancel(ctx);
                    return StepResult::Wait;
                }
            }
        }
        if !ctx.transport.is_socket_ready() {
            if !self.socket_woken {
                ctx.transport.wake_socket();
                self.socket_woken = true;
            }
            return StepResult::Wait;
        }
        self.socket_woken = false;
        StepResult::Continue
    }

    fn step_queued_finds(&mut self, ctx: &mut SessionContext<'_>) -> StepResult {
        if self.queued_finds.is_empty() {
            return StepResult::Continue;
        }
        if !ctx.is_finder_ready() {
            return StepResult::Wait;
        }

        let finds = mem::take(&mut self.queued_finds);
        let local = ctx.local_location();
        let peer_file = ctx.peer_files().public().clone();
        for request in &finds {
            let RequestBody::PeerLocationFind(find) = &request.body else {
                continue;
            };
            ctx.relay_outbox.push(Message::Notify(Request {
                domain: request.domain.clone(),
                id: request.id.clone(),
                body: RequestBody::PeerLocationFindReply(PeerLocationFindReply {
                    requester: find.location.location_id.clone(),
                    location: local.clone(),
                    peer_file: Some(peer_file.clone()),
                }),
            }));
        }
        debug!(location = %self.location_id, answered = finds.len(), "queued finds answered");

        // The newest request carries the freshest candidates
        if let Some(RequestBody::PeerLocationFind(find)) = finds.last().map(|request| &request.body) {
            self.remote = Some(find.location.clone());
            self.connect(ctx, &find.location.candidates, IceRole::Controlled);
        }

        if self.state.is_shutting_down_or_shutdown() {
            return StepResult::Wait;
        }
        StepResult::Continue
    }

    fn step_ice_session(&mut self, ctx: &mut SessionContext<'_>) -> StepResult {
        let Some(ice) = self.ice.as_ref() else {
            return StepResult::Wait;
        };
        match ice.state() {
            state if state.is_ready() => StepResult::Continue,
            IceSessionState::ShuttingDown | IceSessionState::Shutdown => {
                let reason = ice.shutdown_reason();
                self.transport_failed(ctx, "ICE session", reason);
                StepResult::Wait
            }
            _ => StepResult::Wait,
        }
    }

    fn step_incoming_identify(&mut self, _ctx: &mut SessionContext<'_>) -> StepResult {
        if !self.incoming || self.identify_time.is_some() {
            return StepResult::Continue;
        }
        StepResult::Wait
    }

    fn step_messaging_channel(&mut self, ctx: &mut SessionContext<'_>) -> StepResult {
        if self.channel.is_none() {
            if self.incoming {
                return StepResult::Wait;
            }
            let Some(ice) = self.ice.as_deref() else {
                return StepResult::Wait;
            };
            let opened = ctx
                .transport
                .open_channel(ice, &ctx.config.location.messaging_protocol);
            match opened {
                Some(channel) => {
                    debug!(location = %self.location_id, channel = %channel.id(), "messaging channel opened");
                    self.channel = Some(channel);
                }
                None => {
                    warn!(location = %self.location_id, "messaging channel could not be opened");
                    self.cancel(ctx);
                    return StepResult::Wait;
                }
            }
        }

        let Some(channel) = self.channel.as_ref() else {
            return StepResult::Wait;
        };
        match channel.state() {
            ChannelState::Connected => StepResult::Continue,
            ChannelState::Pending => StepResult::Wait,
            ChannelState::ShuttingDown | ChannelState::Shutdown => {
                let reason = channel.shutdown_reason();
                self.transport_failed(ctx, "messaging channel", reason);
                StepResult::Wait
            }
        }
    }

    fn step_outgoing_identify(&mut self, ctx: &mut SessionContext<'_>) -> StepResult {
        if self.incoming || self.identify_time.is_some() {
            return StepResult::Continue;
        }
        if self.identify_monitor.is_some() {
            return StepResult::Wait;
        }

        let request = Request::new(
            ctx.domain(),
            RequestBody::PeerIdentify(PeerIdentifyRequest {
                find_secret: self.peer.find_secret().cloned(),
                location: ctx.local_location(),
                peer_file: ctx.peer_files().public().clone(),
            }),
        );
        let timeout = ctx.config.location.identify_timeout;
        match self.send_request(ctx, self.key(), request, timeout) {
            Ok(handle) => {
                debug!(location = %self.location_id, "identify sent");
                self.identify_monitor = Some(handle);
            }
            Err(err) => {
                warn!(location = %self.location_id, error = %err, "cannot issue identify");
                self.cancel(ctx);
            }
        }
        StepResult::Wait
    }

    fn transport_failed(
        &mut self,
        ctx: &mut SessionContext<'_>,
        what: &str,
        reason: Option<ShutdownReason>,
    ) {
        if reason.is_some_and(ShutdownReason::warrants_refind) {
            self.should_refind = true;
        }
        warn!(
            location = %self.location_id,
            ?reason,
            should_refind = self.should_refind,
            "{} shut down",
            what
        );
        self.cancel(ctx);
    }

    // ------------------------------------------------------------------------
    // Transport Events
    // ------------------------------------------------------------------------

    /// The ICE session or messaging channel changed state
    pub fn handle_transport_change(&mut self, ctx: &mut SessionContext<'_>) {
        self.step(ctx);
    }

    /// Accept a messaging channel the remote side opened
    ///
    /// A channel arriving while another is installed replaces it if the
    /// installed one never connected. Otherwise the newcomer is closed without
    /// a reply and a keep-alive is sent on the installed channel.
    pub fn accept_incoming_channel(&mut self, ctx: &mut SessionContext<'_>) {
        let Some(ice) = self.ice.as_deref() else {
            return;
        };
        let Some(mut arriving) = ctx.transport.accept_channel(ice) else {
            return;
        };
        if self.state.is_shutting_down_or_shutdown() {
            arriving.shutdown();
            return;
        }

        match self.channel.as_ref().map(|channel| channel.state()) {
            None => {
                debug!(location = %self.location_id, channel = %arriving.id(), "incoming channel accepted");
                self.channel = Some(arriving);
            }
            Some(ChannelState::Connected) => {
                debug!(
                    location = %self.location_id,
                    dumped = %arriving.id(),
                    "second channel dumped, keeping the connected one"
                );
                arriving.shutdown();
                self.send_keep_alive(ctx);
            }
            Some(_) => {
                debug!(location = %self.location_id, channel = %arriving.id(), "incoming channel replaces unconnected one");
                if let Some(mut replaced) = self.channel.replace(arriving) {
                    replaced.shutdown();
                }
                if let Some(handle) = self.identify_monitor.take() {
                    ctx.correlator.cancel(handle);
                }
                self.incoming = true;
                self.arm_identify_deadline(ctx);
            }
        }
        self.step(ctx);
    }

    /// Dispatch one message received on the messaging channel
    pub fn handle_channel_data(&mut self, ctx: &mut SessionContext<'_>, data: &[u8]) {
        let message = match Message::decode(data) {
            Ok(message) => message,
            Err(err) => {
                warn!(location = %self.location_id, error = %err, "dropping undecodable message");
                return;
            }
        };
        if ctx.correlator.deliver(&message) {
            return;
        }

        let unauthenticated =
            self.identify_time.is_none() && (self.peer.peer_file.is_none() || self.incoming);

        match &message {
            Message::Request(request) => match &request.body {
                RequestBody::PeerIdentify(identify) => {
                    self.handle_identify_request(ctx, request, identify)
                }
                _ if unauthenticated => {
                    warn!(location = %self.location_id, method = %request.method(), "request before identify rejected");
                    let rejection = request.failure(ErrorInfo::forbidden(), ctx.now);
                    self.write(ctx.now, &Message::Result(rejection));
                }
                RequestBody::PeerKeepAlive(_) => {
                    let response =
                        request.success(ResponseBody::PeerKeepAlive(Default::default()), ctx.now);
                    self.write(ctx.now, &Message::Result(response));
                }
                _ => self.forward(ctx, message.clone()),
            },
            _ if unauthenticated => {
                warn!(location = %self.location_id, kind = message.kind(), "message before identify dropped");
            }
            _ => self.forward(ctx, message.clone()),
        }
    }

    fn forward(&mut self, ctx: &mut SessionContext<'_>, message: Message) {
        ctx.notify(AccountNotice::MessageIncoming {
            location: self.location_id.clone(),
            message,
        });
    }

    // ------------------------------------------------------------------------
    // Identify Handshake
    // ------------------------------------------------------------------------

    fn handle_identify_request(
        &mut self,
        ctx: &mut SessionContext<'_>,
        request: &Request,
        identify: &PeerIdentifyRequest,
    ) {
        if let Some(reason) = self.check_identify(ctx, identify) {
            warn!(location = %self.location_id, reason, "identify rejected");
            let rejection = request.failure(ErrorInfo::forbidden(), ctx.now);
            self.send(ctx.now, &Message::Result(rejection));
            return;
        }

        info!(location = %self.location_id, peer = %identify.peer_file.peer_uri, "peer identified");
        self.identify_time = Some(ctx.now);
        self.peer = PeerIdentity::from_peer_file(identify.peer_file.clone());
        self.remote = Some(identify.location.clone());
        if let Some(timer) = self.identify_deadline.take() {
            ctx.timers.cancel(timer);
        }

        let response = request.success(
            ResponseBody::PeerIdentify(PeerIdentifyResult {
                location: Some(ctx.identity.location.without_candidates()),
            }),
            ctx.now,
        );
        self.send(ctx.now, &Message::Result(response));
        self.step(ctx);
    }

    /// Reason the identify must be rejected, if any
    fn check_identify(
        &self,
        ctx: &SessionContext<'_>,
        identify: &PeerIdentifyRequest,
    ) -> Option<&'static str> {
        let secret_matches = identify
            .find_secret
            .as_ref()
            .is_some_and(|secret| secret.matches(ctx.peer_files().find_secret()));
        if !secret_matches {
            return Some("find secret mismatch");
        }
        if identify.peer_file.peer_uri != self.peer.peer_uri
            || identify.location.peer_uri != self.peer.peer_uri
        {
            return Some("peer URI mismatch");
        }
        if identify.peer_file.verify().is_err() {
            return Some("peer file does not verify");
        }
        None
    }

    // ------------------------------------------------------------------------
    // Completions and Timers
    // ------------------------------------------------------------------------

    pub fn handle_completion(&mut self, ctx: &mut SessionContext<'_>, completion: Completion<SessionKey>) {
        let handle = Some(completion.handle);

        if handle == self.identify_monitor {
            self.identify_monitor = None;
            match completion.outcome {
                Ok(ResponseBody::PeerIdentify(result)) => {
                    // The result must name the peer we identified to
                    let Some(location) = result
                        .location
                        .filter(|location| location.peer_uri == self.peer.peer_uri)
                    else {
                        warn!(location = %self.location_id, "identify result from unexpected peer");
                        self.cancel(ctx);
                        return;
                    };
                    info!(location = %self.location_id, "identify accepted by peer");
                    self.identify_time = Some(ctx.now);
                    self.remote = Some(location);
                    self.step(ctx);
                }
                Ok(other) => {
                    warn!(location = %self.location_id, method = %other.method(), "unexpected identify result");
                    self.cancel(ctx);
                }
                Err(error) => {
                    warn!(location = %self.location_id, %error, "identify failed");
                    self.cancel(ctx);
                }
            }
        } else if handle == self.keep_alive_monitor {
            self.keep_alive_monitor = None;
            match completion.outcome {
                Ok(_) => trace!(location = %self.location_id, "keep-alive acknowledged"),
                Err(error) => {
                    warn!(location = %self.location_id, %error, "keep-alive failed");
                    self.cancel(ctx);
                }
            }
        } else {
            trace!(location = %self.location_id, handle = %completion.handle, "obsolete completion ignored");
        }
    }

    pub fn on_timer(&mut self, ctx: &mut SessionContext<'_>, timer: TimerId) {
        if self.identify_deadline != Some(timer) {
            return;
        }
        self.identify_deadline = None;
        if self.identify_time.is_none() {
            warn!(location = %self.location_id, "incoming session never identified");
            self.cancel(ctx);
        }
    }

    fn arm_identify_deadline(&mut self, ctx: &mut SessionContext<'_>) {
        if self.identify_deadline.is_some() || self.identify_time.is_some() {
            return;
        }
        let deadline = ctx.config.location.incoming_identify_deadline;
        self.identify_deadline = Some(ctx.schedule(self.key(), deadline));
    }

    fn send_keep_alive(&mut self, ctx: &mut SessionContext<'_>) {
        if self.keep_alive_monitor.is_some() {
            return;
        }
        let request = Request::new(ctx.domain(), RequestBody::PeerKeepAlive(Default::default()));
        let timeout = ctx.config.location.keep_alive_timeout;
        let handle = match ctx.correlator.monitor(self.key(), &request, timeout, ctx.now) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(location = %self.location_id, error = %err, "cannot monitor keep-alive");
                return;
            }
        };
        if !self.write(ctx.now, &Message::Request(request)) {
            ctx.correlator.fail(handle, ErrorInfo::send_failed());
        }
        self.keep_alive_monitor = Some(handle);
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Begin a graceful shutdown; repeated calls only re-run the wind-down
    pub fn cancel(&mut self, ctx: &mut SessionContext<'_>) {
        match self.state {
            SessionState::Shutdown => return,
            SessionState::ShuttingDown => {
                self.step_shutdown(ctx);
                return;
            }
            SessionState::Pending | SessionState::Ready => {}
        }

        self.set_state(ctx, SessionState::ShuttingDown);

        for handle in [self.identify_monitor.take(), self.keep_alive_monitor.take()]
            .into_iter()
            .flatten()
        {
            ctx.correlator.cancel(handle);
        }
        if let Some(timer) = self.identify_deadline.take() {
            ctx.timers.cancel(timer);
        }
        if let Some(subscription) = self.subscription.take() {
            ctx.transport.unsubscribe_socket(subscription);
        }
        self.queued_finds.clear();

        if let Some(channel) = self.channel.as_mut() {
            if channel.state() != ChannelState::Shutdown {
                channel.shutdown();
            }
        }
        if let Some(ice) = self.ice.as_mut() {
            if ice.state() != IceSessionState::Shutdown {
                ice.shutdown();
            }
        }

        self.step_shutdown(ctx);
    }

    fn step_shutdown(&mut self, ctx: &mut SessionContext<'_>) {
        let channel_open = self
            .channel
            .as_ref()
            .is_some_and(|channel| channel.state() != ChannelState::Shutdown);
        let ice_open = self
            .ice
            .as_ref()
            .is_some_and(|ice| ice.state() != IceSessionState::Shutdown);
        if channel_open || ice_open {
            trace!(location = %self.location_id, channel_open, ice_open, "waiting for transport shutdown");
            return;
        }

        self.channel = None;
        self.ice = None;
        self.set_state(ctx, SessionState::Shutdown);
    }

    fn set_state(&mut self, ctx: &mut SessionContext<'_>, state: SessionState) {
        if !self.state.can_transition_to(state) {
            return;
        }
        debug!(location = %self.location_id, from = %self.state, to = %state, "location session state changed");
        self.state = state;
        ctx.notify(AccountNotice::SessionStateChanged {
            session: self.key(),
            state,
        });
    }
}

impl core::fmt::Debug for LocationSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocationSession")
            .field("location_id", &self.location_id)
            .field("state", &self.state)
            .field("peer", &self.peer.peer_uri)
            .field("incoming", &self.incoming)
            .field("identify_time", &self.identify_time)
            .field("should_refind", &self.should_refind)
            .field("ice", &self.ice_id())
            .field("channel", &self.channel_id())
            .finish_non_exhaustive()
    }
}
