//! Finder session
//!
//! The account's connection to its rendezvous server. The session connects to
//! the next usable finder from the account's rotation, creates a server-side
//! session carrying the local peer file, keeps it alive ahead of the server's
//! expiry and deletes it on shutdown. It also accepts relay channels the finder
//! offers when a direct connection between two locations is impossible.

use core::time::Duration;

use peerlink_core::wire::{SessionCreateRequest, SessionDeleteRequest};
use peerlink_core::{
    relay_stream_pair, ChannelId, ChannelState, Completion, ErrorInfo, FinderConfig,
    FinderDescriptor, FinderLink, IncomingRelayChannel, Message, MonitorHandle, RelayChannelBinding,
    Request, RequestBody, ResponseBody, Result, SessionState, Timestamp,
};
use tracing::{debug, info, trace, warn};

use crate::context::{run_stages, AccountNotice, SessionContext, SessionKey, Stage, StepResult};
use crate::timers::TimerId;

// ----------------------------------------------------------------------------
// Finder Rotation
// ----------------------------------------------------------------------------

/// Caller-supplied finder list, tried in turn
///
/// Each descriptor is offered at most once per pass. A pass ends when every
/// descriptor has been tried; [`FinderRotation::reset`] starts a new one.
#[derive(Debug, Default, Clone)]
pub struct FinderRotation {
    finders: Vec<FinderDescriptor>,
    cursor: usize,
    tried: usize,
}

impl FinderRotation {
    pub fn new(finders: Vec<FinderDescriptor>) -> Self {
        Self {
            finders,
            cursor: 0,
            tried: 0,
        }
    }

    /// Replace the list and start a fresh pass
    pub fn replace(&mut self, finders: Vec<FinderDescriptor>) {
        *self = Self::new(finders);
    }

    pub fn reset(&mut self) {
        self.tried = 0;
    }

    /// Next descriptor valid at `now` and carrying an endpoint
    pub fn next(&mut self, now: Timestamp) -> Option<FinderDescriptor> {
        while self.tried < self.finders.len() {
            let candidate = &self.finders[self.cursor % self.finders.len()];
            self.cursor = (self.cursor + 1) % self.finders.len();
            self.tried += 1;

            if candidate.is_valid_at(now) && candidate.primary_endpoint().is_some() {
                return Some(candidate.clone());
            }
            trace!(finder = %candidate.finder_id, "skipping unusable finder");
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.finders.len()
    }
}

// ----------------------------------------------------------------------------
// Keep-alive Scheduling
// ----------------------------------------------------------------------------

/// Delay until the next keep-alive for a session expiring at `expires`
///
/// The remaining lifetime is floored at `min_keep_alive_deadline` before the
/// margin is taken off, so the delay never drops below the floor minus the margin.
pub fn keep_alive_delay(
    expires: Option<Timestamp>,
    now: Timestamp,
    config: &FinderConfig,
) -> Duration {
    let remaining = expires.map(|at| at - now).unwrap_or_default();
    remaining
        .max(config.min_keep_alive_deadline)
        .saturating_sub(config.keep_alive_margin)
}

// ----------------------------------------------------------------------------
// Finder Session
// ----------------------------------------------------------------------------

pub struct FinderSession {
    state: SessionState,
    finder: Option<FinderDescriptor>,
    link: Option<Box<dyn FinderLink>>,
    session_created: bool,
    server_agent: Option<String>,
    expires: Option<Timestamp>,
    create_monitor: Option<MonitorHandle>,
    keep_alive_monitor: Option<MonitorHandle>,
    delete_monitor: Option<MonitorHandle>,
    keep_alive_timer: Option<TimerId>,
}

impl FinderSession {
    const STAGES: &'static [Stage<FinderSession>] = &[
        ("connection", FinderSession::step_connection),
        ("session-create", FinderSession::step_session_create),
    ];

    pub fn new() -> Self {
        Self {
            state: SessionState::Pending,
            finder: None,
            link: None,
            session_created: false,
            server_agent: None,
            expires: None,
            create_monitor: None,
            keep_alive_monitor: None,
            delete_monitor: None,
            keep_alive_timer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn finder(&self) -> Option<&FinderDescriptor> {
        self.finder.as_ref()
    }

    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    /// Server-side expiry of the session, if known
    pub fn expires(&self) -> Option<Timestamp> {
        self.expires
    }

    pub fn link_id(&self) -> Option<ChannelId> {
        self.link.as_ref().map(|link| link.id())
    }

    pub fn keep_alive_timer(&self) -> Option<TimerId> {
        self.keep_alive_timer
    }

    // ------------------------------------------------------------------------
    // Connect and Send
    // ------------------------------------------------------------------------

    /// Open a link to the next finder in the rotation
    ///
    /// Without a usable descriptor the session stays `Pending` until woken.
    pub fn connect(&mut self, ctx: &mut SessionContext<'_>) {
        if self.state.is_shutting_down_or_shutdown() || self.link.is_some() {
            return;
        }

        let Some(finder) = ctx.rotation.next(ctx.now) else {
            debug!("no usable finder available, waiting");
            return;
        };
        let Some(endpoint) = finder.primary_endpoint() else {
            return;
        };

        info!(finder = %finder.finder_id, %endpoint, "connecting to finder");
        match ctx.transport.connect_finder(endpoint) {
            Some(link) => {
                self.link = Some(link);
                self.finder = Some(finder);
            }
            None => {
                warn!(finder = %finder.finder_id, %endpoint, "finder unreachable");
                self.finder = Some(finder);
                self.cancel(ctx);
            }
        }
    }

    /// Put a message on the finder link
    ///
    /// Before `Ready` only an outgoing session-create (or a session-delete while
    /// shutting down) may pass.
    pub fn send(&mut self, message: &Message) -> bool {
        let allowed = match (self.state, message) {
            (SessionState::Ready, _) => true,
            (SessionState::Pending, Message::Request(request)) => {
                matches!(request.body, RequestBody::SessionCreate(_))
            }
            (SessionState::ShuttingDown, Message::Request(request)) => {
                matches!(request.body, RequestBody::SessionDelete(_))
            }
            _ => false,
        };
        if !allowed {
            trace!(state = %self.state, method = %message.method(), "finder send rejected");
            return false;
        }

        let Some(link) = self.link.as_mut() else {
            return false;
        };
        if link.state() != ChannelState::Connected {
            return false;
        }
        match message.encode() {
            Ok(bytes) => link.send(&bytes),
            Err(err) => {
                warn!(error = %err, "cannot encode finder message");
                false
            }
        }
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
        if !self.send(&Message::Request(request)) {
            ctx.correlator.fail(handle, ErrorInfo::send_failed());
        }
        Ok(handle)
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
                    ctx.rotation.reset();
                    self.set_state(ctx, SessionState::Ready);
                }
            }
        }
    }

    fn step_connection(&mut self, ctx: &mut SessionContext<'_>) -> StepResult {
        if self.link.is_none() {
            self.connect(ctx);
        }
        let Some(link) = self.link.as_ref() else {
            return StepResult::Wait;
        };
        match link.state() {
            ChannelState::Connected => StepResult::Continue,
            ChannelState::Pending => StepResult::Wait,
            ChannelState::ShuttingDown | ChannelState::Shutdown => {
                warn!("finder link lost");
                self.cancel(ctx);
                StepResult::Wait
            }
        }
    }

    fn step_session_create(&mut self, ctx: &mut SessionContext<'_>) -> StepResult {
        if self.session_created {
            return StepResult::Continue;
        }
        if self.create_monitor.is_some() {
            return StepResult::Wait;
        }

        let finder_id = self
            .finder
            .as_ref()
            .map(|finder| finder.finder_id.clone())
            .unwrap_or_default();
        let request = Request::new(
            ctx.domain(),
            RequestBody::SessionCreate(SessionCreateRequest {
                finder_id,
                location: ctx.local_location(),
                peer_file: ctx.peer_files().public().clone(),
            }),
        );
        let timeout = ctx.config.finder.session_create_timeout;
        match self.send_request(ctx, SessionKey::Finder, request, timeout) {
            Ok(handle) => self.create_monitor = Some(handle),
            Err(err) => {
                warn!(error = %err, "cannot issue session create");
                self.cancel(ctx);
            }
        }
        StepResult::Wait
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Route a decoded result; returns the message if no monitor claimed it
    pub fn handle_link_data(&mut self, ctx: &mut SessionContext<'_>, data: &[u8]) -> Option<Message> {
        let message = match Message::decode(data) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping undecodable finder message");
                return None;
            }
        };
        if ctx.correlator.deliver(&message) {
            return None;
        }
        if message.as_response().is_some() {
            trace!(message_id = %message.id(), "obsolete finder result ignored");
            return None;
        }
        Some(message)
    }

    /// Accept a relay channel and hand it to the account with its streams
    pub fn handle_relay_request(&mut self, ctx: &mut SessionContext<'_>, binding: RelayChannelBinding) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if self.state.is_shutting_down_or_shutdown() {
            debug!(channel = binding.channel_number, "ignoring relay request while shutting down");
            return;
        }

        let (ends, streams) = relay_stream_pair(peerlink_core::transport::RELAY_STREAM_BUFFER);
        match link.accept_relay(&binding, ends) {
            Some(channel) => {
                debug!(channel = binding.channel_number, "relay channel accepted");
                ctx.notify(AccountNotice::IncomingRelayChannel(IncomingRelayChannel {
                    binding,
                    channel,
                    streams,
                }));
            }
            None => warn!(channel = binding.channel_number, "relay channel could not be accepted"),
        }
    }

    pub fn handle_completion(&mut self, ctx: &mut SessionContext<'_>, completion: Completion<SessionKey>) {
        let handle = Some(completion.handle);

        if handle == self.create_monitor {
            self.create_monitor = None;
            match completion.outcome {
                Ok(ResponseBody::SessionCreate(result)) => {
                    info!(server_agent = %result.server_agent, expires = ?result.expires, "finder session created");
                    self.session_created = true;
                    self.server_agent = Some(result.server_agent);
                    self.schedule_keep_alive(ctx, result.expires);
                    self.step(ctx);
                }
                Ok(other) => {
                    warn!(method = %other.method(), "unexpected session create result");
                    self.cancel(ctx);
                }
                Err(error) => {
                    warn!(%error, "session create failed");
                    self.cancel(ctx);
                }
            }
        } else if handle == self.keep_alive_monitor {
            self.keep_alive_monitor = None;
            match completion.outcome {
                Ok(ResponseBody::SessionKeepAlive(result)) => {
                    trace!(expires = ?result.expires, "finder keep-alive acknowledged");
                    self.schedule_keep_alive(ctx, result.expires);
                }
                Ok(_) => self.cancel(ctx),
                Err(error) => {
                    warn!(%error, "finder keep-alive failed");
                    self.cancel(ctx);
                }
            }
        } else if handle == self.delete_monitor {
            self.delete_monitor = None;
            if let Err(error) = completion.outcome {
                debug!(%error, "session delete unanswered");
            }
            self.step(ctx);
        } else {
            trace!(handle = %completion.handle, "obsolete finder completion ignored");
        }
    }

    pub fn on_timer(&mut self, ctx: &mut SessionContext<'_>, timer: TimerId) {
        if self.keep_alive_timer != Some(timer) {
            return;
        }
        self.keep_alive_timer = None;
        if self.state != SessionState::Ready || self.keep_alive_monitor.is_some() {
            return;
        }

        let request = Request::new(ctx.domain(), RequestBody::SessionKeepAlive(Default::default()));
        let timeout = ctx.config.finder.keep_alive_timeout;
        match self.send_request(ctx, SessionKey::Finder, request, timeout) {
            Ok(handle) => self.keep_alive_monitor = Some(handle),
            Err(err) => {
                warn!(error = %err, "cannot issue finder keep-alive");
                self.cancel(ctx);
            }
        }
    }

    fn schedule_keep_alive(&mut self, ctx: &mut SessionContext<'_>, expires: Option<u64>) {
        if let Some(timer) = self.keep_alive_timer.take() {
            ctx.timers.cancel(timer);
        }
        if self.state.is_shutting_down_or_shutdown() {
            return;
        }
        self.expires = expires.map(Timestamp::from_secs);
        let delay = keep_alive_delay(self.expires, ctx.now, &ctx.config.finder);
        debug!(delay_secs = delay.as_secs(), "finder keep-alive scheduled");
        self.keep_alive_timer = Some(ctx.schedule(SessionKey::Finder, delay));
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

        let was_created = self.session_created;
        self.set_state(ctx, SessionState::ShuttingDown);

        if let Some(timer) = self.keep_alive_timer.take() {
            ctx.timers.cancel(timer);
        }
        for handle in [self.create_monitor.take(), self.keep_alive_monitor.take()]
            .into_iter()
            .flatten()
        {
            ctx.correlator.cancel(handle);
        }

        if was_created {
            let request = Request::new(
                ctx.domain(),
                RequestBody::SessionDelete(SessionDeleteRequest {
                    location_id: ctx.identity.location_id().clone(),
                }),
            );
            let timeout = ctx.config.finder.session_delete_timeout;
            match self.send_request(ctx, SessionKey::Finder, request, timeout) {
                Ok(handle) => self.delete_monitor = Some(handle),
                Err(err) => debug!(error = %err, "skipping session delete"),
            }
        }

        self.step_shutdown(ctx);
    }

    fn step_shutdown(&mut self, ctx: &mut SessionContext<'_>) {
        if self.delete_monitor.is_some() {
            trace!("waiting for session delete");
            return;
        }
        if let Some(mut link) = self.link.take() {
            link.shutdown();
        }
        self.set_state(ctx, SessionState::Shutdown);
    }

    fn set_state(&mut self, ctx: &mut SessionContext<'_>, state: SessionState) {
        if !self.state.can_transition_to(state) {
            return;
        }
        debug!(from = %self.state, to = %state, "finder session state changed");
        self.state = state;
        ctx.notify(AccountNotice::SessionStateChanged {
            session: SessionKey::Finder,
            state,
        });
    }
}

impl Default for FinderSession {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FinderSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FinderSession")
            .field("state", &self.state)
            .field("finder", &self.finder.as_ref().map(|finder| &finder.finder_id))
            .field("link", &self.link_id())
            .field("session_created", &self.session_created)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
