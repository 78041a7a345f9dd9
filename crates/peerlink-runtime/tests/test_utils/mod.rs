//! Test utilities for driving accounts without a network
//!
//! `MockTransport` records every transport object the sessions create and lets
//! a test move them through their states by hand. State changes are reported
//! back to the account as the [`TransportEvent`]s a real transport would raise.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use peerlink_core::wire::{PeerIdentifyRequest, PeerLocationFindReply, PeerLocationFindRequest};
use peerlink_core::{
    Candidate, Candidates, ChannelId, ChannelState, FindSecret, FinderDescriptor, FinderLink,
    IceRole, IceSession, IceSessionState, KeepAliveProperties, LocationDescriptor, LocationId,
    Message, MessageId, MessagingChannel, PeerFiles, RelayChannel, RelayChannelBinding, RelayStreamEnds,
    Request, RequestBody, ShutdownReason, SocketSubscription, StackConfig, TimeSource, Timestamp,
    TransportEvent, TransportProvider,
};
use peerlink_runtime::Account;
use rand_chacha::ChaCha8Rng;
use rand_chacha::rand_core::SeedableRng;

// ----------------------------------------------------------------------------
// Tracing
// ----------------------------------------------------------------------------

/// Route session logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
#[derive(Debug, Clone)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Start at a specific time in milliseconds
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.current_time
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

/// Time source following tokio's clock, so paused tests can auto-advance
#[derive(Debug, Clone)]
pub struct TokioTimeSource {
    start: tokio::time::Instant,
    epoch: Timestamp,
}

impl TokioTimeSource {
    pub fn new(epoch: Timestamp) -> Self {
        Self {
            start: tokio::time::Instant::now(),
            epoch,
        }
    }
}

impl TimeSource for TokioTimeSource {
    fn now(&self) -> Timestamp {
        self.epoch + self.start.elapsed()
    }
}

// ----------------------------------------------------------------------------
// Identities and Descriptors
// ----------------------------------------------------------------------------

pub const DOMAIN: &str = "test.local";

/// Start of every test clock, well inside finder validity windows
pub const EPOCH_SECS: u64 = 1_700_000_000;

pub fn seeded_rng(seed: u8) -> ChaCha8Rng {
    ChaCha8Rng::from_seed([seed; 32])
}

/// Peer files with a fixed find secret and seeded key
pub fn peer_files(secret: &str, seed: u8) -> PeerFiles {
    PeerFiles::generate_with_secret(DOMAIN, FindSecret::new(secret), &mut seeded_rng(seed))
}

pub fn alice() -> PeerFiles {
    peer_files("alice-secret", 1)
}

pub fn bob() -> PeerFiles {
    peer_files("bob-secret", 2)
}

pub fn mallory() -> PeerFiles {
    peer_files("mallory-secret", 3)
}

pub fn candidate(last_octet: u8, port: u16) -> Candidate {
    Candidate::host(IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)), port, 100)
}

/// Finder descriptor valid for a day around `EPOCH_SECS`
pub fn finder_descriptor(id: &str, port: u16) -> FinderDescriptor {
    FinderDescriptor {
        finder_id: id.to_string(),
        ip_endpoints: vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), port)],
        protocols: Vec::new(),
        created: Timestamp::from_secs(EPOCH_SECS - 3600),
        expires: Timestamp::from_secs(EPOCH_SECS + 86_400),
    }
}

/// A location of `peer` advertising one host candidate
pub fn remote_location(peer: &PeerFiles, id: &str) -> LocationDescriptor {
    LocationDescriptor::new(LocationId::new(id), peer.peer_uri().clone())
        .with_candidates([candidate(20, 6000)])
}

/// Find request from `from` at `location` looking for `target`
pub fn find_request(
    from: &PeerFiles,
    location: &LocationDescriptor,
    target: &PeerFiles,
    secret: Option<&str>,
) -> Request {
    Request::new(
        DOMAIN,
        RequestBody::PeerLocationFind(PeerLocationFindRequest {
            target: target.peer_uri().clone(),
            find_secret: secret.map(FindSecret::new),
            location: location.clone(),
            peer_file: Some(from.public().clone()),
            exclude_locations: Vec::new(),
        }),
    )
}

/// Identify request from `from` presenting `secret`
pub fn identify_request(
    from: &PeerFiles,
    location: &LocationDescriptor,
    secret: Option<&str>,
) -> Request {
    Request::new(
        DOMAIN,
        RequestBody::PeerIdentify(PeerIdentifyRequest {
            find_secret: secret.map(FindSecret::new),
            location: location.clone(),
            peer_file: from.public().clone(),
        }),
    )
}

pub fn encode(message: &Message) -> Vec<u8> {
    message.encode().expect("test message encodes")
}

// ----------------------------------------------------------------------------
// Mock Network State
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct IceRecord {
    pub state: IceSessionState,
    pub reason: Option<ShutdownReason>,
    pub role: IceRole,
    pub candidates: Vec<Candidate>,
    pub keep_alive: Option<KeepAliveProperties>,
    /// Channels opened by the remote side, not yet accepted
    pub waiting: Vec<ChannelState>,
}

#[derive(Debug)]
pub struct ChannelRecord {
    pub ice: ChannelId,
    pub state: ChannelState,
    pub reason: Option<ShutdownReason>,
    /// Protocol tag for channels opened locally
    pub protocol: Option<String>,
    pub sent: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub struct LinkRecord {
    pub endpoint: SocketAddr,
    pub state: ChannelState,
    pub sent: Vec<Vec<u8>>,
    pub relays: Vec<RelayChannelBinding>,
    /// Held so relay streams stay open while the test runs
    pub relay_ends: Vec<RelayStreamEnds>,
}

#[derive(Debug)]
pub struct MockNet {
    next_id: u64,
    pub socket_available: bool,
    pub socket_ready: bool,
    pub wake_count: usize,
    pub subscriptions: Vec<SocketSubscription>,
    pub local_candidates: Candidates,
    pub finder_reachable: bool,
    pub ice_creatable: bool,
    pub channel_openable: bool,
    pub relay_acceptable: bool,
    pub ice: BTreeMap<ChannelId, IceRecord>,
    pub channels: BTreeMap<ChannelId, ChannelRecord>,
    pub links: BTreeMap<ChannelId, LinkRecord>,
}

impl Default for MockNet {
    fn default() -> Self {
        Self {
            next_id: 1,
            socket_available: true,
            socket_ready: true,
            wake_count: 0,
            subscriptions: Vec::new(),
            local_candidates: [candidate(10, 5000)].into_iter().collect(),
            finder_reachable: true,
            ice_creatable: true,
            channel_openable: true,
            relay_acceptable: true,
            ice: BTreeMap::new(),
            channels: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }
}

impl MockNet {
    fn allocate(&mut self) -> ChannelId {
        let id = ChannelId(self.next_id);
        self.next_id += 1;
        id
    }
}

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

/// Transport provider backed by shared in-memory state
///
/// Clones share the same state; the test keeps one clone to inspect and drive
/// what the account's clone created.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    net: Arc<Mutex<MockNet>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn net(&self) -> MutexGuard<'_, MockNet> {
        self.net.lock().expect("mock network lock")
    }

    // Socket

    pub fn set_socket_ready(&self, ready: bool) -> TransportEvent {
        self.net().socket_ready = ready;
        TransportEvent::SocketStateChanged
    }

    pub fn subscription_count(&self) -> usize {
        self.net().subscriptions.len()
    }

    pub fn wake_count(&self) -> usize {
        self.net().wake_count
    }

    // Finder links

    pub fn link_ids(&self) -> Vec<ChannelId> {
        self.net().links.keys().copied().collect()
    }

    pub fn last_link(&self) -> ChannelId {
        *self.net().links.keys().last().expect("a finder link was created")
    }

    pub fn link_state(&self, link: ChannelId) -> ChannelState {
        self.net().links[&link].state
    }

    pub fn set_link_state(&self, link: ChannelId, state: ChannelState) -> TransportEvent {
        if let Some(record) = self.net().links.get_mut(&link) {
            record.state = state;
        }
        TransportEvent::FinderLinkStateChanged { link }
    }

    /// Decode and clear everything sent on a finder link
    pub fn take_link_sent(&self, link: ChannelId) -> Vec<Message> {
        let sent = match self.net().links.get_mut(&link) {
            Some(record) => std::mem::take(&mut record.sent),
            None => Vec::new(),
        };
        decode_all(&sent)
    }

    pub fn accepted_relays(&self, link: ChannelId) -> Vec<RelayChannelBinding> {
        self.net().links[&link].relays.clone()
    }

    // ICE sessions

    pub fn ice_ids(&self) -> Vec<ChannelId> {
        self.net().ice.keys().copied().collect()
    }

    pub fn last_ice(&self) -> ChannelId {
        *self.net().ice.keys().last().expect("an ICE session was created")
    }

    pub fn ice_state(&self, ice: ChannelId) -> IceSessionState {
        self.net().ice[&ice].state
    }

    pub fn ice_role(&self, ice: ChannelId) -> IceRole {
        self.net().ice[&ice].role
    }

    pub fn ice_candidates(&self, ice: ChannelId) -> Vec<Candidate> {
        self.net().ice[&ice].candidates.clone()
    }

    pub fn ice_keep_alive(&self, ice: ChannelId) -> Option<KeepAliveProperties> {
        self.net().ice[&ice].keep_alive
    }

    pub fn set_ice_state(&self, ice: ChannelId, state: IceSessionState) -> TransportEvent {
        if let Some(record) = self.net().ice.get_mut(&ice) {
            record.state = state;
        }
        TransportEvent::IceSessionStateChanged { session: ice }
    }

    /// The ICE session died on its own for `reason`
    pub fn fail_ice(&self, ice: ChannelId, reason: ShutdownReason) -> TransportEvent {
        if let Some(record) = self.net().ice.get_mut(&ice) {
            record.state = IceSessionState::Shutdown;
            record.reason = Some(reason);
        }
        TransportEvent::IceSessionStateChanged { session: ice }
    }

    /// The remote side opened a channel on `ice` in the given state
    pub fn offer_channel(&self, ice: ChannelId, state: ChannelState) -> TransportEvent {
        if let Some(record) = self.net().ice.get_mut(&ice) {
            record.waiting.push(state);
        }
        TransportEvent::IceChannelWaiting { session: ice }
    }

    // Messaging channels

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.net().channels.keys().copied().collect()
    }

    pub fn last_channel(&self) -> ChannelId {
        *self
            .net()
            .channels
            .keys()
            .last()
            .expect("a messaging channel was created")
    }

    pub fn channel_state(&self, channel: ChannelId) -> ChannelState {
        self.net().channels[&channel].state
    }

    pub fn channel_protocol(&self, channel: ChannelId) -> Option<String> {
        self.net().channels[&channel].protocol.clone()
    }

    pub fn set_channel_state(&self, channel: ChannelId, state: ChannelState) -> TransportEvent {
        if let Some(record) = self.net().channels.get_mut(&channel) {
            record.state = state;
        }
        TransportEvent::ChannelStateChanged { channel }
    }

    pub fn fail_channel(&self, channel: ChannelId, reason: ShutdownReason) -> TransportEvent {
        if let Some(record) = self.net().channels.get_mut(&channel) {
            record.state = ChannelState::Shutdown;
            record.reason = Some(reason);
        }
        TransportEvent::ChannelStateChanged { channel }
    }

    /// Decode and clear everything sent on a messaging channel
    pub fn take_channel_sent(&self, channel: ChannelId) -> Vec<Message> {
        let sent = match self.net().channels.get_mut(&channel) {
            Some(record) => std::mem::take(&mut record.sent),
            None => Vec::new(),
        };
        decode_all(&sent)
    }

    /// Finish every graceful shutdown in progress
    ///
    /// Returns the state-change events to feed back to the account.
    pub fn complete_shutdowns(&self) -> Vec<TransportEvent> {
        let mut net = self.net();
        let mut events = Vec::new();
        for (id, record) in net.channels.iter_mut() {
            if record.state == ChannelState::ShuttingDown {
                record.state = ChannelState::Shutdown;
                events.push(TransportEvent::ChannelStateChanged { channel: *id });
            }
        }
        for (id, record) in net.ice.iter_mut() {
            if record.state == IceSessionState::ShuttingDown {
                record.state = IceSessionState::Shutdown;
                events.push(TransportEvent::IceSessionStateChanged { session: *id });
            }
        }
        for (id, record) in net.links.iter_mut() {
            if record.state == ChannelState::ShuttingDown {
                record.state = ChannelState::Shutdown;
                events.push(TransportEvent::FinderLinkStateChanged { link: *id });
            }
        }
        events
    }
}

pub fn decode_all(frames: &[Vec<u8>]) -> Vec<Message> {
    frames
        .iter()
        .map(|bytes| Message::decode(bytes).expect("sent frame decodes"))
        .collect()
}

impl TransportProvider for MockTransport {
    fn subscribe_socket(&mut self) -> Option<SocketSubscription> {
        let mut net = self.net();
        if !net.socket_available {
            return None;
        }
        let subscription = SocketSubscription(net.allocate().0);
        net.subscriptions.push(subscription);
        Some(subscription)
    }

    fn unsubscribe_socket(&mut self, subscription: SocketSubscription) {
        self.net().subscriptions.retain(|held| *held != subscription);
    }

    fn is_socket_ready(&self) -> bool {
        self.net().socket_ready
    }

    fn wake_socket(&mut self) {
        self.net().wake_count += 1;
    }

    fn local_candidates(&self) -> Candidates {
        self.net().local_candidates.clone()
    }

    fn create_session_from_candidates(
        &mut self,
        candidates: &[Candidate],
        role: IceRole,
    ) -> Option<Box<dyn IceSession>> {
        let mut net = self.net();
        if !net.ice_creatable {
            return None;
        }
        let id = net.allocate();
        net.ice.insert(
            id,
            IceRecord {
                state: IceSessionState::Searching,
                reason: None,
                role,
                candidates: candidates.to_vec(),
                keep_alive: None,
                waiting: Vec::new(),
            },
        );
        Some(Box::new(MockIce {
            id,
            net: self.net.clone(),
        }))
    }

    fn open_channel(
        &mut self,
        session: &dyn IceSession,
        protocol_tag: &str,
    ) -> Option<Box<dyn MessagingChannel>> {
        let mut net = self.net();
        if !net.channel_openable {
            return None;
        }
        let id = net.allocate();
        net.channels.insert(
            id,
            ChannelRecord {
                ice: session.id(),
                state: ChannelState::Pending,
                reason: None,
                protocol: Some(protocol_tag.to_string()),
                sent: Vec::new(),
            },
        );
        Some(Box::new(MockChannel {
            id,
            net: self.net.clone(),
        }))
    }

    fn accept_channel(&mut self, session: &dyn IceSession) -> Option<Box<dyn MessagingChannel>> {
        let mut net = self.net();
        let state = net.ice.get_mut(&session.id())?.waiting.pop()?;
        let id = net.allocate();
        net.channels.insert(
            id,
            ChannelRecord {
                ice: session.id(),
                state,
                reason: None,
                protocol: None,
                sent: Vec::new(),
            },
        );
        Some(Box::new(MockChannel {
            id,
            net: self.net.clone(),
        }))
    }

    fn connect_finder(&mut self, endpoint: SocketAddr) -> Option<Box<dyn FinderLink>> {
        let mut net = self.net();
        if !net.finder_reachable {
            return None;
        }
        let id = net.allocate();
        net.links.insert(
            id,
            LinkRecord {
                endpoint,
                state: ChannelState::Pending,
                sent: Vec::new(),
                relays: Vec::new(),
                relay_ends: Vec::new(),
            },
        );
        Some(Box::new(MockLink {
            id,
            net: self.net.clone(),
        }))
    }
}

// ----------------------------------------------------------------------------
// Mock Handles
// ----------------------------------------------------------------------------

pub struct MockIce {
    id: ChannelId,
    net: Arc<Mutex<MockNet>>,
}

impl MockIce {
    fn with<R>(&self, f: impl FnOnce(&mut IceRecord) -> R) -> R {
        let mut net = self.net.lock().expect("mock network lock");
        f(net.ice.get_mut(&self.id).expect("ICE record exists"))
    }
}

impl IceSession for MockIce {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn state(&self) -> IceSessionState {
        self.with(|record| record.state)
    }

    fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.with(|record| record.reason)
    }

    fn set_keep_alive_properties(&mut self, properties: KeepAliveProperties) {
        self.with(|record| record.keep_alive = Some(properties));
    }

    fn shutdown(&mut self) {
        self.with(|record| {
            if record.state < IceSessionState::ShuttingDown {
                record.state = IceSessionState::ShuttingDown;
                record.reason.get_or_insert(ShutdownReason::Closed);
            }
        });
    }
}

pub struct MockChannel {
    id: ChannelId,
    net: Arc<Mutex<MockNet>>,
}

impl MockChannel {
    fn with<R>(&self, f: impl FnOnce(&mut ChannelRecord) -> R) -> R {
        let mut net = self.net.lock().expect("mock network lock");
        f(net.channels.get_mut(&self.id).expect("channel record exists"))
    }
}

impl MessagingChannel for MockChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn state(&self) -> ChannelState {
        self.with(|record| record.state)
    }

    fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.with(|record| record.reason)
    }

    fn send(&mut self, bytes: &[u8]) -> bool {
        self.with(|record| {
            if record.state != ChannelState::Connected {
                return false;
            }
            record.sent.push(bytes.to_vec());
            true
        })
    }

    fn shutdown(&mut self) {
        self.with(|record| {
            if record.state < ChannelState::ShuttingDown {
                record.state = ChannelState::ShuttingDown;
                record.reason.get_or_insert(ShutdownReason::Closed);
            }
        });
    }
}

pub struct MockLink {
    id: ChannelId,
    net: Arc<Mutex<MockNet>>,
}

impl MockLink {
    fn with<R>(&self, f: impl FnOnce(&mut MockNet, ChannelId) -> R) -> R {
        let mut net = self.net.lock().expect("mock network lock");
        f(&mut net, self.id)
    }
}

impl FinderLink for MockLink {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn state(&self) -> ChannelState {
        self.with(|net, id| net.links[&id].state)
    }

    fn send(&mut self, bytes: &[u8]) -> bool {
        self.with(|net, id| {
            let record = net.links.get_mut(&id).expect("link record exists");
            if record.state != ChannelState::Connected {
                return false;
            }
            record.sent.push(bytes.to_vec());
            true
        })
    }

    fn accept_relay(
        &mut self,
        binding: &RelayChannelBinding,
        ends: RelayStreamEnds,
    ) -> Option<Box<dyn RelayChannel>> {
        self.with(|net, id| {
            if !net.relay_acceptable {
                return None;
            }
            let record = net.links.get_mut(&id).expect("link record exists");
            record.relays.push(binding.clone());
            record.relay_ends.push(ends);
            Some(Box::new(MockRelay {
                channel_number: binding.channel_number,
            }) as Box<dyn RelayChannel>)
        })
    }

    fn shutdown(&mut self) {
        self.with(|net, id| {
            let record = net.links.get_mut(&id).expect("link record exists");
            if record.state < ChannelState::ShuttingDown {
                record.state = ChannelState::ShuttingDown;
            }
        });
    }
}

pub struct MockRelay {
    channel_number: u32,
}

impl RelayChannel for MockRelay {
    fn channel_number(&self) -> u32 {
        self.channel_number
    }

    fn shutdown(&mut self) {}
}

// ----------------------------------------------------------------------------
// Account Fixture
// ----------------------------------------------------------------------------

/// An account over a mock transport with its own clock
pub struct Fixture {
    pub account: Account,
    pub transport: MockTransport,
    pub clock: MockTimeSource,
    pub peer_files: PeerFiles,
}

impl Fixture {
    pub fn new(peer_files: PeerFiles) -> Self {
        init_tracing();
        let transport = MockTransport::new();
        let account = Account::new(
            StackConfig::testing(),
            peer_files.clone(),
            Box::new(transport.clone()),
        )
        .expect("testing config is valid");
        Self {
            account,
            transport,
            clock: MockTimeSource::new_at(EPOCH_SECS * 1000),
            peer_files,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn feed(&mut self, event: TransportEvent) {
        let now = self.now();
        self.account.handle_transport_event(now, event);
    }

    pub fn feed_all(&mut self, events: Vec<TransportEvent>) {
        for event in events {
            self.feed(event);
        }
    }

    /// Advance the clock and fire whatever became due
    pub fn advance_secs(&mut self, secs: u64) {
        self.clock.advance_secs(secs);
        let now = self.now();
        self.account.handle_timers(now);
    }

    /// Deliver `message` as if the finder had sent it
    pub fn from_finder(&mut self, message: &Message) {
        let link = self.transport.last_link();
        self.feed(TransportEvent::FinderLinkData {
            link,
            data: encode(message),
        });
    }

    /// Deliver `message` on a messaging channel
    pub fn from_channel(&mut self, channel: ChannelId, message: &Message) {
        self.feed(TransportEvent::ChannelData {
            channel,
            data: encode(message),
        });
    }

    /// Start the account and bring the finder session to `Ready`
    ///
    /// The session-create result advertises an expiry `expires_in` from now.
    pub fn ready_finder(&mut self, expires_in: Duration) -> ChannelId {
        let now = self.now();
        self.account
            .set_finders(now, vec![finder_descriptor("finder-1", 4000)]);
        self.account.start(now);

        let link = self.transport.last_link();
        let event = self.transport.set_link_state(link, ChannelState::Connected);
        self.feed(event);

        let create = self
            .transport
            .take_link_sent(link)
            .into_iter()
            .find_map(|message| message.as_request().cloned())
            .expect("session create sent");
        let expires = (self.now() + expires_in).as_secs();
        let result = create.success(
            peerlink_core::ResponseBody::SessionCreate(peerlink_core::wire::SessionCreateResult {
                server_agent: "mock-finder/1.0".to_string(),
                expires: Some(expires),
            }),
            self.now(),
        );
        self.from_finder(&Message::Result(result));
        assert!(self.account.is_finder_ready());
        link
    }

    /// Answer the account's find `find_id` with a location of `remote`
    pub fn find_reply(&mut self, find_id: &MessageId, remote: &PeerFiles, location: &LocationDescriptor) {
        let reply = Message::Notify(Request {
            domain: DOMAIN.to_string(),
            id: find_id.clone(),
            body: RequestBody::PeerLocationFindReply(PeerLocationFindReply {
                requester: self.account.identity().location_id().clone(),
                location: location.clone(),
                peer_file: Some(remote.public().clone()),
            }),
        });
        self.from_finder(&reply);
    }

    /// Relay a find for this account from `remote` at `location`
    pub fn incoming_find(
        &mut self,
        remote: &PeerFiles,
        location: &LocationDescriptor,
        secret: Option<&str>,
    ) -> Request {
        let request = find_request(remote, location, &self.peer_files, secret);
        self.from_finder(&Message::Request(request.clone()));
        request
    }

    /// The location session for `id`, which must exist
    pub fn location(&self, id: &str) -> &peerlink_runtime::LocationSession {
        self.account
            .location(&LocationId::new(id))
            .expect("location session exists")
    }
}
