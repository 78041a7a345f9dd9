//! Core types for the peerlink session layer
//!
//! Newtype identifiers, time, the shared session lifecycle state and the
//! immutable descriptors exchanged during discovery.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use core::time::Duration;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::errors::{IdentityError, PeerlinkError};

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Identifier of one concrete endpoint (device/session) of a peer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random location id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier correlating a request with its result
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    /// Generate a unique message id (uuid v4, hex without dashes)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Peer URI of the form `peer://<domain>/<contact hash>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerUri(String);

impl PeerUri {
    pub const SCHEME: &'static str = "peer://";

    /// Build a peer URI from its domain and contact hash
    pub fn from_parts(domain: &str, contact: &str) -> Self {
        Self(format!("{}{}/{}", Self::SCHEME, domain, contact))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Domain portion of the URI
    pub fn domain(&self) -> &str {
        self.split().0
    }

    /// Contact hash portion of the URI
    pub fn contact(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        // Validated on construction
        let rest = &self.0[Self::SCHEME.len()..];
        rest.split_once('/').unwrap_or((rest, ""))
    }
}

impl FromStr for PeerUri {
    type Err = PeerlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || IdentityError::MalformedPeerUri { uri: s.to_string() };
        let rest = s.strip_prefix(Self::SCHEME).ok_or_else(malformed)?;
        match rest.split_once('/') {
            Some((domain, contact))
                if !domain.is_empty() && !contact.is_empty() && !contact.contains('/') =>
            {
                Ok(Self(s.to_string()))
            }
            _ => Err(malformed().into()),
        }
    }
}

impl TryFrom<String> for PeerUri {
    type Error = PeerlinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerUri> for String {
    fn from(uri: PeerUri) -> Self {
        uri.0
    }
}

impl fmt::Display for PeerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared secret proving a connecting party found us through discovery
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindSecret(String);

impl FindSecret {
    pub fn new<T: Into<String>>(secret: T) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Byte-for-byte comparison with another secret
    pub fn matches(&self, other: &FindSecret) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for FindSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FindSecret(..)")
    }
}

/// Handle identifying a transport object (finder link, ICE session or messaging channel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(other.as_millis() as u64))
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Current wall clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        *self - other
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of the current time, injectable for deterministic tests
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle shared by finder and peer location sessions
///
/// Ordered so that a legal transition never decreases the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Pending,
    Ready,
    ShuttingDown,
    Shutdown,
}

impl SessionState {
    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(self, next: SessionState) -> bool {
        next > self
    }

    pub fn is_shutting_down_or_shutdown(self) -> bool {
        self >= SessionState::ShuttingDown
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Pending => "Pending",
            SessionState::Ready => "Ready",
            SessionState::ShuttingDown => "ShuttingDown",
            SessionState::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// ICE Candidates
// ----------------------------------------------------------------------------

/// ICE role of the local side of a socket session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IceRole {
    Controlling,
    Controlled,
}

/// Kind of ICE candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateClass {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relayed,
}

/// One transport address a location can be reached on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "class")]
    pub class: CandidateClass,
    pub transport: String,
    pub ip: IpAddr,
    pub port: u16,
    pub priority: u32,
    pub foundation: String,
}

impl Candidate {
    pub fn host(ip: IpAddr, port: u16, priority: u32) -> Self {
        Self {
            class: CandidateClass::Host,
            transport: "udp".to_string(),
            ip,
            port,
            priority,
            foundation: format!("host-{}", ip),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Candidate list, small enough to stay inline in the common case
pub type Candidates = SmallVec<[Candidate; 4]>;

// ----------------------------------------------------------------------------
// Descriptors
// ----------------------------------------------------------------------------

/// Description of one remote endpoint of a peer; immutable once received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDescriptor {
    pub location_id: LocationId,
    pub peer_uri: PeerUri,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub candidates: Candidates,
}

impl LocationDescriptor {
    pub fn new(location_id: LocationId, peer_uri: PeerUri) -> Self {
        Self {
            location_id,
            peer_uri,
            device_id: String::new(),
            user_agent: String::new(),
            os: String::new(),
            system: String::new(),
            host: String::new(),
            candidates: Candidates::new(),
        }
    }

    /// Copy of this descriptor advertising the given candidates
    pub fn with_candidates<I: IntoIterator<Item = Candidate>>(&self, candidates: I) -> Self {
        let mut copy = self.clone();
        copy.candidates = candidates.into_iter().collect();
        copy
    }

    /// Copy of this descriptor with candidates cleared
    pub fn without_candidates(&self) -> Self {
        self.with_candidates(core::iter::empty())
    }
}

/// Transport protocol offered by a finder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinderProtocol {
    pub transport: String,
    pub host: String,
}

/// Rendezvous server description; valid within its expiry window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinderDescriptor {
    pub finder_id: String,
    pub ip_endpoints: Vec<SocketAddr>,
    #[serde(default)]
    pub protocols: Vec<FinderProtocol>,
    pub created: Timestamp,
    pub expires: Timestamp,
}

impl FinderDescriptor {
    /// Whether `now` falls inside the descriptor's validity window
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.created <= now && now < self.expires
    }

    pub fn primary_endpoint(&self) -> Option<SocketAddr> {
        self.ip_endpoints.first().copied()
    }
}

/// Channel binding created when traffic is relayed through the finder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayChannelBinding {
    pub channel_number: u32,
    pub local_context: String,
    pub remote_context: String,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
