//! Error types for the peerlink session layer
//!
//! Protocol outcomes (send gating, handshake rejection, transport loss) are not
//! errors: they surface as `bool` returns and session state changes. The types
//! here cover programming faults, malformed input and configuration problems.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Wire encoding and decoding errors
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message has no id")]
    MissingMessageId,
    #[error("Unexpected envelope: expected {expected}, got {actual}")]
    UnexpectedEnvelope { expected: String, actual: String },
}

/// Request correlation errors
#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

/// Peer file and identity errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Malformed peer URI: {uri}")]
    MalformedPeerUri { uri: String },
    #[error("Invalid key encoding")]
    InvalidKeyEncoding,
    #[error("Invalid signature encoding")]
    InvalidSignatureEncoding,
    #[error("Peer URI does not match public key: {uri}")]
    PeerUriMismatch { uri: String },
    #[error("Peer file signature verification failed")]
    SignatureVerificationFailed,
}

/// Transport provider errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No ICE socket available")]
    NoSocket,
    #[error("ICE session could not be created: {reason}")]
    IceSessionUnavailable { reason: String },
    #[error("Messaging channel could not be created: {reason}")]
    ChannelUnavailable { reason: String },
    #[error("Finder unreachable at {endpoint}")]
    FinderUnreachable { endpoint: String },
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found for location {location_id}")]
    SessionNotFound { location_id: String },
    #[error("Handshake rejected by {location_id}: {reason}")]
    HandshakeRejected { location_id: String, reason: String },
    #[error("Session state invalid for {session}: expected {expected}, got {actual}")]
    InvalidState {
        session: String,
        expected: String,
        actual: String,
    },
}

// ----------------------------------------------------------------------------
// Top-level Error
// ----------------------------------------------------------------------------

/// Core error type for the peerlink stack
#[derive(Debug, thiserror::Error)]
pub enum PeerlinkError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Correlator error: {0}")]
    Correlator(#[from] CorrelatorError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Actor channel closed or full
    #[error("Channel error: {message}")]
    Channel { message: String },
}

impl From<serde_json::Error> for PeerlinkError {
    fn from(err: serde_json::Error) -> Self {
        PeerlinkError::Wire(WireError::Json(err))
    }
}

impl From<toml::de::Error> for PeerlinkError {
    fn from(err: toml::de::Error) -> Self {
        PeerlinkError::Configuration {
            reason: err.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl PeerlinkError {
    /// Create an invalid request error for the correlator
    pub fn invalid_request<T: Into<String>>(reason: T) -> Self {
        PeerlinkError::Correlator(CorrelatorError::InvalidRequest {
            reason: reason.into(),
        })
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        PeerlinkError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        PeerlinkError::Channel {
            message: message.into(),
        }
    }

    /// Create a session not found error
    pub fn session_not_found<L: Into<String>>(location_id: L) -> Self {
        PeerlinkError::Session(SessionError::SessionNotFound {
            location_id: location_id.into(),
        })
    }

    /// Create a handshake rejected error
    pub fn handshake_rejected<L: Into<String>, R: Into<String>>(location_id: L, reason: R) -> Self {
        PeerlinkError::Session(SessionError::HandshakeRejected {
            location_id: location_id.into(),
            reason: reason.into(),
        })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, PeerlinkError>;
pub type PeerlinkResult<T> = Result<T>;
