//! JSON wire protocol
//!
//! Every message is one of three envelopes:
//!
//! ```text
//! {"request": {"$domain": "..", "$id": "..", "$method": "session-create", ..}}
//! {"result":  {"$domain": "..", "$id": "..", "$method": "session-create", "$timestamp": 0, ..}}
//! {"notify":  {"$domain": "..", "$id": "..", "$method": "peer-location-find-reply", ..}}
//! ```
//!
//! A failed result carries `"error": {"$id": <http status>, "#text": <reason>}`
//! next to an empty payload for its method.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::WireError;
use crate::identity::PeerFilePublic;
use crate::types::{FindSecret, LocationDescriptor, LocationId, MessageId, PeerUri, Timestamp};
use crate::Result;

// ----------------------------------------------------------------------------
// Methods
// ----------------------------------------------------------------------------

/// Message kinds understood by the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    SessionCreate,
    SessionKeepAlive,
    SessionDelete,
    PeerIdentify,
    PeerKeepAlive,
    PeerLocationFind,
    PeerLocationFindReply,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::SessionCreate => "session-create",
            Method::SessionKeepAlive => "session-keep-alive",
            Method::SessionDelete => "session-delete",
            Method::PeerIdentify => "peer-identify",
            Method::PeerKeepAlive => "peer-keep-alive",
            Method::PeerLocationFind => "peer-location-find",
            Method::PeerLocationFindReply => "peer-location-find-reply",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Error Info
// ----------------------------------------------------------------------------

/// HTTP-style status carried by a failed result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "$id")]
    pub code: u16,
    #[serde(rename = "#text")]
    pub reason: String,
}

impl ErrorInfo {
    pub const BAD_REQUEST: u16 = 400;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    pub fn new(code: u16) -> Self {
        Self {
            code,
            reason: status_reason(code).to_string(),
        }
    }

    pub fn with_reason<T: Into<String>>(code: u16, reason: T) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn forbidden() -> Self {
        Self::new(Self::FORBIDDEN)
    }

    pub fn timeout() -> Self {
        Self::new(Self::REQUEST_TIMEOUT)
    }

    /// Synthesized when a request could not be put on the wire
    pub fn send_failed() -> Self {
        Self::with_reason(Self::SERVICE_UNAVAILABLE, "Send Failed")
    }

    pub fn is_timeout(&self) -> bool {
        self.code == Self::REQUEST_TIMEOUT
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Standard reason phrase for the status codes the stack emits
pub fn status_reason(code: u16) -> &'static str {
    match code {
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

// ----------------------------------------------------------------------------
// Request Payloads
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreateRequest {
    pub finder_id: String,
    pub location: LocationDescriptor,
    pub peer_file: PeerFilePublic,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeepAliveRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDeleteRequest {
    pub location_id: LocationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentifyRequest {
    /// The secret the caller believes the callee published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find_secret: Option<FindSecret>,
    pub location: LocationDescriptor,
    pub peer_file: PeerFilePublic,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerKeepAliveRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLocationFindRequest {
    pub target: PeerUri,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find_secret: Option<FindSecret>,
    /// The requesting location, advertising its candidates
    pub location: LocationDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_file: Option<PeerFilePublic>,
    #[serde(default)]
    pub exclude_locations: Vec<LocationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLocationFindReply {
    /// Location that issued the find request being answered
    pub requester: LocationId,
    /// The replying location, advertising its candidates
    pub location: LocationDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_file: Option<PeerFilePublic>,
}

/// Request payload, tagged by `$method`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$method", rename_all = "kebab-case")]
pub enum RequestBody {
    SessionCreate(SessionCreateRequest),
    SessionKeepAlive(SessionKeepAliveRequest),
    SessionDelete(SessionDeleteRequest),
    PeerIdentify(PeerIdentifyRequest),
    PeerKeepAlive(PeerKeepAliveRequest),
    PeerLocationFind(PeerLocationFindRequest),
    PeerLocationFindReply(PeerLocationFindReply),
}

impl RequestBody {
    pub fn method(&self) -> Method {
        match self {
            RequestBody::SessionCreate(_) => Method::SessionCreate,
            RequestBody::SessionKeepAlive(_) => Method::SessionKeepAlive,
            RequestBody::SessionDelete(_) => Method::SessionDelete,
            RequestBody::PeerIdentify(_) => Method::PeerIdentify,
            RequestBody::PeerKeepAlive(_) => Method::PeerKeepAlive,
            RequestBody::PeerLocationFind(_) => Method::PeerLocationFind,
            RequestBody::PeerLocationFindReply(_) => Method::PeerLocationFindReply,
        }
    }
}

// ----------------------------------------------------------------------------
// Result Payloads
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionCreateResult {
    pub server_agent: String,
    /// Unix seconds at which the finder forgets the session
    pub expires: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionKeepAliveResult {
    pub expires: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDeleteResult {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerIdentifyResult {
    pub location: Option<LocationDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerKeepAliveResult {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerLocationFindResult {
    pub locations: Vec<LocationDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLocationFindReplyResult {}

/// Result payload, tagged by `$method`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$method", rename_all = "kebab-case")]
pub enum ResponseBody {
    SessionCreate(SessionCreateResult),
    SessionKeepAlive(SessionKeepAliveResult),
    SessionDelete(SessionDeleteResult),
    PeerIdentify(PeerIdentifyResult),
    PeerKeepAlive(PeerKeepAliveResult),
    PeerLocationFind(PeerLocationFindResult),
    PeerLocationFindReply(PeerLocationFindReplyResult),
}

impl ResponseBody {
    /// Empty payload used alongside an error
    pub fn empty(method: Method) -> Self {
        match method {
            Method::SessionCreate => ResponseBody::SessionCreate(Default::default()),
            Method::SessionKeepAlive => ResponseBody::SessionKeepAlive(Default::default()),
            Method::SessionDelete => ResponseBody::SessionDelete(Default::default()),
            Method::PeerIdentify => ResponseBody::PeerIdentify(Default::default()),
            Method::PeerKeepAlive => ResponseBody::PeerKeepAlive(Default::default()),
            Method::PeerLocationFind => ResponseBody::PeerLocationFind(Default::default()),
            Method::PeerLocationFindReply => {
                ResponseBody::PeerLocationFindReply(Default::default())
            }
        }
    }

    pub fn method(&self) -> Method {
        match self {
            ResponseBody::SessionCreate(_) => Method::SessionCreate,
            ResponseBody::SessionKeepAlive(_) => Method::SessionKeepAlive,
            ResponseBody::SessionDelete(_) => Method::SessionDelete,
            ResponseBody::PeerIdentify(_) => Method::PeerIdentify,
            ResponseBody::PeerKeepAlive(_) => Method::PeerKeepAlive,
            ResponseBody::PeerLocationFind(_) => Method::PeerLocationFind,
            ResponseBody::PeerLocationFindReply(_) => Method::PeerLocationFindReply,
        }
    }
}

// ----------------------------------------------------------------------------
// Envelopes
// ----------------------------------------------------------------------------

/// A request or notify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "$domain")]
    pub domain: String,
    #[serde(rename = "$id")]
    pub id: MessageId,
    #[serde(flatten)]
    pub body: RequestBody,
}

impl Request {
    /// Create a request with a freshly generated id
    pub fn new<D: Into<String>>(domain: D, body: RequestBody) -> Self {
        Self {
            domain: domain.into(),
            id: MessageId::generate(),
            body,
        }
    }

    pub fn method(&self) -> Method {
        self.body.method()
    }

    /// Successful result answering this request
    pub fn success(&self, body: ResponseBody, now: Timestamp) -> Response {
        Response {
            domain: self.domain.clone(),
            id: self.id.clone(),
            timestamp: now.as_secs(),
            error: None,
            body,
        }
    }

    /// Failed result answering this request
    pub fn failure(&self, error: ErrorInfo, now: Timestamp) -> Response {
        Response {
            domain: self.domain.clone(),
            id: self.id.clone(),
            timestamp: now.as_secs(),
            error: Some(error),
            body: ResponseBody::empty(self.method()),
        }
    }
}

/// A result, successful or failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "$domain")]
    pub domain: String,
    #[serde(rename = "$id")]
    pub id: MessageId,
    #[serde(rename = "$timestamp", default)]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    pub fn method(&self) -> Method {
        self.body.method()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the typed payload or the error it carries
    pub fn into_outcome(self) -> core::result::Result<ResponseBody, ErrorInfo> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.body),
        }
    }
}

/// Top-level wire message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Message {
    Request(Request),
    Result(Response),
    Notify(Request),
}

impl Message {
    pub fn id(&self) -> &MessageId {
        match self {
            Message::Request(request) | Message::Notify(request) => &request.id,
            Message::Result(response) => &response.id,
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Message::Request(request) | Message::Notify(request) => request.method(),
            Message::Result(response) => response.method(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Result(_) => "result",
            Message::Notify(_) => "notify",
        }
    }

    /// Encode to JSON bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.id().is_empty() {
            return Err(WireError::MissingMessageId.into());
        }
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let message: Message = serde_json::from_slice(bytes)?;
        if message.id().is_empty() {
            return Err(WireError::MissingMessageId.into());
        }
        Ok(message)
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(request) => Some(request),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Result(response) => Some(response),
            _ => None,
        }
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Result(response)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
