//! Peerlink Runtime Engine
//!
//! This crate contains the session engine of the peerlink stack:
//! - `FinderSession`: the account's connection to its rendezvous server
//! - `LocationSession`: an authenticated direct link to one remote location
//! - `Account`: the arena owning all sessions of one identity
//! - `AccountTask`: the tokio actor serializing every account input
//!
//! `peerlink-core` provides the stable types, wire protocol and transport
//! interfaces this engine is driven through.

pub mod account;
pub mod context;
pub mod finder;
pub mod location;
pub mod task;
pub mod timers;

pub use account::Account;
pub use context::{AccountNotice, LocalIdentity, SessionContext, SessionKey, StepResult};
pub use finder::{keep_alive_delay, FinderRotation, FinderSession};
pub use location::LocationSession;
pub use task::{AccountCommand, AccountHandle, AccountTask};
pub use timers::{TimerId, TimerQueue};

// Re-export core types for convenience
pub use peerlink_core::{
    Candidate, ChannelId, FindSecret, FinderDescriptor, IceRole, LocationDescriptor, LocationId,
    Message, PeerFiles, PeerUri, PeerlinkError, Result, SessionState, StackConfig, Timestamp,
    TransportEvent, TransportProvider,
};
