//! Request/result correlation
//!
//! The correlator matches asynchronous results to the requests that caused
//! them. Each outstanding request has exactly one monitor, keyed by message id
//! and carrying its own deadline. A monitor retires exactly once, by delivery,
//! timeout, synthesized failure or cancel. Completions are queued rather than
//! invoked in place; the owning account drains the queue and hands each one to
//! its owner, skipping owners that no longer exist.

use core::fmt;
use core::time::Duration;
use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::errors::CorrelatorError;
use crate::types::{MessageId, Timestamp};
use crate::wire::{ErrorInfo, Message, Method, Request, ResponseBody};
use crate::Result;

// ----------------------------------------------------------------------------
// Monitor Handle
// ----------------------------------------------------------------------------

/// Handle to one outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorHandle(u64);

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitor-{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Completion
// ----------------------------------------------------------------------------

/// Outcome of a monitored request, waiting to be handed to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion<O> {
    pub handle: MonitorHandle,
    pub owner: O,
    pub message_id: MessageId,
    pub method: Method,
    pub outcome: core::result::Result<ResponseBody, ErrorInfo>,
}

#[derive(Debug, Clone)]
struct Monitor<O> {
    handle: MonitorHandle,
    owner: O,
    expected: Method,
    deadline: Timestamp,
}

/// Counters over the correlator's lifetime
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CorrelatorStatistics {
    pub monitored: u64,
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Results that matched no pending monitor
    pub unmatched: u64,
}

// ----------------------------------------------------------------------------
// Message Correlator
// ----------------------------------------------------------------------------

/// Tracks outstanding requests by message id
#[derive(Debug)]
pub struct MessageCorrelator<O> {
    next_handle: u64,
    monitors: HashMap<MessageId, Monitor<O>>,
    handles: HashMap<MonitorHandle, MessageId>,
    ready: VecDeque<Completion<O>>,
    stats: CorrelatorStatistics,
}

impl<O> Default for MessageCorrelator<O> {
    fn default() -> Self {
        Self {
            next_handle: 1,
            monitors: HashMap::new(),
            handles: HashMap::new(),
            ready: VecDeque::new(),
            stats: CorrelatorStatistics::default(),
        }
    }
}

impl<O: Clone + fmt::Debug> MessageCorrelator<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and start its timeout clock
    pub fn monitor(
        &mut self,
        owner: O,
        request: &Request,
        timeout: Duration,
        now: Timestamp,
    ) -> Result<MonitorHandle> {
        if request.id.is_empty() {
            return Err(CorrelatorError::InvalidRequest {
                reason: format!("{} request has no message id", request.method()),
            }
            .into());
        }
        if self.monitors.contains_key(&request.id) {
            return Err(CorrelatorError::InvalidRequest {
                reason: format!("message id {} is already monitored", request.id),
            }
            .into());
        }

        let handle = MonitorHandle(self.next_handle);
        self.next_handle += 1;

        trace!(%handle, message_id = %request.id, method = %request.method(), ?owner, "monitoring request");
        self.monitors.insert(
            request.id.clone(),
            Monitor {
                handle,
                owner,
                expected: request.method(),
                deadline: now + timeout,
            },
        );
        self.handles.insert(handle, request.id.clone());
        self.stats.monitored += 1;
        Ok(handle)
    }

    /// Offer an incoming message; `true` if it resolved a pending monitor
    ///
    /// Requests, notifies, unknown ids and already retired ids return `false`.
    pub fn deliver(&mut self, message: &Message) -> bool {
        let Some(response) = message.as_response() else {
            return false;
        };
        let Some(monitor) = self.retire_by_id(&response.id) else {
            trace!(message_id = %response.id, "no pending monitor for result");
            self.stats.unmatched += 1;
            return false;
        };

        let outcome = if response.method() != monitor.expected {
            Err(ErrorInfo::with_reason(
                ErrorInfo::BAD_REQUEST,
                format!("expected {} result, got {}", monitor.expected, response.method()),
            ))
        } else {
            response.clone().into_outcome()
        };

        if outcome.is_ok() {
            self.stats.delivered += 1;
        } else {
            self.stats.failed += 1;
        }
        self.push_ready(monitor, response.id.clone(), outcome);
        true
    }

    /// Resolve a monitor with a synthesized error (e.g. the request never left)
    pub fn fail(&mut self, handle: MonitorHandle, error: ErrorInfo) -> bool {
        let Some(message_id) = self.handles.get(&handle).cloned() else {
            return false;
        };
        let Some(monitor) = self.retire_by_id(&message_id) else {
            return false;
        };
        debug!(%handle, %message_id, %error, "monitor failed locally");
        self.stats.failed += 1;
        self.push_ready(monitor, message_id, Err(error));
        true
    }

    /// Retire a monitor without notifying its owner; idempotent
    pub fn cancel(&mut self, handle: MonitorHandle) -> bool {
        let queued = self.ready.len();
        self.ready.retain(|completion| completion.handle != handle);
        let dropped_queued = self.ready.len() != queued;

        let retired = match self.handles.get(&handle).cloned() {
            Some(message_id) => self.retire_by_id(&message_id).is_some(),
            None => false,
        };

        if retired || dropped_queued {
            trace!(%handle, "monitor cancelled");
            self.stats.cancelled += 1;
        }
        retired || dropped_queued
    }

    /// Synthesize timeout errors for every monitor whose deadline has passed
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let expired: Vec<MessageId> = self
            .monitors
            .iter()
            .filter(|(_, monitor)| monitor.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for message_id in &expired {
            if let Some(monitor) = self.retire_by_id(message_id) {
                debug!(handle = %monitor.handle, %message_id, "monitor timed out");
                self.stats.timed_out += 1;
                self.push_ready(monitor, message_id.clone(), Err(ErrorInfo::timeout()));
            }
        }
        expired.len()
    }

    /// Earliest deadline among pending monitors
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.monitors.values().map(|monitor| monitor.deadline).min()
    }

    /// Take the next completion waiting to be handed to its owner
    pub fn pop_ready(&mut self) -> Option<Completion<O>> {
        self.ready.pop_front()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Whether the monitor is still waiting for its result
    pub fn is_pending(&self, handle: MonitorHandle) -> bool {
        self.handles.contains_key(&handle)
    }

    pub fn pending_count(&self) -> usize {
        self.monitors.len()
    }

    pub fn statistics(&self) -> &CorrelatorStatistics {
        &self.stats
    }

    fn retire_by_id(&mut self, message_id: &MessageId) -> Option<Monitor<O>> {
        let monitor = self.monitors.remove(message_id)?;
        self.handles.remove(&monitor.handle);
        Some(monitor)
    }

    fn push_ready(
        &mut self,
        monitor: Monitor<O>,
        message_id: MessageId,
        outcome: core::result::Result<ResponseBody, ErrorInfo>,
    ) {
        self.ready.push_back(Completion {
            handle: monitor.handle,
            owner: monitor.owner,
            message_id,
            method: monitor.expected,
            outcome,
        });
    }
}

impl<O: Clone + fmt::Debug + PartialEq> MessageCorrelator<O> {
    /// Cancel every monitor and queued completion belonging to `owner`
    pub fn cancel_owner(&mut self, owner: &O) -> usize {
        let handles: Vec<MonitorHandle> = self
            .monitors
            .values()
            .filter(|monitor| &monitor.owner == owner)
            .map(|monitor| monitor.handle)
            .chain(
                self.ready
                    .iter()
                    .filter(|completion| &completion.owner == owner)
                    .map(|completion| completion.handle),
            )
            .collect();
        handles.into_iter().filter(|handle| self.cancel(*handle)).count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{RequestBody, SessionKeepAliveResult};

    fn keep_alive() -> Request {
        Request::new("example.com", RequestBody::SessionKeepAlive(Default::default()))
    }

    fn t(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn test_monitor_rejects_missing_id() {
        let mut correlator = MessageCorrelator::<&str>::new();
        let mut request = keep_alive();
        request.id = MessageId::new("");
        let err = correlator.monitor("finder", &request, Duration::from_secs(5), t(0));
        assert!(matches!(
            err,
            Err(crate::PeerlinkError::Correlator(CorrelatorError::InvalidRequest { .. }))
        ));
    }

    #[test]
    fn test_deliver_resolves_once() {
        let mut correlator = MessageCorrelator::new();
        let request = keep_alive();
        let handle = correlator
            .monitor("finder", &request, Duration::from_secs(5), t(0))
            .unwrap();

        let result = Message::Result(request.success(
            ResponseBody::SessionKeepAlive(SessionKeepAliveResult { expires: Some(500) }),
            t(1),
        ));
        assert!(correlator.deliver(&result));
        assert!(!correlator.deliver(&result));
        assert!(!correlator.is_pending(handle));

        let completion = correlator.pop_ready().unwrap();
        assert_eq!(completion.handle, handle);
        assert_eq!(completion.owner, "finder");
        assert!(completion.outcome.is_ok());
        assert!(correlator.pop_ready().is_none());
    }

    #[test]
    fn test_requests_are_not_delivered() {
        let mut correlator = MessageCorrelator::new();
        let request = keep_alive();
        correlator
            .monitor("finder", &request, Duration::from_secs(5), t(0))
            .unwrap();
        assert!(!correlator.deliver(&Message::Request(request)));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[test]
    fn test_wrong_method_is_error_result() {
        let mut correlator = MessageCorrelator::new();
        let request = keep_alive();
        correlator
            .monitor("finder", &request, Duration::from_secs(5), t(0))
            .unwrap();

        let mut response = request.success(ResponseBody::empty(Method::PeerIdentify), t(1));
        response.id = request.id.clone();
        assert!(correlator.deliver(&Message::Result(response)));
        let completion = correlator.pop_ready().unwrap();
        assert_eq!(completion.outcome.unwrap_err().code, ErrorInfo::BAD_REQUEST);
    }

    #[test]
    fn test_timeout_fires_exactly_once() {
        let mut correlator = MessageCorrelator::new();
        let request = keep_alive();
        let handle = correlator
            .monitor("finder", &request, Duration::from_secs(5), t(0))
            .unwrap();
        assert_eq!(correlator.next_deadline(), Some(t(5)));

        assert_eq!(correlator.expire(t(4)), 0);
        assert_eq!(correlator.expire(t(5)), 1);
        assert_eq!(correlator.expire(t(6)), 0);

        let completion = correlator.pop_ready().unwrap();
        assert_eq!(completion.handle, handle);
        assert!(completion.outcome.unwrap_err().is_timeout());
        assert!(correlator.pop_ready().is_none());
        assert_eq!(correlator.next_deadline(), None);
    }

    #[test]
    fn test_cancel_is_idempotent_and_suppresses_queued_completion() {
        let mut correlator = MessageCorrelator::new();
        let request = keep_alive();
        let handle = correlator
            .monitor("finder", &request, Duration::from_secs(5), t(0))
            .unwrap();

        correlator.expire(t(10));
        assert!(correlator.has_ready());
        assert!(correlator.cancel(handle));
        assert!(!correlator.cancel(handle));
        assert!(correlator.pop_ready().is_none());
    }

    #[test]
    fn test_fail_synthesizes_error() {
        let mut correlator = MessageCorrelator::new();
        let request = keep_alive();
        let handle = correlator
            .monitor("finder", &request, Duration::from_secs(5), t(0))
            .unwrap();
        assert!(correlator.fail(handle, ErrorInfo::send_failed()));
        assert!(!correlator.fail(handle, ErrorInfo::send_failed()));
        let completion = correlator.pop_ready().unwrap();
        assert_eq!(completion.outcome.unwrap_err().code, ErrorInfo::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_cancel_owner() {
        let mut correlator = MessageCorrelator::new();
        correlator
            .monitor("a", &keep_alive(), Duration::from_secs(5), t(0))
            .unwrap();
        correlator
            .monitor("a", &keep_alive(), Duration::from_secs(5), t(0))
            .unwrap();
        let kept = correlator
            .monitor("b", &keep_alive(), Duration::from_secs(5), t(0))
            .unwrap();
        assert_eq!(correlator.cancel_owner(&"a"), 2);
        assert!(correlator.is_pending(kept));
        assert_eq!(correlator.pending_count(), 1);
    }
}
