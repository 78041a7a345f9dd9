//! Session-owned timers
//!
//! Sessions never sleep. They schedule a deadline here, keep the returned
//! [`TimerId`] and compare it against fired timers handed back by the account.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use peerlink_core::Timestamp;

/// Handle of one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

// ----------------------------------------------------------------------------
// Timer Queue
// ----------------------------------------------------------------------------

/// Deadline-ordered one-shot timers keyed by owner
#[derive(Debug)]
pub struct TimerQueue<O> {
    next_id: u64,
    by_deadline: BTreeMap<(Timestamp, TimerId), O>,
    deadlines: HashMap<TimerId, Timestamp>,
}

impl<O> Default for TimerQueue<O> {
    fn default() -> Self {
        Self {
            next_id: 1,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<O: Clone + PartialEq> TimerQueue<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a one-shot timer firing at `at`
    pub fn schedule(&mut self, owner: O, at: Timestamp) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.by_deadline.insert((at, id), owner);
        self.deadlines.insert(id, at);
        id
    }

    /// Cancel a timer; returns `false` if it already fired or was cancelled
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(at) => self.by_deadline.remove(&(at, id)).is_some(),
            None => false,
        }
    }

    /// Cancel every timer belonging to `owner`
    pub fn cancel_owner(&mut self, owner: &O) -> usize {
        let ids: Vec<TimerId> = self
            .by_deadline
            .iter()
            .filter(|(_, o)| *o == owner)
            .map(|((_, id), _)| *id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.by_deadline.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return every timer due at or before `now`, earliest first
    pub fn pop_due(&mut self, now: Timestamp) -> Vec<(TimerId, O)> {
        let mut due = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, id), owner) = entry.remove_entry();
            self.deadlines.remove(&id);
            due.push((id, owner));
        }
        due
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
