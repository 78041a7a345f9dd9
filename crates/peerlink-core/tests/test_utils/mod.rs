//! Test utilities for deterministic testing of the peerlink core
//!
//! Mock time and a seeded RNG so that peer files and deadlines are
//! reproducible across runs.

#![allow(dead_code)]

use peerlink_core::{FindSecret, PeerFiles, TimeSource, Timestamp};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at a specific time in milliseconds
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(secs * 1000);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Deterministic Identities
// ----------------------------------------------------------------------------

/// Seeded RNG so generated keys are stable
pub fn seeded_rng(seed: u8) -> ChaCha8Rng {
    ChaCha8Rng::from_seed([seed; 32])
}

/// Peer files with a fixed find secret and seeded key
pub fn peer_files(domain: &str, secret: &str, seed: u8) -> PeerFiles {
    PeerFiles::generate_with_secret(domain, FindSecret::new(secret), &mut seeded_rng(seed))
}
