//! Sliding-window rate limiter (`spec.md` §4.3): three independent 1-minute
//! counters (global, per-peer, dial-data) plus an "ongoing" set that gives
//! each peer at most one in-flight request. A single lock guards all of it,
//! per the concurrency model's requirement that accept/complete be
//! linearizable per peer.

use punch_core::{PeerId, SharedClock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub rpm: usize,
    pub per_peer_rpm: usize,
    pub dial_data_rpm: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { rpm: 60, per_peer_rpm: 12, dial_data_rpm: 12 }
    }
}

struct State {
    global: VecDeque<Instant>,
    per_peer: HashMap<PeerId, VecDeque<Instant>>,
    dial_data: VecDeque<Instant>,
    ongoing: HashSet<PeerId>,
}

/// Plain counters exposed for the embedding binary's own telemetry, not
/// wired to any exporter here.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateLimiterMetrics {
    pub accepted: u64,
    pub rejected: u64,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: SharedClock,
    state: Mutex<State>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(State {
                global: VecDeque::new(),
                per_peer: HashMap::new(),
                dial_data: VecDeque::new(),
                ongoing: HashSet::new(),
            }),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Tries to admit a new request from `peer`. On success the peer is
    /// marked ongoing until [`RateLimiter::complete`] is called.
    pub fn try_accept(&self, peer: PeerId) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut state.global, now);
        prune_map(&mut state.per_peer, now);
        prune(&mut state.dial_data, now);

        if state.ongoing.contains(&peer) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if state.global.len() >= self.config.rpm {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let peer_count = state.per_peer.get(&peer).map(|q| q.len()).unwrap_or(0);
        if peer_count >= self.config.per_peer_rpm {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        state.global.push_back(now);
        state.per_peer.entry(peer).or_default().push_back(now);
        state.ongoing.insert(peer);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Tries to admit a dial-data request, independent of the ongoing flag
    /// (a peer already admitted by `try_accept` may need data once).
    pub fn try_accept_dial_data(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut state.dial_data, now);
        if state.dial_data.len() >= self.config.dial_data_rpm {
            return false;
        }
        state.dial_data.push_back(now);
        true
    }

    pub fn complete(&self, peer: PeerId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.ongoing.remove(&peer);
    }

    pub fn is_ongoing(&self, peer: PeerId) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).ongoing.contains(&peer)
    }
}

fn prune(queue: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = queue.front() {
        if now.duration_since(*front) > WINDOW {
            queue.pop_front();
        } else {
            break;
        }
    }
}

fn prune_map(map: &mut HashMap<PeerId, VecDeque<Instant>>, now: Instant) {
    map.retain(|_, q| {
        prune(q, now);
        !q.is_empty()
    });
}
