//! Per-peer cancellation (`spec.md` §5): establishing a direct connection to
//! a peer by any mechanism cancels every concurrent DCUtR dial attempt for
//! that same peer. A `watch` channel per peer is the signal, matching the
//! workspace's general preference for channels over callback registries.

use punch_core::PeerId;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;

pub struct CancelRegistry {
    senders: Mutex<HashMap<PeerId, watch::Sender<bool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self { senders: Mutex::new(HashMap::new()) }
    }

    /// Returns a token that resolves once `cancel(peer)` is called. Multiple
    /// concurrent dial attempts for the same peer share the same channel.
    pub fn token_for(&self, peer: PeerId) -> CancelToken {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        let sender = senders.entry(peer).or_insert_with(|| watch::channel(false).0);
        CancelToken(sender.subscribe())
    }

    /// Signals that a direct connection to `peer` now exists; every
    /// outstanding token for that peer observes the cancellation.
    pub fn cancel(&self, peer: PeerId) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = senders.remove(&peer) {
            let _ = sender.send(true);
        }
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn cancelled(&mut self) {
        while !*self.0.borrow() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}
