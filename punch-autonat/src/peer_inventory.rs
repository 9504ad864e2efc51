//! Peer inventory (`spec.md` §4.3, §5): tracks which connected peers speak
//! AutoNATv2, recomputed from the host's peer-lifecycle event bus. The set
//! supports O(1) random pick via an index-to-entry mapping with swap-remove
//! on delete, the same trick the rate limiter's sibling components use to
//! avoid O(n) eviction.

use punch_core::host::{Connectedness, PeerEvent};
use punch_core::PeerId;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

#[derive(Default)]
struct Inventory {
    entries: Vec<PeerId>,
    index: HashMap<PeerId, usize>,
    supports_autonatv2: HashMap<PeerId, bool>,
    connected: HashMap<PeerId, bool>,
}

impl Inventory {
    fn recompute(&mut self, peer: PeerId) {
        let eligible = self.supports_autonatv2.get(&peer).copied().unwrap_or(false)
            && self.connected.get(&peer).copied().unwrap_or(false);
        let present = self.index.contains_key(&peer);
        match (eligible, present) {
            (true, false) => {
                self.index.insert(peer, self.entries.len());
                self.entries.push(peer);
            }
            (false, true) => {
                let idx = self.index.remove(&peer).expect("checked present");
                let last = self.entries.len() - 1;
                self.entries.swap(idx, last);
                self.entries.pop();
                if idx < self.entries.len() {
                    let moved = self.entries[idx];
                    self.index.insert(moved, idx);
                }
            }
            _ => {}
        }
    }
}

pub struct PeerInventory {
    inventory: Mutex<Inventory>,
}

impl PeerInventory {
    pub fn new() -> Self {
        Self { inventory: Mutex::new(Inventory::default()) }
    }

    pub fn apply(&self, event: &PeerEvent) {
        let mut inv = self.inventory.lock().unwrap_or_else(|e| e.into_inner());
        match *event {
            PeerEvent::ProtocolsUpdated { peer, supports_autonatv2 } => {
                inv.supports_autonatv2.insert(peer, supports_autonatv2);
                inv.recompute(peer);
            }
            PeerEvent::ConnectednessChanged { peer, connectedness } => {
                inv.connected.insert(peer, connectedness == Connectedness::Connected);
                inv.recompute(peer);
            }
            PeerEvent::IdentificationCompleted { .. } => {}
        }
    }

    /// Runs `apply` for every event the bus delivers until the sender is dropped.
    pub async fn run(&self, mut rx: broadcast::Receiver<PeerEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.apply(&event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inventory.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks a peer at random from the set of connected peers known to
    /// speak AutoNATv2 (client flow step 1).
    pub fn pick_random(&self) -> Option<PeerId> {
        let inv = self.inventory.lock().unwrap_or_else(|e| e.into_inner());
        if inv.entries.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..inv.entries.len());
        Some(inv.entries[idx])
    }
}

impl Default for PeerInventory {
    fn default() -> Self {
        Self::new()
    }
}
