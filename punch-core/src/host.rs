//! The host/peerstore/event-bus abstractions the core *consumes* but does not
//! define the internals of (`spec.md` §6). Identity, connection management
//! and the transport dial path live outside this core; these traits are the
//! seam the four subsystems are written against, mirroring how
//! `nyx-transport::PacketHandler` is the seam between the socket loop and
//! whatever sits above it.

use crate::addr::Addr;
use crate::peer_id::PeerId;
use async_trait::async_trait;
use std::time::Duration;

/// Network-level reachability of a peer, as tracked by the embedding host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectedness {
    NotConnected,
    Connected,
    CanConnect,
    CannotConnect,
}

/// Everything a protocol handler needs from the embedding libp2p-style host.
#[async_trait]
pub trait Host: Send + Sync {
    /// Opens a new outbound stream to `peer`, offering `protocols` in order
    /// of preference; the returned stream has already completed multistream
    /// negotiation down to the accepted protocol id.
    async fn new_stream(&self, peer: PeerId, protocols: &[&str]) -> std::io::Result<(String, Box<dyn StreamLike>)>;

    /// Registers a handler for `protocol`; returns a token usable with
    /// `remove_handler`. Mutations go through a single writer, per §5.
    fn set_handler(&self, protocol: &str, handler: std::sync::Arc<dyn StreamHandler>);

    fn remove_handler(&self, protocol: &str);

    fn connectedness(&self, peer: PeerId) -> Connectedness;

    /// True if a non-relayed connection to `peer` currently exists.
    fn has_direct_connection(&self, peer: PeerId) -> bool;
}

/// A minimal stand-in for the concrete async stream type so this core does
/// not need to name a specific transport's connection type.
pub trait StreamLike: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin> StreamLike for T {}

#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, peer: PeerId, protocol: &str, stream: Box<dyn StreamLike>);
}

/// Peerstore seam: addresses learned about a peer, each with a TTL.
#[async_trait]
pub trait PeerStore: Send + Sync {
    async fn add_addrs(&self, peer: PeerId, addrs: Vec<Addr>, ttl: Duration);
    async fn addrs(&self, peer: PeerId) -> Vec<Addr>;
}

/// Peer-lifecycle events the AutoNATv2 peer inventory (§4.3) subscribes to.
#[derive(Debug, Clone, Copy)]
pub enum PeerEvent {
    ProtocolsUpdated { peer: PeerId, supports_autonatv2: bool },
    ConnectednessChanged { peer: PeerId, connectedness: Connectedness },
    IdentificationCompleted { peer: PeerId },
}

/// One broadcast channel per event family, per the design note preferring
/// channels over callback-list registries with manual add/remove.
pub type EventBus = tokio::sync::broadcast::Sender<PeerEvent>;

pub fn new_event_bus(capacity: usize) -> EventBus {
    tokio::sync::broadcast::channel(capacity).0
}
