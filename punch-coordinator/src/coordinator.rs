//! The single "dial by peer id" operation (`spec.md` §4.5) that glues NAT
//! behavior classification, AutoNATv2 (consulted upstream by whoever feeds
//! the tracker) and DCUtR together.

use crate::error::Result;
use async_trait::async_trait;
use punch_core::{Addr, PeerId};
use punch_dcutr::{AddrFilter, CancelRegistry, DcutrConfig, DirectDialer};
use punch_nat::{choose_strategy, NatBehavior, Strategy, Tracker};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    Direct,
    Relayed,
}

/// What the coordinator needs from the embedding host's transport layer,
/// kept separate from [`punch_core::host::Host`] since dialing (as opposed
/// to opening an already-connected stream) is transport-specific and out of
/// this core's scope.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial_direct(&self, peer: PeerId) -> Result<()>;
    /// Ensures a relayed connection exists, establishing one if needed.
    async fn ensure_relayed(&self, peer: PeerId) -> Result<()>;
}

/// Bundles everything [`DcutrContext::attempt`] needs to run one DCUtR
/// initiator exchange for a peer.
pub struct DcutrContext {
    pub host: Arc<dyn punch_core::host::Host>,
    pub local_addrs: Arc<dyn Fn() -> Vec<Addr> + Send + Sync>,
    pub filter: Arc<dyn AddrFilter>,
    pub dialer: Arc<dyn DirectDialer>,
    pub cancel_registry: Arc<CancelRegistry>,
    pub config: DcutrConfig,
}

impl DcutrContext {
    pub async fn attempt(&self, peer: PeerId) -> punch_dcutr::Result<()> {
        let mut cancel = self.cancel_registry.token_for(peer);
        let addrs = (self.local_addrs)();
        punch_dcutr::initiate(self.host.as_ref(), peer, &addrs, self.filter.as_ref(), self.dialer.clone(), &mut cancel, &self.config).await
    }
}

/// Dials `peer`, choosing a strategy from the tracker's current NAT
/// behavior record (treated as fully unknown, hence relayed, if no
/// discovery has completed yet).
///
/// This is the one place in the workspace that returns `anyhow::Result`
/// rather than the crate's own `Error`: it is glue code sitting at the top
/// of the call graph, with nothing downstream left to match on the
/// specific variant.
pub async fn dial_peer<T: Transport + ?Sized>(transport: &T, tracker: &Tracker, peer: PeerId, dcutr: &DcutrContext) -> anyhow::Result<DialOutcome> {
    let behavior = tracker.current().await.unwrap_or_else(NatBehavior::unknown);
    let strategy = choose_strategy(behavior.mapping, behavior.filtering);
    match strategy {
        Strategy::Direct => {
            transport.dial_direct(peer).await?;
            Ok(DialOutcome::Direct)
        }
        Strategy::Relayed => {
            transport.ensure_relayed(peer).await?;
            Ok(DialOutcome::Relayed)
        }
        Strategy::UdpHolePunch | Strategy::TcpHolePunch => {
            transport.ensure_relayed(peer).await?;
            match dcutr.attempt(peer).await {
                Ok(()) => Ok(DialOutcome::Direct),
                Err(_) => Ok(DialOutcome::Relayed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punch_core::clock::test_util::ManualClock;
    use punch_core::host::{Connectedness, Host, StreamLike};
    use punch_core::{InMemoryStorage, PeerId};
    use punch_dcutr::AllowAll;
    use punch_nat::{Classification, TrackerConfig};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn peer() -> PeerId {
        PeerId::from_bytes([8u8; 32])
    }

    struct RecordingTransport {
        direct_called: AtomicBool,
        relayed_called: AtomicBool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn dial_direct(&self, _peer: PeerId) -> Result<()> {
            self.direct_called.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn ensure_relayed(&self, _peer: PeerId) -> Result<()> {
            self.relayed_called.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoOpHost;
    #[async_trait]
    impl Host for NoOpHost {
        async fn new_stream(&self, _peer: PeerId, _protocols: &[&str]) -> std::io::Result<(String, Box<dyn StreamLike>)> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no transport in this harness"))
        }
        fn set_handler(&self, _protocol: &str, _handler: Arc<dyn punch_core::host::StreamHandler>) {}
        fn remove_handler(&self, _protocol: &str) {}
        fn connectedness(&self, _peer: PeerId) -> Connectedness {
            Connectedness::Connected
        }
        fn has_direct_connection(&self, _peer: PeerId) -> bool {
            false
        }
    }

    struct NeverDials;
    #[async_trait]
    impl DirectDialer for NeverDials {
        async fn dial(&self, _peer: PeerId, _addr: &Addr) -> bool {
            false
        }
    }

    fn dcutr_context() -> DcutrContext {
        DcutrContext {
            host: Arc::new(NoOpHost),
            local_addrs: Arc::new(|| Vec::new()),
            filter: Arc::new(AllowAll),
            dialer: Arc::new(NeverDials),
            cancel_registry: Arc::new(CancelRegistry::new()),
            config: DcutrConfig::default(),
        }
    }

    async fn tracker_with(mapping: Classification, filtering: Classification) -> Arc<Tracker> {
        let tracker = Tracker::new(ManualClock::new(), Arc::new(InMemoryStorage::new()), TrackerConfig::default());
        let mut behavior = NatBehavior::unknown();
        behavior.mapping = mapping;
        behavior.filtering = filtering;
        tracker.record(behavior).await.unwrap();
        tracker
    }

    #[tokio::test]
    async fn direct_strategy_dials_directly() {
        let tracker = tracker_with(Classification::EndpointIndependent, Classification::EndpointIndependent).await;
        let transport = RecordingTransport { direct_called: AtomicBool::new(false), relayed_called: AtomicBool::new(false) };
        let dcutr = dcutr_context();

        let outcome = dial_peer(&transport, &tracker, peer(), &dcutr).await.unwrap();
        assert_eq!(outcome, DialOutcome::Direct);
        assert!(transport.direct_called.load(Ordering::SeqCst));
        assert!(!transport.relayed_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_strategy_falls_back_to_relayed_without_a_tracker_record() {
        let tracker = Tracker::new(ManualClock::new(), Arc::new(InMemoryStorage::new()), TrackerConfig::default());
        let transport = RecordingTransport { direct_called: AtomicBool::new(false), relayed_called: AtomicBool::new(false) };
        let dcutr = dcutr_context();

        let outcome = dial_peer(&transport, &tracker, peer(), &dcutr).await.unwrap();
        assert_eq!(outcome, DialOutcome::Relayed);
        assert!(transport.relayed_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn hole_punch_strategy_falls_back_to_relayed_when_dcutr_fails() {
        let tracker = tracker_with(Classification::AddressDependent, Classification::EndpointIndependent).await;
        let transport = RecordingTransport { direct_called: AtomicBool::new(false), relayed_called: AtomicBool::new(false) };
        let dcutr = dcutr_context();

        let outcome = dial_peer(&transport, &tracker, peer(), &dcutr).await.unwrap();
        assert_eq!(outcome, DialOutcome::Relayed);
        assert!(transport.relayed_called.load(Ordering::SeqCst));
    }
}
