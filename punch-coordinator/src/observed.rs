//! Observed-address aggregator (`spec.md` §4.5, §5): buckets what peers
//! report seeing as our local address, grouped by the local thin-waist a
//! connection arrived on, and promotes an external address to advertisable
//! once enough distinct observers agree on it. A single writer task drains a
//! bounded observation queue; readers take a point-in-time snapshot under a
//! shared read lock, per the concurrency model's read/write split for this
//! component.
//!
//! Observers are deduplicated by network prefix of their reported source
//! address (IPv4 /32, IPv6 /56, per the glossary's "Observer" entry) rather
//! than by peer id, so a single actor holding many identities on the same
//! network cannot inflate the observer count for an address.

use punch_core::addr::Protocol;
use punch_core::{Addr, PeerId};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

pub const ACTIVATION_THRESHOLD: usize = 4;
pub const MAX_EXTERNAL_PER_LOCAL: usize = 3;
const QUEUE_CAPACITY: usize = 16;
const IPV6_OBSERVER_PREFIX_BITS: u32 = 56;

/// The network-prefix key observers are deduplicated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObserverKey {
    V4(u32),
    V6(u128),
}

impl ObserverKey {
    fn from_addr(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v) => ObserverKey::V4(u32::from(v)),
            IpAddr::V6(v) => {
                let prefix_mask = !0u128 << (128 - IPV6_OBSERVER_PREFIX_BITS);
                ObserverKey::V6(u128::from(v) & prefix_mask)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportKind {
    Tcp,
    Udp,
}

/// A hashable, orderable stand-in for an address' (ip, port, transport)
/// thin waist, used as the bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThinWaist {
    pub ip: IpAddr,
    pub port: u16,
    pub transport: TransportKind,
}

impl ThinWaist {
    pub fn from_addr(addr: &Addr) -> Option<Self> {
        let (ip_proto, port_proto) = addr.thin_waist()?;
        let ip = match ip_proto {
            Protocol::Ip4(v) => IpAddr::V4(v),
            Protocol::Ip6(v) => IpAddr::V6(v),
            _ => return None,
        };
        let (transport, port) = match port_proto {
            Protocol::Tcp(p) => (TransportKind::Tcp, p),
            Protocol::Udp(p) => (TransportKind::Udp, p),
            _ => return None,
        };
        Some(Self { ip, port, transport })
    }
}

/// What the identify subsystem reports for a single inbound connection.
#[derive(Debug, Clone)]
pub struct Observation {
    pub local_addr: Addr,
    pub observed_external_addr: Addr,
    pub observer: PeerId,
    pub observer_addr: IpAddr,
}

#[derive(Default)]
struct LocalBucket {
    externals: HashMap<ThinWaist, (Addr, HashSet<ObserverKey>)>,
    total_observations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatTypeInference {
    Undetermined,
    Cone,
    Symmetric,
}

pub struct ObservedAddrAggregator {
    state: Arc<RwLock<HashMap<ThinWaist, LocalBucket>>>,
    tx: mpsc::Sender<Observation>,
}

impl ObservedAddrAggregator {
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let state: Arc<RwLock<HashMap<ThinWaist, LocalBucket>>> = Arc::new(RwLock::new(HashMap::new()));
        let worker_state = state.clone();
        let handle = tokio::spawn(run_worker(rx, worker_state));
        (Self { state, tx }, handle)
    }

    /// Enqueues an observation for the writer task. Never blocks: if the
    /// queue is at its capacity of 16, or the worker has gone away, the
    /// observation is silently dropped rather than backpressuring the
    /// caller (the identify subsystem reporting inbound connections has no
    /// business waiting on this).
    pub fn report(&self, observation: Observation) {
        let _ = self.tx.try_send(observation);
    }

    /// The top (up to [`MAX_EXTERNAL_PER_LOCAL`]) external addresses for
    /// `local` that have reached [`ACTIVATION_THRESHOLD`] distinct observers,
    /// ordered by observer count descending, ties broken by address order.
    pub async fn advertisable_addrs(&self, local: &Addr) -> Vec<Addr> {
        let Some(key) = ThinWaist::from_addr(local) else { return Vec::new() };
        let state = self.state.read().await;
        let Some(bucket) = state.get(&key) else { return Vec::new() };
        top_external_addrs(bucket)
    }

    /// Infers the whole-node NAT type for `local`'s transport family from
    /// observation dispersion, once enough observations have accumulated.
    pub async fn nat_type(&self, local: &Addr) -> NatTypeInference {
        let Some(key) = ThinWaist::from_addr(local) else { return NatTypeInference::Undetermined };
        let state = self.state.read().await;
        let Some(bucket) = state.get(&key) else { return NatTypeInference::Undetermined };
        let required = (3 * MAX_EXTERNAL_PER_LOCAL) as u64;
        if bucket.total_observations < required {
            return NatTypeInference::Undetermined;
        }
        let mut counts: Vec<u64> = bucket.externals.values().map(|(_, observers)| observers.len() as u64).collect();
        counts.sort_unstable_by(|a, b| b.cmp(a));
        let top3: u64 = counts.iter().take(3).sum();
        if top3 * 2 >= bucket.total_observations {
            NatTypeInference::Cone
        } else {
            NatTypeInference::Symmetric
        }
    }
}

fn top_external_addrs(bucket: &LocalBucket) -> Vec<Addr> {
    let mut entries: Vec<(&ThinWaist, &Addr, usize)> =
        bucket.externals.iter().map(|(key, (addr, observers))| (key, addr, observers.len())).collect();
    entries.retain(|(_, _, count)| *count >= ACTIVATION_THRESHOLD);
    entries.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().take(MAX_EXTERNAL_PER_LOCAL).map(|(_, addr, _)| addr.clone()).collect()
}

async fn run_worker(mut rx: mpsc::Receiver<Observation>, state: Arc<RwLock<HashMap<ThinWaist, LocalBucket>>>) {
    while let Some(obs) = rx.recv().await {
        let Some(local_key) = ThinWaist::from_addr(&obs.local_addr) else { continue };
        let Some(external_key) = ThinWaist::from_addr(&obs.observed_external_addr) else { continue };
        let mut state = state.write().await;
        let bucket = state.entry(local_key).or_default();
        bucket.total_observations += 1;
        let entry = bucket.externals.entry(external_key).or_insert_with(|| (obs.observed_external_addr.clone(), HashSet::new()));
        entry.1.insert(ObserverKey::from_addr(obs.observer_addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punch_core::addr::Protocol;

    fn local() -> Addr {
        Addr::new(vec![Protocol::Ip4("10.0.0.5".parse().unwrap()), Protocol::Tcp(4001)]).unwrap()
    }

    fn external(port: u16) -> Addr {
        Addr::new(vec![Protocol::Ip4("198.51.100.5".parse().unwrap()), Protocol::Tcp(port)]).unwrap()
    }

    fn peer(b: u8) -> PeerId {
        PeerId::from_bytes([b; 32])
    }

    /// A distinct /32 for each `b`, so observer counts behave as "distinct
    /// observers" the way the old peer-id-keyed tests expected.
    fn observer_ip(b: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, b))
    }

    #[tokio::test]
    async fn promotes_address_once_activation_threshold_reached() {
        let (agg, _handle) = ObservedAddrAggregator::spawn();
        for b in 1..ACTIVATION_THRESHOLD as u8 {
            agg.report(Observation { local_addr: local(), observed_external_addr: external(9), observer: peer(b), observer_addr: observer_ip(b) });
        }
        // wait for worker to drain
        tokio::task::yield_now().await;
        assert!(agg.advertisable_addrs(&local()).await.is_empty());

        agg.report(Observation {
            local_addr: local(),
            observed_external_addr: external(9),
            observer: peer(ACTIVATION_THRESHOLD as u8),
            observer_addr: observer_ip(ACTIVATION_THRESHOLD as u8),
        });
        tokio::task::yield_now().await;
        let advertised = wait_for(&agg, &local(), |addrs| !addrs.is_empty()).await;
        assert_eq!(advertised, vec![external(9)]);
    }

    #[tokio::test]
    async fn repeated_observations_from_the_same_network_do_not_count_twice() {
        let (agg, _handle) = ObservedAddrAggregator::spawn();
        for _ in 0..ACTIVATION_THRESHOLD + 2 {
            agg.report(Observation { local_addr: local(), observed_external_addr: external(9), observer: peer(1), observer_addr: observer_ip(1) });
        }
        tokio::task::yield_now().await;
        assert!(agg.advertisable_addrs(&local()).await.is_empty());
    }

    #[tokio::test]
    async fn caps_advertisable_set_and_breaks_ties_lexicographically() {
        let (agg, _handle) = ObservedAddrAggregator::spawn();
        for port in [1u16, 2, 3, 4] {
            for b in 0..ACTIVATION_THRESHOLD as u8 {
                let id = b + port as u8 * 10;
                agg.report(Observation { local_addr: local(), observed_external_addr: external(port), observer: peer(id), observer_addr: observer_ip(id) });
            }
        }
        let advertised = wait_for(&agg, &local(), |addrs| addrs.len() == MAX_EXTERNAL_PER_LOCAL).await;
        assert_eq!(advertised.len(), MAX_EXTERNAL_PER_LOCAL);
    }

    #[tokio::test]
    async fn nat_type_is_undetermined_below_threshold() {
        let (agg, _handle) = ObservedAddrAggregator::spawn();
        agg.report(Observation { local_addr: local(), observed_external_addr: external(1), observer: peer(1), observer_addr: observer_ip(1) });
        tokio::task::yield_now().await;
        assert_eq!(agg.nat_type(&local()).await, NatTypeInference::Undetermined);
    }

    #[tokio::test]
    async fn nat_type_classifies_cone_when_mass_concentrated() {
        let (agg, _handle) = ObservedAddrAggregator::spawn();
        for b in 0..9u8 {
            agg.report(Observation { local_addr: local(), observed_external_addr: external(1), observer: peer(b), observer_addr: observer_ip(b) });
        }
        let inferred = wait_for_nat_type(&agg, &local()).await;
        assert_eq!(inferred, NatTypeInference::Cone);
    }

    #[tokio::test]
    async fn nat_type_classifies_symmetric_when_mass_dispersed() {
        let (agg, _handle) = ObservedAddrAggregator::spawn();
        for port in 0..9u16 {
            let id = port as u8;
            agg.report(Observation { local_addr: local(), observed_external_addr: external(100 + port), observer: peer(id), observer_addr: observer_ip(id) });
        }
        let inferred = wait_for_nat_type(&agg, &local()).await;
        assert_eq!(inferred, NatTypeInference::Symmetric);
    }

    async fn wait_for(agg: &ObservedAddrAggregator, local: &Addr, pred: impl Fn(&[Addr]) -> bool) -> Vec<Addr> {
        for _ in 0..50 {
            let addrs = agg.advertisable_addrs(local).await;
            if pred(&addrs) {
                return addrs;
            }
            tokio::task::yield_now().await;
        }
        agg.advertisable_addrs(local).await
    }

    async fn wait_for_nat_type(agg: &ObservedAddrAggregator, local: &Addr) -> NatTypeInference {
        for _ in 0..50 {
            let inferred = agg.nat_type(local).await;
            if inferred != NatTypeInference::Undetermined {
                return inferred;
            }
            tokio::task::yield_now().await;
        }
        agg.nat_type(local).await
    }
}
