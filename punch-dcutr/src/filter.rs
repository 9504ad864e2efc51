//! Address filtering before a `CONNECT` is sent (`spec.md` §4.4): strips
//! anything privately/loopback-addressed or still carrying a relay marker,
//! then lets a caller-supplied [`AddrFilter`] restrict the set further.

use punch_core::Addr;

/// A caller-supplied additional restriction on which observed addresses are
/// worth offering to a peer (e.g. "only addresses on our advertised subnet").
pub trait AddrFilter: Send + Sync {
    fn allows(&self, addr: &Addr) -> bool;
}

/// Accepts everything the mandatory filtering step already let through.
pub struct AllowAll;

impl AddrFilter for AllowAll {
    fn allows(&self, _addr: &Addr) -> bool {
        true
    }
}

/// Applies the mandatory relay-marker-stripping and private/loopback removal,
/// then the optional filter.
pub fn filter_addrs(addrs: &[Addr], filter: &dyn AddrFilter) -> Vec<Addr> {
    addrs
        .iter()
        .filter(|a| !a.is_private_or_loopback())
        .map(|a| a.without_circuit_marker())
        .filter(|a| !a.is_relayed())
        .filter(|a| filter.allows(a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use punch_core::addr::Protocol;

    fn addr(components: Vec<Protocol>) -> Addr {
        Addr::new(components).unwrap()
    }

    #[test]
    fn strips_private_and_loopback_addresses() {
        let loopback = addr(vec![Protocol::Ip4("127.0.0.1".parse().unwrap()), Protocol::Tcp(4001)]);
        let private = addr(vec![Protocol::Ip4("10.0.0.5".parse().unwrap()), Protocol::Tcp(4001)]);
        let public = addr(vec![Protocol::Ip4("198.51.100.5".parse().unwrap()), Protocol::Tcp(4001)]);
        let filtered = filter_addrs(&[loopback, private, public.clone()], &AllowAll);
        assert_eq!(filtered, vec![public]);
    }

    #[test]
    fn strips_relay_marker_and_anything_still_relayed_after() {
        let relayed = addr(vec![
            Protocol::Ip4("198.51.100.5".parse().unwrap()),
            Protocol::Tcp(4001),
            Protocol::P2pCircuit,
            Protocol::P2p(punch_core::PeerId::from_bytes([9u8; 32])),
        ]);
        let filtered = filter_addrs(&[relayed], &AllowAll);
        assert_eq!(filtered.len(), 1);
        assert!(!filtered[0].is_relayed());
    }

    struct DenyAll;
    impl AddrFilter for DenyAll {
        fn allows(&self, _addr: &Addr) -> bool {
            false
        }
    }

    #[test]
    fn custom_filter_can_restrict_further() {
        let public = addr(vec![Protocol::Ip4("198.51.100.5".parse().unwrap()), Protocol::Tcp(4001)]);
        assert!(filter_addrs(&[public], &DenyAll).is_empty());
    }
}
