//! Responder state machine (`spec.md` §4.4): no RTT wait (that estimate
//! belongs to the initiator), dials as soon as SYNC arrives, and does not
//! retry the exchange itself.

use crate::cancel::CancelToken;
use crate::config::DcutrConfig;
use crate::dialer::{race_dials, DirectDialer};
use crate::error::{Error, Result};
use crate::filter::{filter_addrs, AddrFilter};
use crate::framing::{read_framed, write_framed};
use crate::wire::{HolePunch, HolePunchType};
use bytes::Bytes;
use punch_core::{Addr, PeerId};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub async fn respond<S>(
    stream: &mut S,
    peer: PeerId,
    local_addrs: &[Addr],
    filter: &dyn AddrFilter,
    dialer: Arc<dyn DirectDialer>,
    cancel: &mut CancelToken,
    config: &DcutrConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request = HolePunch::decode(&read_framed(stream, config.max_message_len).await?)?;
    if request.typ != Some(HolePunchType::Connect) {
        return Err(Error::ProtocolViolation("expected CONNECT".into()));
    }

    let filtered = filter_addrs(local_addrs, filter);
    let local_encoded: Vec<Bytes> = filtered.iter().map(|a| Bytes::from(a.to_bytes())).collect();
    write_framed(stream, &HolePunch::connect(local_encoded).encode()).await?;

    let sync = HolePunch::decode(&read_framed(stream, config.max_message_len).await?)?;
    if sync.typ != Some(HolePunchType::Sync) {
        return Err(Error::ProtocolViolation("expected SYNC".into()));
    }

    let remote_addrs: Vec<Addr> = request.obs_addrs.iter().filter_map(|b| Addr::from_bytes(b).ok()).collect();
    race_dials(&dialer, peer, &remote_addrs, config.dial_timeout, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelRegistry;
    use crate::filter::AllowAll;
    use punch_core::addr::Protocol;
    use tokio::io::duplex;

    fn peer() -> PeerId {
        PeerId::from_bytes([5u8; 32])
    }

    fn addr(port: u16) -> Addr {
        Addr::new(vec![Protocol::Ip4("198.51.100.5".parse().unwrap()), Protocol::Tcp(port)]).unwrap()
    }

    struct SucceedsAlways;
    #[async_trait::async_trait]
    impl DirectDialer for SucceedsAlways {
        async fn dial(&self, _peer: PeerId, _addr: &Addr) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn replies_with_connect_then_dials_after_sync() {
        let (mut responder_side, mut initiator_side) = duplex(1 << 16);
        let config = DcutrConfig::default();
        let dialer: Arc<dyn DirectDialer> = Arc::new(SucceedsAlways);
        let registry = CancelRegistry::new();
        let mut cancel = registry.token_for(peer());

        let initiator_task = tokio::spawn(async move {
            write_framed(&mut initiator_side, &HolePunch::connect(vec![Bytes::from(addr(1).to_bytes())]).encode()).await.unwrap();
            let reply = HolePunch::decode(&read_framed(&mut initiator_side, 4096).await.unwrap()).unwrap();
            assert_eq!(reply.typ, Some(HolePunchType::Connect));
            write_framed(&mut initiator_side, &HolePunch::sync().encode()).await.unwrap();
        });

        let result = respond(&mut responder_side, peer(), &[addr(2)], &AllowAll, dialer, &mut cancel, &config).await;
        initiator_task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_wrong_first_message_type() {
        let (mut responder_side, mut initiator_side) = duplex(1 << 16);
        let config = DcutrConfig::default();
        let dialer: Arc<dyn DirectDialer> = Arc::new(SucceedsAlways);
        let registry = CancelRegistry::new();
        let mut cancel = registry.token_for(peer());

        let initiator_task = tokio::spawn(async move {
            write_framed(&mut initiator_side, &HolePunch::sync().encode()).await.unwrap();
        });

        let result = respond(&mut responder_side, peer(), &[addr(2)], &AllowAll, dialer, &mut cancel, &config).await;
        initiator_task.await.unwrap();
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }
}
