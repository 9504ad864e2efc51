//! Initiator state machine (`spec.md` §4.4): the peer that decides it wants
//! direct connectivity opens the DCUtR stream and drives the CONNECT /
//! CONNECT / SYNC exchange, retrying the whole exchange up to
//! `config.max_retries` times before giving up.

use crate::cancel::CancelToken;
use crate::config::DcutrConfig;
use crate::dialer::{race_dials, DirectDialer};
use crate::error::{Error, Result};
use crate::filter::{filter_addrs, AddrFilter};
use crate::framing::{read_framed, write_framed};
use crate::wire::{HolePunch, HolePunchType};
use bytes::Bytes;
use punch_core::host::Host;
use punch_core::{Addr, PeerId};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::sleep;

pub const PROTOCOL_ID: &str = "/libp2p/dcutr/1.0.0";

/// Opens the DCUtR stream over an existing relayed connection and runs the
/// initiator exchange. Returns [`Error::AlreadyDirect`] without opening a
/// stream if a direct connection already exists, per the step-1 guard.
pub async fn initiate<H: Host + ?Sized>(
    host: &H,
    peer: PeerId,
    local_addrs: &[Addr],
    filter: &dyn AddrFilter,
    dialer: Arc<dyn DirectDialer>,
    cancel: &mut CancelToken,
    config: &DcutrConfig,
) -> Result<()> {
    if host.has_direct_connection(peer) {
        return Err(Error::AlreadyDirect);
    }
    let (_, mut stream) = host.new_stream(peer, &[PROTOCOL_ID]).await?;
    run_initiator_exchange(stream.as_mut(), peer, local_addrs, filter, &dialer, cancel, config).await
}

/// The retry loop and per-attempt exchange, independent of how the stream
/// was obtained, so it can be driven directly in tests.
pub async fn run_initiator_exchange<S>(
    stream: &mut S,
    peer: PeerId,
    local_addrs: &[Addr],
    filter: &dyn AddrFilter,
    dialer: &Arc<dyn DirectDialer>,
    cancel: &mut CancelToken,
    config: &DcutrConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let filtered = filter_addrs(local_addrs, filter);
    let mut last_err = Error::AllDialsFailed;
    for _ in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match single_attempt(stream, peer, &filtered, dialer, cancel, config).await {
            Ok(()) => return Ok(()),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

async fn single_attempt<S>(
    stream: &mut S,
    peer: PeerId,
    filtered: &[Addr],
    dialer: &Arc<dyn DirectDialer>,
    cancel: &mut CancelToken,
    config: &DcutrConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let t0 = Instant::now();
    let local_encoded: Vec<Bytes> = filtered.iter().map(|a| Bytes::from(a.to_bytes())).collect();
    write_framed(stream, &HolePunch::connect(local_encoded).encode()).await?;

    let remote_msg = HolePunch::decode(&read_framed(stream, config.max_message_len).await?)?;
    if remote_msg.typ != Some(HolePunchType::Connect) {
        return Err(Error::ProtocolViolation("expected CONNECT in reply".into()));
    }
    let rtt_half = t0.elapsed() / 2;

    write_framed(stream, &HolePunch::sync().encode()).await?;
    sleep(rtt_half).await;

    let remote_addrs: Vec<Addr> = remote_msg.obs_addrs.iter().filter_map(|b| Addr::from_bytes(b).ok()).collect();
    race_dials(dialer, peer, &remote_addrs, config.dial_timeout, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelRegistry;
    use crate::filter::AllowAll;
    use punch_core::addr::Protocol;
    use tokio::io::duplex;

    fn peer() -> PeerId {
        PeerId::from_bytes([3u8; 32])
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

    struct AlwaysFails;
    #[async_trait::async_trait]
    impl DirectDialer for AlwaysFails {
        async fn dial(&self, _peer: PeerId, _addr: &Addr) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn succeeds_after_responder_echoes_connect_and_sync() {
        let (mut initiator_side, mut responder_side) = duplex(1 << 16);
        let config = DcutrConfig::default();
        let dialer: Arc<dyn DirectDialer> = Arc::new(SucceedsAlways);
        let registry = CancelRegistry::new();
        let mut cancel = registry.token_for(peer());

        let responder_task = tokio::spawn(async move {
            let request = HolePunch::decode(&read_framed(&mut responder_side, 4096).await.unwrap()).unwrap();
            assert_eq!(request.typ, Some(HolePunchType::Connect));
            write_framed(&mut responder_side, &HolePunch::connect(vec![Bytes::from(addr(9).to_bytes())]).encode()).await.unwrap();
            let sync = HolePunch::decode(&read_framed(&mut responder_side, 4096).await.unwrap()).unwrap();
            assert_eq!(sync.typ, Some(HolePunchType::Sync));
        });

        let result = run_initiator_exchange(&mut initiator_side, peer(), &[addr(1)], &AllowAll, &dialer, &mut cancel, &config).await;
        responder_task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exhausts_retries_when_every_dial_fails() {
        let (mut initiator_side, mut responder_side) = duplex(1 << 16);
        let config = DcutrConfig { max_retries: 1, dial_timeout: std::time::Duration::from_millis(50), ..DcutrConfig::default() };
        let dialer: Arc<dyn DirectDialer> = Arc::new(AlwaysFails);
        let registry = CancelRegistry::new();
        let mut cancel = registry.token_for(peer());

        let responder_task = tokio::spawn(async move {
            for _ in 0..=1 {
                let _req = read_framed(&mut responder_side, 4096).await.unwrap();
                write_framed(&mut responder_side, &HolePunch::connect(vec![Bytes::from(addr(9).to_bytes())]).encode()).await.unwrap();
                let _sync = read_framed(&mut responder_side, 4096).await.unwrap();
            }
        });

        let result = run_initiator_exchange(&mut initiator_side, peer(), &[addr(1)], &AllowAll, &dialer, &mut cancel, &config).await;
        responder_task.await.unwrap();
        assert!(matches!(result, Err(Error::AllDialsFailed)));
    }
}
