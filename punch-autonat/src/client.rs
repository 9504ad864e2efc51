//! AutoNATv2 client flow (`spec.md` §4.3): sends a dial request, services an
//! optional dial-data request, classifies the response, and waits for the
//! dedicated dial-back stream to confirm reachability.

use crate::config::{AutoNatConfig, DIAL_DATA_MAX_BYTES};
use crate::error::{Error, Result};
use crate::wire::{DialDataResponse, DialMessage, DialRequest, DialStatus, Status};
use crate::{read_framed, write_framed};
use futures::FutureExt;
use punch_core::addr::Protocol;
use punch_core::Addr;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Public,
    Private,
    Unknown,
}

/// Holds the single-shot delivery slots nonce -> observed-local-address,
/// keyed so the dial-back stream handler can complete exactly one client
/// request. A second dial-back for an already-completed (or unknown) nonce
/// is a protocol violation.
#[derive(Default)]
pub struct DialBackRegistry {
    slots: Mutex<HashMap<u64, oneshot::Sender<Addr>>>,
}

impl DialBackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, nonce: u64) -> oneshot::Receiver<Addr> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).insert(nonce, tx);
        rx
    }

    fn cancel(&self, nonce: u64) {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).remove(&nonce);
    }

    /// Completes the slot for `nonce` with `addr`. Returns an error (reset
    /// the dial-back stream) if the nonce is unknown or already completed.
    pub fn complete(&self, nonce: u64, addr: Addr) -> Result<()> {
        let tx = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&nonce)
            .ok_or_else(|| Error::ProtocolViolation("unknown or duplicate dial-back nonce".into()))?;
        let _ = tx.send(addr);
        Ok(())
    }
}

/// Runs the full client-side dial-request exchange over an already
/// multistream-negotiated `/libp2p/autonat/2/dial-request` stream.
pub async fn run_client_dial_request<S>(
    stream: &mut S,
    addrs: &[Addr],
    dial_data_ok: &[bool],
    registry: &DialBackRegistry,
    config: &AutoNatConfig,
) -> Result<Verdict>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let nonce = rand::random::<u64>();
    let rx = registry.register(nonce);

    let request = DialRequest {
        addrs: addrs.iter().map(|a| a.to_bytes().into()).collect(),
        nonce,
        dial_data_ok: dial_data_ok.to_vec(),
    };
    write_framed(stream, &DialMessage::DialRequest(request).encode()).await?;

    let first = DialMessage::decode(&read_framed(stream, config.max_msg_size).await?)?;
    let response = match first {
        DialMessage::DialDataRequest(req) => {
            if req.addr_idx as usize >= addrs.len() {
                registry.cancel(nonce);
                return Err(Error::ProtocolViolation("dial-data addrIdx out of range".into()));
            }
            if req.num_bytes > DIAL_DATA_MAX_BYTES {
                registry.cancel(nonce);
                return Err(Error::ProtocolViolation("dial-data request exceeds the anti-amplification cap".into()));
            }
            if !dial_data_ok.get(req.addr_idx as usize).copied().unwrap_or(false) {
                registry.cancel(nonce);
                return Err(Error::ProtocolViolation("server requested dial-data for an address we flagged low-priority".into()));
            }
            stream_dial_data(stream, req.num_bytes).await?;
            DialMessage::decode(&read_framed(stream, config.max_msg_size).await?)?
        }
        other => other,
    };

    let resp = match response {
        DialMessage::DialResponse(r) => r,
        _ => {
            registry.cancel(nonce);
            return Err(Error::ProtocolViolation("expected DialResponse".into()));
        }
    };

    match resp.status {
        Status::DialRefused => {
            registry.cancel(nonce);
            return Err(Error::DialRefused);
        }
        Status::RequestRejected => {
            registry.cancel(nonce);
            return Err(Error::RequestRejected);
        }
        Status::InternalError => {
            registry.cancel(nonce);
            return Err(Error::ProtocolViolation("server reported an internal error".into()));
        }
        Status::Ok => {}
    }
    if resp.dial_status == DialStatus::Unused {
        registry.cancel(nonce);
        return Err(Error::ProtocolViolation("dialStatus UNUSED in an OK response".into()));
    }
    if resp.addr_idx as usize >= addrs.len() {
        registry.cancel(nonce);
        return Err(Error::ProtocolViolation("response addrIdx out of range".into()));
    }

    let offered = &addrs[resp.addr_idx as usize];
    match resp.dial_status {
        DialStatus::Ok => match timeout(Duration::from_secs(5), rx).await {
            Ok(Ok(observed)) if addrs_consistent(&observed, offered) => Ok(Verdict::Public),
            _ => Ok(Verdict::Unknown),
        },
        DialStatus::DialError => {
            registry.cancel(nonce);
            Ok(Verdict::Private)
        }
        DialStatus::DialBackError => match rx.now_or_never() {
            Some(Ok(observed)) if addrs_consistent(&observed, offered) => Ok(Verdict::Public),
            _ => Ok(Verdict::Unknown),
        },
        DialStatus::Unused => unreachable!("handled above"),
    }
}

async fn stream_dial_data<S: AsyncWrite + Unpin>(stream: &mut S, mut remaining: u64) -> Result<()> {
    const CHUNK: u64 = 16_384;
    let mut rng = rand::thread_rng();
    while remaining > 0 {
        let len = remaining.min(CHUNK);
        let mut chunk = vec![0u8; len as usize];
        rng.fill_bytes(&mut chunk);
        write_framed(stream, &DialMessage::DialDataResponse(DialDataResponse { data: chunk.into() }).encode()).await?;
        remaining -= len;
    }
    Ok(())
}

/// Position-0 relaxations: `dns`/`dnsaddr` may match `ip4`/`ip6`; `dns4` may
/// match `ip4`; `dns6` may match `ip6`. Everything else must be identical.
fn addrs_consistent(observed: &Addr, offered: &Addr) -> bool {
    let a = observed.components();
    let b = offered.components();
    if a.len() != b.len() {
        return false;
    }
    if !first_component_compatible(&a[0], &b[0]) {
        return false;
    }
    a[1..] == b[1..]
}

fn first_component_compatible(observed: &Protocol, offered: &Protocol) -> bool {
    use Protocol::*;
    if observed == offered {
        return true;
    }
    matches!(
        (observed, offered),
        (Dns(_) | Dnsaddr(_), Ip4(_) | Ip6(_))
            | (Ip4(_) | Ip6(_), Dns(_) | Dnsaddr(_))
            | (Dns4(_), Ip4(_))
            | (Ip4(_), Dns4(_))
            | (Dns6(_), Ip6(_))
            | (Ip6(_), Dns6(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DialDataRequest, DialResponse};
    use punch_core::addr::Protocol;
    use tokio::io::duplex;

    fn sample_addr() -> Addr {
        Addr::new(vec![Protocol::Ip4("198.51.100.5".parse().unwrap()), Protocol::Tcp(4001)]).unwrap()
    }

    #[tokio::test]
    async fn happy_path_yields_public_on_matching_dial_back() {
        let (mut client, mut server) = duplex(1 << 16);
        let registry = std::sync::Arc::new(DialBackRegistry::new());
        let config = AutoNatConfig::default();
        let addrs = vec![sample_addr()];

        let server_task = tokio::spawn(async move {
            let req_bytes = read_framed(&mut server, config_copy().max_msg_size).await.unwrap();
            let req = match DialMessage::decode(&req_bytes).unwrap() {
                DialMessage::DialRequest(r) => r,
                _ => panic!("expected DialRequest"),
            };
            let resp = DialResponse { status: Status::Ok, addr_idx: 0, dial_status: DialStatus::Ok };
            write_framed(&mut server, &DialMessage::DialResponse(resp).encode()).await.unwrap();
            req.nonce
        });

        let client_registry = registry.clone();
        let client_addrs = addrs.clone();
        let client_task = tokio::spawn(async move {
            run_client_dial_request(&mut client, &client_addrs, &[false], &client_registry, &config).await
        });

        // Simulate the dial-back arriving on the dedicated dial-back stream.
        let nonce = server_task.await.unwrap();
        registry.complete(nonce, sample_addr()).unwrap();

        let verdict = client_task.await.unwrap().unwrap();
        assert_eq!(verdict, Verdict::Public);
    }

    #[tokio::test]
    async fn dial_error_status_yields_private() {
        let (mut client, mut server) = duplex(1 << 16);
        let registry = DialBackRegistry::new();
        let config = AutoNatConfig::default();
        let addrs = vec![sample_addr()];

        let server_task = tokio::spawn(async move {
            let _req = read_framed(&mut server, config_copy().max_msg_size).await.unwrap();
            let resp = DialResponse { status: Status::Ok, addr_idx: 0, dial_status: DialStatus::DialError };
            write_framed(&mut server, &DialMessage::DialResponse(resp).encode()).await.unwrap();
        });

        let verdict = run_client_dial_request(&mut client, &addrs, &[false], &registry, &config).await.unwrap();
        server_task.await.unwrap();
        assert_eq!(verdict, Verdict::Private);
    }

    #[tokio::test]
    async fn dial_refused_status_is_surfaced_as_error() {
        let (mut client, mut server) = duplex(1 << 16);
        let registry = DialBackRegistry::new();
        let config = AutoNatConfig::default();
        let addrs = vec![sample_addr()];

        let server_task = tokio::spawn(async move {
            let _req = read_framed(&mut server, config_copy().max_msg_size).await.unwrap();
            let resp = DialResponse { status: Status::DialRefused, addr_idx: 0, dial_status: DialStatus::Unused };
            write_framed(&mut server, &DialMessage::DialResponse(resp).encode()).await.unwrap();
        });

        let err = run_client_dial_request(&mut client, &addrs, &[false], &registry, &config).await.unwrap_err();
        server_task.await.unwrap();
        assert!(matches!(err, Error::DialRefused));
    }

    #[tokio::test]
    async fn services_dial_data_request_before_reading_response() {
        let (mut client, mut server) = duplex(1 << 16);
        let registry = DialBackRegistry::new();
        let config = AutoNatConfig::default();
        let addrs = vec![sample_addr()];

        let server_task = tokio::spawn(async move {
            let _req = read_framed(&mut server, config_copy().max_msg_size).await.unwrap();
            let ddr = DialDataRequest { addr_idx: 0, num_bytes: 40_000 };
            write_framed(&mut server, &DialMessage::DialDataRequest(ddr).encode()).await.unwrap();

            let mut received = 0u64;
            while received < 40_000 {
                let chunk = read_framed(&mut server, config_copy().max_msg_size).await.unwrap();
                match DialMessage::decode(&chunk).unwrap() {
                    DialMessage::DialDataResponse(d) => received += d.data.len() as u64,
                    _ => panic!("expected DialDataResponse"),
                }
            }
            let resp = DialResponse { status: Status::Ok, addr_idx: 0, dial_status: DialStatus::DialError };
            write_framed(&mut server, &DialMessage::DialResponse(resp).encode()).await.unwrap();
        });

        let verdict = run_client_dial_request(&mut client, &addrs, &[true], &registry, &config).await.unwrap();
        server_task.await.unwrap();
        assert_eq!(verdict, Verdict::Private);
    }

    fn config_copy() -> AutoNatConfig {
        AutoNatConfig::default()
    }
}
