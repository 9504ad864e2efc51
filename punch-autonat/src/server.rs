//! AutoNATv2 server flow (`spec.md` §4.3): rate-limits, picks a dialable
//! address, enforces the anti-amplification dial-data policy, then dials
//! back from a separate host so the dialer host's identity stays untainted.

use crate::config::{AutoNatConfig, DIAL_DATA_MAX_BYTES, DIAL_DATA_MIN_BYTES};
use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::wire::{DialDataRequest, DialMessage, DialResponse, DialStatus, Status};
use crate::{read_framed, write_framed};
use async_trait::async_trait;
use punch_core::{Addr, PeerId};
use rand::Rng;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

const MAX_OFFERED_ADDRS: usize = 50;

/// Dials `peer` at `addr` from a host distinct from the one that received
/// the dial-request stream, opens the dial-back stream, and reports what
/// happened. The caller is responsible for tearing the dial-back connection
/// down afterward regardless of outcome.
#[async_trait]
pub trait DialBackDialer: Send + Sync {
    async fn dial_back(&self, peer: PeerId, addr: &Addr, nonce: u64) -> DialBackOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialBackOutcome {
    Connected,
    ConnectionFailed,
    StreamFailed,
}

pub async fn serve_dial_request<S>(
    stream: &mut S,
    peer: PeerId,
    observed_source_ip: IpAddr,
    rate_limiter: &RateLimiter,
    dialer: &dyn DialBackDialer,
    is_dialable: &dyn Fn(&Addr) -> bool,
    config: &AutoNatConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !rate_limiter.try_accept(peer) {
        respond(stream, Status::RequestRejected, 0, DialStatus::Unused, config).await?;
        return Err(Error::RequestRejected);
    }
    let result = serve_admitted(stream, peer, observed_source_ip, rate_limiter, dialer, is_dialable, config).await;
    rate_limiter.complete(peer);
    result
}

async fn serve_admitted<S>(
    stream: &mut S,
    peer: PeerId,
    observed_source_ip: IpAddr,
    rate_limiter: &RateLimiter,
    dialer: &dyn DialBackDialer,
    is_dialable: &dyn Fn(&Addr) -> bool,
    config: &AutoNatConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request = match DialMessage::decode(&read_framed(stream, config.max_msg_size).await?)? {
        DialMessage::DialRequest(r) => r,
        _ => return Err(Error::ProtocolViolation("expected DialRequest".into())),
    };

    let candidates: Vec<Addr> = request
        .addrs
        .iter()
        .take(MAX_OFFERED_ADDRS)
        .filter_map(|raw| Addr::from_bytes(raw).ok())
        .collect();

    let chosen = candidates.iter().enumerate().find(|(_, addr)| {
        (config.allow_private_addrs || !addr.is_private_or_loopback()) && is_dialable(addr)
    });

    let (addr_idx, addr) = match chosen {
        Some((idx, addr)) => (idx, addr.clone()),
        None => {
            respond(stream, Status::DialRefused, 0, DialStatus::Unused, config).await?;
            return Err(Error::DialRefused);
        }
    };

    let data_required = addr.first_ip().map(|ip| ip != observed_source_ip).unwrap_or(true);

    if data_required {
        if !rate_limiter.try_accept_dial_data() {
            respond(stream, Status::RequestRejected, addr_idx as u32, DialStatus::Unused, config).await?;
            return Err(Error::RequestRejected);
        }
        let num_bytes = rand::thread_rng().gen_range(DIAL_DATA_MIN_BYTES..DIAL_DATA_MAX_BYTES);
        write_framed(stream, &DialMessage::DialDataRequest(DialDataRequest { addr_idx: addr_idx as u32, num_bytes }).encode()).await?;
        drain_dial_data(stream, num_bytes, config).await?;

        let wait = Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..config.amplification_wait.as_secs_f64().max(0.001)));
        tokio::time::sleep(wait).await;
    }

    let nonce = rand::random::<u64>();
    let outcome = dialer.dial_back(peer, &addr, nonce).await;
    let (status, dial_status) = match outcome {
        DialBackOutcome::Connected => (Status::Ok, DialStatus::Ok),
        DialBackOutcome::ConnectionFailed => (Status::Ok, DialStatus::DialError),
        DialBackOutcome::StreamFailed => (Status::Ok, DialStatus::DialBackError),
    };
    respond(stream, status, addr_idx as u32, dial_status, config).await?;
    Ok(())
}

async fn respond<S: AsyncWrite + Unpin>(stream: &mut S, status: Status, addr_idx: u32, dial_status: DialStatus, _config: &AutoNatConfig) -> Result<()> {
    let resp = DialResponse { status, addr_idx, dial_status };
    write_framed(stream, &DialMessage::DialResponse(resp).encode()).await
}

/// Drains exactly `num_bytes` of dial data, rejecting suspiciously small
/// chunks (after the first) and pathological message counts, both signs of
/// a client trying to waste server time rather than paying the intended cost.
async fn drain_dial_data<S: AsyncRead + Unpin>(stream: &mut S, num_bytes: u64, config: &AutoNatConfig) -> Result<()> {
    const MIN_CHUNK_AFTER_FIRST: usize = 100;
    const MAX_MESSAGES: usize = 4096;

    let mut received = 0u64;
    let mut messages = 0usize;
    while received < num_bytes {
        messages += 1;
        if messages > MAX_MESSAGES {
            return Err(Error::ProtocolViolation("dial-data split into an unreasonable number of messages".into()));
        }
        let frame = read_framed(stream, config.max_msg_size).await?;
        let chunk = match DialMessage::decode(&frame)? {
            DialMessage::DialDataResponse(d) => d.data,
            _ => return Err(Error::ProtocolViolation("expected DialDataResponse".into())),
        };
        if messages > 1 && chunk.len() < MIN_CHUNK_AFTER_FIRST && received + (chunk.len() as u64) < num_bytes {
            return Err(Error::ProtocolViolation("dial-data chunk after the first is suspiciously small".into()));
        }
        received += chunk.len() as u64;
    }
    Ok(())
}
