//! Parallel direct-dial racing (`spec.md` §4.4 step 7/3): attempts every
//! candidate address concurrently, each under its own timeout, and returns as
//! soon as one succeeds, aborting the rest.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use async_trait::async_trait;
use punch_core::{Addr, PeerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::info;

/// Attempts a direct connection to `peer` at `addr`. The embedding host owns
/// what "direct connection" means (transport, muxer, crypto handshake); this
/// core only needs to know whether the attempt succeeded.
#[async_trait]
pub trait DirectDialer: Send + Sync {
    async fn dial(&self, peer: PeerId, addr: &Addr) -> bool;
}

pub async fn race_dials(
    dialer: &Arc<dyn DirectDialer>,
    peer: PeerId,
    addrs: &[Addr],
    dial_timeout: Duration,
    cancel: &mut CancelToken,
) -> Result<()> {
    if addrs.is_empty() {
        return Err(Error::AllDialsFailed);
    }

    let mut tasks: JoinSet<bool> = JoinSet::new();
    for addr in addrs.iter().cloned() {
        let dialer = dialer.clone();
        tasks.spawn(async move { tokio::time::timeout(dial_timeout, dialer.dial(peer, &addr)).await.unwrap_or(false) });
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(%peer, "aborting direct-dial race: a connection to this peer was established by another path");
                tasks.abort_all();
                return Err(Error::Cancelled);
            }
            next = tasks.join_next() => {
                match next {
                    None => return Err(Error::AllDialsFailed),
                    Some(Ok(true)) => {
                        tasks.abort_all();
                        return Ok(());
                    }
                    Some(Ok(false)) | Some(Err(_)) => continue,
                }
            }
        }
    }
}
