//! Eager (non-lazy) negotiation handshakes for the initiator and responder
//! sides of a freshly opened stream (§4.1).

use crate::error::{Error, Result};
use crate::io::{NegotiationTimeouts, TokenIo};
use crate::leftover::LeftoverStream;
use crate::registry::HandlerRegistry;
use crate::token::{FRAMEWORK_ID, NA};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

/// Runs the initiator side: exchange the framework id, then offer each
/// protocol in `protocols` in order until one is accepted.
///
/// Returns the accepted protocol id and a stream ready for the application,
/// with any bytes read past the handshake re-injected at the front.
pub async fn dialer_select<S>(
    stream: S,
    protocols: &[&str],
    timeouts: NegotiationTimeouts,
) -> Result<(String, LeftoverStream<S>)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut io = TokenIo::new(stream, timeouts);
    io.write_token(FRAMEWORK_ID).await?;
    let reply = io.read_token().await?;
    if reply != FRAMEWORK_ID {
        warn!(%reply, "resetting stream after incorrect multistream version in dialer handshake");
        let _ = io.shutdown().await;
        return Err(Error::IncorrectVersion);
    }

    for protocol in protocols {
        io.write_token(protocol).await?;
        let reply = io.read_token().await?;
        if reply == *protocol {
            let (inner, leftover) = io.into_parts();
            return Ok((protocol.to_string(), LeftoverStream::new(inner, leftover)));
        }
        if reply != NA {
            warn!(%reply, "resetting stream after unrecognized response to protocol offer");
            let _ = io.shutdown().await;
            return Err(Error::UnrecognizedResponse);
        }
    }
    warn!("resetting stream: no common protocol with peer");
    let _ = io.shutdown().await;
    Err(Error::NoCommonProtocol)
}

/// Runs the responder side against a handler registry: exchange the
/// framework id, then repeatedly read offered protocol ids, accepting the
/// first one with a registered handler.
pub async fn listener_select<S, H: ?Sized + Send + Sync>(
    stream: S,
    registry: &HandlerRegistry<H>,
    timeouts: NegotiationTimeouts,
) -> Result<(String, Arc<H>, LeftoverStream<S>)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut io = TokenIo::new(stream, timeouts);
    let greeting = io.read_token().await?;
    if greeting != FRAMEWORK_ID {
        warn!(%greeting, "resetting stream after incorrect multistream version in listener handshake");
        let _ = io.shutdown().await;
        return Err(Error::IncorrectVersion);
    }
    io.write_token(FRAMEWORK_ID).await?;

    loop {
        let offer = io.read_token().await?;
        match registry.get(&offer) {
            Some(handler) => {
                io.write_token(&offer).await?;
                let (inner, leftover) = io.into_parts();
                return Ok((offer, handler, LeftoverStream::new(inner, leftover)));
            }
            None => {
                io.write_token(NA).await?;
            }
        }
    }
}
