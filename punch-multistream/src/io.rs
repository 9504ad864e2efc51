//! Buffered token I/O over an arbitrary `AsyncRead + AsyncWrite` stream, with
//! the timeout/retry policy from §4.1 ("Read operations have a timeout
//! (default 30s) with up to 3 retries and linear back-off; timeouts without
//! stream-level closure trigger retry, closure does not.").

use crate::error::{Error, Result};
use crate::token::{encode_token, try_decode_token};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy)]
pub struct NegotiationTimeouts {
    pub token_timeout: Duration,
    pub max_retries: u32,
}

impl Default for NegotiationTimeouts {
    fn default() -> Self {
        Self {
            token_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Wraps a stream with a read buffer so a single socket read that returns
/// several tokens (or a token plus trailing application bytes) is handled
/// correctly; see "Leftover handling" in §4.1.
pub struct TokenIo<S> {
    inner: S,
    read_buf: BytesMut,
    timeouts: NegotiationTimeouts,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> TokenIo<S> {
    pub fn new(inner: S, timeouts: NegotiationTimeouts) -> Self {
        Self {
            inner,
            read_buf: BytesMut::new(),
            timeouts,
        }
    }

    pub async fn write_token(&mut self, token: &str) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_token(token, &mut buf)?;
        self.inner.write_all(&buf).await?;
        Ok(())
    }

    /// Reads exactly one token, retrying on timeout (not on stream closure)
    /// up to `max_retries` times with linear back-off.
    pub async fn read_token(&mut self) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            if let Some(tok) = try_decode_token(&mut self.read_buf)? {
                return Ok(tok);
            }
            let mut chunk = [0u8; 4096];
            let read = timeout(self.timeouts.token_timeout, self.inner.read(&mut chunk)).await;
            match read {
                Ok(Ok(0)) => return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stream closed"))),
                Ok(Ok(n)) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    continue;
                }
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_elapsed) => {
                    attempt += 1;
                    if attempt > self.timeouts.max_retries {
                        return Err(Error::Timeout);
                    }
                    tokio::time::sleep(self.timeouts.token_timeout / 10 * attempt as u32).await;
                    continue;
                }
            }
        }
    }

    /// Splits this wrapper back into the underlying stream and any bytes
    /// read past the last consumed token, ready to be replayed to the
    /// application handler.
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.inner, self.read_buf)
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
