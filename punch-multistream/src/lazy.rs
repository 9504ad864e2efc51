//! The lazy-open optimization (§4.1): the initiator may start writing
//! application bytes before it has read the responder's half of the
//! handshake. Write-handshake-done and read-handshake-done are tracked
//! separately; the first write flushes the framework id and requested
//! protocol id bundled with the caller's payload, and the read-side
//! handshake only actually runs the first time the caller reads. A read-side
//! failure is cached and replayed to every subsequent read, but never blocks
//! writes — so write-only streams keep working.

use crate::error::{Error, Result};
use crate::io::NegotiationTimeouts;
use crate::token::{encode_token, try_decode_token, FRAMEWORK_ID};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

enum ReadState {
    NotStarted,
    Done,
    Failed(Arc<Error>),
}

pub struct LazyClientStream<S> {
    inner: S,
    protocol: String,
    write_handshake_done: bool,
    read_state: ReadState,
    read_buf: BytesMut,
    timeouts: NegotiationTimeouts,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> LazyClientStream<S> {
    pub fn new(inner: S, protocol: impl Into<String>, timeouts: NegotiationTimeouts) -> Self {
        Self {
            inner,
            protocol: protocol.into(),
            write_handshake_done: false,
            read_state: ReadState::NotStarted,
            read_buf: BytesMut::new(),
            timeouts,
        }
    }

    /// Writes application bytes, prefixing the bundled handshake tokens on
    /// the first call. The write side never looks at read-handshake state.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.write_handshake_done {
            let mut buf = BytesMut::new();
            encode_token(FRAMEWORK_ID, &mut buf)?;
            encode_token(&self.protocol, &mut buf)?;
            buf.extend_from_slice(data);
            self.inner.write_all(&buf).await?;
            self.write_handshake_done = true;
        } else {
            self.inner.write_all(data).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Completes the read-side handshake (if not already done) and then
    /// reads application bytes into `buf`, returning the number read.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_read_handshake().await?;
        if !self.read_buf.is_empty() {
            let n = std::cmp::min(self.read_buf.len(), buf.len());
            let chunk = self.read_buf.split_to(n);
            buf[..n].copy_from_slice(&chunk);
            return Ok(n);
        }
        let n = self.inner.read(buf).await?;
        Ok(n)
    }

    async fn ensure_read_handshake(&mut self) -> Result<()> {
        match &self.read_state {
            ReadState::Done => return Ok(()),
            ReadState::Failed(e) => return Err(clone_err(e)),
            ReadState::NotStarted => {}
        }
        let result = self.run_read_handshake().await;
        match result {
            Ok(()) => {
                self.read_state = ReadState::Done;
                Ok(())
            }
            Err(e) => {
                let shared = Arc::new(e);
                self.read_state = ReadState::Failed(shared.clone());
                Err(clone_err(&shared))
            }
        }
    }

    async fn run_read_handshake(&mut self) -> Result<()> {
        loop {
            if let Some(tok) = try_decode_token(&mut self.read_buf)? {
                if tok != FRAMEWORK_ID {
                    return Err(Error::IncorrectVersion);
                }
                break;
            }
            self.fill_buf().await?;
        }
        loop {
            if let Some(tok) = try_decode_token(&mut self.read_buf)? {
                if tok == self.protocol {
                    return Ok(());
                }
                if tok == crate::token::NA {
                    return Err(Error::NoCommonProtocol);
                }
                return Err(Error::UnrecognizedResponse);
            }
            self.fill_buf().await?;
        }
    }

    async fn fill_buf(&mut self) -> Result<()> {
        let mut chunk = [0u8; 4096];
        let n = timeout(self.timeouts.token_timeout, self.inner.read(&mut chunk))
            .await
            .map_err(|_| Error::Timeout)??;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stream closed")));
        }
        self.read_buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}

fn clone_err(e: &Error) -> Error {
    match e {
        Error::Io(io) => Error::Io(std::io::Error::new(io.kind(), io.to_string())),
        Error::Reset => Error::Reset,
        Error::IncorrectVersion => Error::IncorrectVersion,
        Error::UnrecognizedResponse => Error::UnrecognizedResponse,
        Error::MessageTooLarge => Error::MessageTooLarge,
        Error::NoCommonProtocol => Error::NoCommonProtocol,
        Error::Timeout => Error::Timeout,
        Error::InvalidUtf8 => Error::InvalidUtf8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiate::listener_select;
    use crate::registry::HandlerRegistry;
    use tokio::io::duplex;

    #[tokio::test]
    async fn write_before_read_bundles_handshake_with_payload() {
        let (client, server) = duplex(4096);
        let registry: HandlerRegistry<()> = HandlerRegistry::new();
        registry.set("/echo/1.0.0", Arc::new(()));

        let server_task = tokio::spawn(async move {
            listener_select(server, &registry, NegotiationTimeouts::default()).await
        });

        let mut lazy = LazyClientStream::new(client, "/echo/1.0.0", NegotiationTimeouts::default());
        lazy.write(b"hello").await.unwrap();
        lazy.flush().await.unwrap();

        let (protocol, _handler, mut server_stream) = server_task.await.unwrap().unwrap();
        assert_eq!(protocol, "/echo/1.0.0");

        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 5];
        server_stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn read_failure_is_cached_and_does_not_block_future_writes() {
        let (client, mut server) = duplex(4096);

        // Misbehaving peer: drain whatever the client sends, then reply with
        // something that is not the framework id, forcing IncorrectVersion.
        let server_task = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut sink = [0u8; 64];
            let _ = server.read(&mut sink).await;
            // A validly-framed token ("garbage\n", varint length 8) that is not the framework id.
            server.write_all(b"\x08garbage\n").await.unwrap();
        });

        let mut lazy = LazyClientStream::new(client, "/echo/1.0.0", NegotiationTimeouts::default());
        // First write still succeeds: writes don't depend on read-side state.
        lazy.write(b"hello").await.unwrap();

        let mut buf = [0u8; 8];
        let first = lazy.read(&mut buf).await;
        assert!(matches!(first, Err(Error::IncorrectVersion)));
        let second = lazy.read(&mut buf).await;
        assert!(matches!(second, Err(Error::IncorrectVersion)));

        // Writes keep working even though reads are permanently failed.
        assert!(lazy.write(b"more").await.is_ok());
        server_task.await.unwrap();
    }
}
