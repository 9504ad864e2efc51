//! Re-injects bytes read past the negotiated token so the application
//! handler sees a contiguous stream starting at the first application byte,
//! per the "Leftover handling" rule in §4.1.

use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub struct LeftoverStream<S> {
    inner: S,
    leftover: BytesMut,
}

impl<S> LeftoverStream<S> {
    pub fn new(inner: S, leftover: BytesMut) -> Self {
        Self { inner, leftover }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for LeftoverStream<S> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if !self.leftover.is_empty() {
            let n = std::cmp::min(self.leftover.len(), buf.remaining());
            let chunk = self.leftover.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for LeftoverStream<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn leftover_bytes_are_read_first() {
        let (mut client, server) = duplex(64);
        let mut wrapped = LeftoverStream::new(server, BytesMut::from(&b"hello"[..]));
        client.write_all(b" world").await.unwrap();

        let mut out = [0u8; 5];
        wrapped.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"hello");

        let mut out2 = [0u8; 6];
        wrapped.read_exact(&mut out2).await.unwrap();
        assert_eq!(&out2, b" world");
    }
}
