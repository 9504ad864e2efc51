//! Varint-length-prefixed message framing shared by the dial-request and
//! dial-back streams.

use crate::error::{Error, Result};
use punch_core::addr::{decode_varint, encode_varint};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub async fn write_framed<S: AsyncWrite + Unpin>(stream: &mut S, payload: &[u8]) -> Result<()> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    encode_varint(payload.len() as u64, &mut out);
    out.extend_from_slice(payload);
    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_framed<S: AsyncRead + Unpin>(stream: &mut S, max_len: usize) -> Result<Vec<u8>> {
    let len = read_length_prefix(stream).await?;
    if len > max_len {
        return Err(Error::ProtocolViolation(format!("message of {len} bytes exceeds cap of {max_len}")));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn read_length_prefix<S: AsyncRead + Unpin>(stream: &mut S) -> Result<usize> {
    let mut bytes = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        bytes.push(byte[0]);
        if byte[0] & 0x80 == 0 {
            break;
        }
        if bytes.len() > 10 {
            return Err(Error::ProtocolViolation("length varint too long".into()));
        }
    }
    let mut slice = bytes.as_slice();
    decode_varint(&mut slice).map(|v| v as usize).map_err(|_| Error::ProtocolViolation("bad length varint".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_framed_message() {
        let (mut a, mut b) = duplex(256);
        write_framed(&mut a, b"hello").await.unwrap();
        let received = read_framed(&mut b, 1024).await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn rejects_message_over_cap() {
        let (mut a, mut b) = duplex(256);
        write_framed(&mut a, &vec![0u8; 100]).await.unwrap();
        let err = read_framed(&mut b, 50).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }
}
