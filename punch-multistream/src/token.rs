//! Length-delimited, newline-terminated token framing (`spec.md` §3/§4.1):
//! `<unsigned-varint length><token bytes>\n`, where `length` counts the token
//! bytes *including* the trailing `\n`.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const FRAMEWORK_ID: &str = "/multistream/1.0.0";
pub const NA: &str = "na";
const DEFAULT_MAX_TOKEN_LEN: usize = 1024;

static MAX_TOKEN_LEN: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_TOKEN_LEN);
static ENV_INIT: OnceCell<()> = OnceCell::new();

/// Clamp matches the [1024, 64KiB] escape-hatch pattern `nyx-stream::frame_codec`
/// uses for its own size cap, widened here only enough to let tests probe the
/// boundary without touching call sites.
fn clamp(n: usize) -> usize {
    n.clamp(16, 64 * 1024)
}

fn max_token_len() -> usize {
    ENV_INIT.get_or_init(|| {
        if let Ok(v) = std::env::var("PUNCH_MULTISTREAM_MAX_TOKEN") {
            if let Ok(n) = v.trim().parse::<usize>() {
                MAX_TOKEN_LEN.store(clamp(n), Ordering::Relaxed);
            }
        }
    });
    MAX_TOKEN_LEN.load(Ordering::Relaxed)
}

/// Overrides the default 1024-byte cap; test-only escape hatch.
pub fn set_max_token_len(n: usize) {
    MAX_TOKEN_LEN.store(clamp(n), Ordering::Relaxed);
}

pub fn default_max_token_len() -> usize {
    DEFAULT_MAX_TOKEN_LEN
}

/// Appends the wire encoding of `token` (varint length + bytes + `\n`) to `dst`.
pub fn encode_token(token: &str, dst: &mut BytesMut) -> Result<()> {
    let payload_len = token.len() + 1;
    if payload_len > max_token_len() {
        return Err(Error::MessageTooLarge);
    }
    let mut len_buf = unsigned_varint(payload_len as u64);
    dst.reserve(len_buf.len() + payload_len);
    dst.append(&mut len_buf);
    dst.put_slice(token.as_bytes());
    dst.put_u8(b'\n');
    Ok(())
}

/// Attempts to parse a single token out of `src`, which accumulates bytes
/// read off the wire. Returns `Ok(None)` if more bytes are needed. On
/// success, the consumed bytes are removed from `src`, leaving any
/// leftover (e.g. application data bundled with the handshake in the
/// lazy-open path) in place for the caller to re-use.
pub fn try_decode_token(src: &mut BytesMut) -> Result<Option<String>> {
    let mut cursor = &src[..];
    let before = cursor.len();
    let len = match read_unsigned_varint(&mut cursor) {
        Some(v) => v as usize,
        None => return Ok(None),
    };
    let varint_len = before - cursor.len();
    if len == 0 || len > max_token_len() + 1 {
        return Err(Error::MessageTooLarge);
    }
    if cursor.len() < len {
        return Ok(None);
    }
    let payload = &cursor[..len];
    if payload[len - 1] != b'\n' {
        return Err(Error::UnrecognizedResponse);
    }
    let text = std::str::from_utf8(&payload[..len - 1]).map_err(|_| Error::InvalidUtf8)?;
    if text.len() + 1 > max_token_len() {
        return Err(Error::MessageTooLarge);
    }
    let token = text.to_string();
    src.advance(varint_len + len);
    Ok(Some(token))
}

fn unsigned_varint(mut value: u64) -> BytesMut {
    let mut out = BytesMut::new();
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if value == 0 {
            break;
        }
    }
    out
}

fn read_unsigned_varint(buf: &mut &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf.first()?;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            *buf = &buf[1..];
            return Some(value);
        }
        *buf = &buf[1..];
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut buf = BytesMut::new();
        encode_token(FRAMEWORK_ID, &mut buf).unwrap();
        let token = try_decode_token(&mut buf).unwrap().unwrap();
        assert_eq!(token, FRAMEWORK_ID);
        assert!(buf.is_empty());
    }

    #[test]
    fn leftover_bytes_survive_decode() {
        let mut buf = BytesMut::new();
        encode_token("na", &mut buf).unwrap();
        buf.extend_from_slice(b"hello-app-data");
        let token = try_decode_token(&mut buf).unwrap().unwrap();
        assert_eq!(token, "na");
        assert_eq!(&buf[..], b"hello-app-data");
    }

    #[test]
    fn oversized_token_is_rejected() {
        set_max_token_len(32);
        let long = "x".repeat(64);
        let mut buf = BytesMut::new();
        let err = encode_token(&long, &mut buf).unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge));
        set_max_token_len(default_max_token_len());
    }

    #[test]
    fn exactly_boundary_len_is_accepted() {
        set_max_token_len(1024);
        // payload (including trailing \n) is exactly 1024 bytes.
        let token = "x".repeat(1023);
        let mut buf = BytesMut::new();
        assert!(encode_token(&token, &mut buf).is_ok());
        let decoded = try_decode_token(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn one_byte_past_boundary_is_rejected() {
        set_max_token_len(1024);
        let token = "x".repeat(1024);
        let mut buf = BytesMut::new();
        let err = encode_token(&token, &mut buf).unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge));
    }
}
