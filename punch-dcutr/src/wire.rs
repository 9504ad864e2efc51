//! `HolePunch{type, obsAddrs[]}` wire message (`spec.md` §4.4), the same
//! varint-tag length-delimited shape `punch-autonat`'s message codec uses,
//! reused here rather than shared since each protocol owns a small, narrow
//! set of fields.

use crate::error::{Error, Result};
use bytes::Bytes;
use punch_core::addr::{decode_varint, encode_varint};

pub const MAX_MESSAGE_LEN: usize = 4 * 1024;

const WIRE_VARINT: u64 = 0;
const WIRE_LEN: u64 = 2;

fn write_tag(field: u64, wire_type: u64, out: &mut Vec<u8>) {
    encode_varint((field << 3) | wire_type, out);
}

fn write_varint_field(field: u64, value: u64, out: &mut Vec<u8>) {
    write_tag(field, WIRE_VARINT, out);
    encode_varint(value, out);
}

fn write_bytes_field(field: u64, value: &[u8], out: &mut Vec<u8>) {
    write_tag(field, WIRE_LEN, out);
    encode_varint(value.len() as u64, out);
    out.extend_from_slice(value);
}

struct RawField {
    field: u64,
    varint: u64,
    bytes: Bytes,
}

fn parse_fields(mut buf: &[u8]) -> Result<Vec<RawField>> {
    let mut fields = Vec::new();
    while !buf.is_empty() {
        let tag = decode_varint(&mut buf).map_err(|_| Error::Parse("truncated tag".into()))?;
        let field = tag >> 3;
        match tag & 0x7 {
            WIRE_VARINT => {
                let value = decode_varint(&mut buf).map_err(|_| Error::Parse("truncated varint".into()))?;
                fields.push(RawField { field, varint: value, bytes: Bytes::new() });
            }
            WIRE_LEN => {
                let len = decode_varint(&mut buf).map_err(|_| Error::Parse("truncated length".into()))? as usize;
                if buf.len() < len {
                    return Err(Error::Parse("truncated length-delimited field".into()));
                }
                let (head, rest) = buf.split_at(len);
                fields.push(RawField { field, varint: 0, bytes: Bytes::copy_from_slice(head) });
                buf = rest;
            }
            other => return Err(Error::Parse(format!("unsupported wire type {other}"))),
        }
    }
    Ok(fields)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolePunchType {
    Connect,
    Sync,
}

impl HolePunchType {
    fn to_u64(self) -> u64 {
        match self {
            HolePunchType::Connect => 1,
            HolePunchType::Sync => 2,
        }
    }

    fn from_u64(v: u64) -> Result<Self> {
        match v {
            1 => Ok(HolePunchType::Connect),
            2 => Ok(HolePunchType::Sync),
            other => Err(Error::Parse(format!("unknown HolePunch type {other}"))),
        }
    }
}

/// `obsAddrs` are the already-encoded bytes of an `Addr` (relay marker
/// already stripped by the caller, per the address-filtering rule).
#[derive(Debug, Clone, Default)]
pub struct HolePunch {
    pub typ: Option<HolePunchType>,
    pub obs_addrs: Vec<Bytes>,
}

impl HolePunch {
    pub fn connect(obs_addrs: Vec<Bytes>) -> Self {
        Self { typ: Some(HolePunchType::Connect), obs_addrs }
    }

    pub fn sync() -> Self {
        Self { typ: Some(HolePunchType::Sync), obs_addrs: Vec::new() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let typ = self.typ.unwrap_or(HolePunchType::Connect);
        write_varint_field(1, typ.to_u64(), &mut out);
        for addr in &self.obs_addrs {
            write_bytes_field(2, addr, &mut out);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_MESSAGE_LEN {
            return Err(Error::ProtocolViolation(format!("HolePunch message of {} bytes exceeds the 4 KiB cap", data.len())));
        }
        let mut msg = HolePunch::default();
        for field in parse_fields(data)? {
            match field.field {
                1 => msg.typ = Some(HolePunchType::from_u64(field.varint)?),
                2 => msg.obs_addrs.push(field.bytes),
                _ => {}
            }
        }
        if msg.typ.is_none() {
            return Err(Error::ProtocolViolation("HolePunch message missing type".into()));
        }
        Ok(msg)
    }
}
