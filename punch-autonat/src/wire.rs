//! AutoNATv2 message wire format (`spec.md` §6). The four request/response
//! messages and the dial-back pair are encoded with the same varint-tag,
//! length-delimited shape every protobuf wire form uses (field tag =
//! `(field_number << 3) | wire_type`), hand-written rather than generated
//! through `prost-build`/`protoc` since code generation is peripheral to
//! this core. Varints reuse the LEB128 helpers the address encoder already
//! defines.

use crate::error::{Error, Result};
use bytes::Bytes;
use punch_core::addr::{decode_varint, encode_varint};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

pub const DEFAULT_MAX_REQUEST_MSG_LEN: usize = 8 * 1024;
pub const DEFAULT_MAX_DIAL_BACK_MSG_LEN: usize = 1024;

static MAX_REQUEST_MSG_LEN: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_REQUEST_MSG_LEN);
static ENV_INIT: OnceLock<()> = OnceLock::new();

fn clamp(n: usize) -> usize {
    n.clamp(512, 1024 * 1024)
}

pub fn max_request_msg_len() -> usize {
    ENV_INIT.get_or_init(|| {
        if let Ok(v) = std::env::var("PUNCH_AUTONAT_MAX_MSG") {
            if let Ok(n) = v.trim().parse::<usize>() {
                MAX_REQUEST_MSG_LEN.store(clamp(n), Ordering::Relaxed);
            }
        }
    });
    MAX_REQUEST_MSG_LEN.load(Ordering::Relaxed)
}

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;

fn write_tag(field: u64, wire_type: u64, out: &mut Vec<u8>) {
    encode_varint((field << 3) | wire_type, out);
}

fn write_varint_field(field: u64, value: u64, out: &mut Vec<u8>) {
    write_tag(field, WIRE_VARINT, out);
    encode_varint(value, out);
}

fn write_fixed64_field(field: u64, value: u64, out: &mut Vec<u8>) {
    write_tag(field, WIRE_FIXED64, out);
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes_field(field: u64, value: &[u8], out: &mut Vec<u8>) {
    write_tag(field, WIRE_LEN, out);
    encode_varint(value.len() as u64, out);
    out.extend_from_slice(value);
}

struct RawField {
    field: u64,
    wire_type: u64,
    varint: u64,
    bytes: Bytes,
}

fn parse_fields(mut buf: &[u8]) -> Result<Vec<RawField>> {
    let mut fields = Vec::new();
    while !buf.is_empty() {
        let tag = decode_varint(&mut buf).map_err(|_| Error::Parse("truncated tag".into()))?;
        let field = tag >> 3;
        let wire_type = tag & 0x7;
        match wire_type {
            WIRE_VARINT => {
                let value = decode_varint(&mut buf).map_err(|_| Error::Parse("truncated varint".into()))?;
                fields.push(RawField { field, wire_type, varint: value, bytes: Bytes::new() });
            }
            WIRE_FIXED64 => {
                if buf.len() < 8 {
                    return Err(Error::Parse("truncated fixed64".into()));
                }
                let (head, rest) = buf.split_at(8);
                let value = u64::from_le_bytes(head.try_into().expect("exactly 8 bytes"));
                fields.push(RawField { field, wire_type, varint: value, bytes: Bytes::new() });
                buf = rest;
            }
            WIRE_LEN => {
                let len = decode_varint(&mut buf).map_err(|_| Error::Parse("truncated length".into()))? as usize;
                if buf.len() < len {
                    return Err(Error::Parse("truncated length-delimited field".into()));
                }
                let (head, rest) = buf.split_at(len);
                fields.push(RawField { field, wire_type, varint: 0, bytes: Bytes::copy_from_slice(head) });
                buf = rest;
            }
            other => return Err(Error::Parse(format!("unsupported wire type {other}"))),
        }
    }
    Ok(fields)
}

#[derive(Debug, Clone, Default)]
pub struct DialRequest {
    pub addrs: Vec<Bytes>,
    pub nonce: u64,
    /// Per-address "willing to pay for dial data" bit, parallel to `addrs`.
    pub dial_data_ok: Vec<bool>,
}

impl DialRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for addr in &self.addrs {
            write_bytes_field(1, addr, &mut out);
        }
        write_fixed64_field(2, self.nonce, &mut out);
        for ok in &self.dial_data_ok {
            write_varint_field(3, *ok as u64, &mut out);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut msg = DialRequest::default();
        for field in parse_fields(data)? {
            match field.field {
                1 => msg.addrs.push(field.bytes),
                2 => msg.nonce = field.varint,
                3 => msg.dial_data_ok.push(field.varint != 0),
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DialDataRequest {
    pub addr_idx: u32,
    pub num_bytes: u64,
}

impl DialDataRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint_field(1, self.addr_idx as u64, &mut out);
        write_varint_field(2, self.num_bytes, &mut out);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut msg = Self::default();
        for field in parse_fields(data)? {
            match field.field {
                1 => msg.addr_idx = field.varint as u32,
                2 => msg.num_bytes = field.varint,
                _ => {}
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    InternalError,
    RequestRejected,
    DialRefused,
    Ok,
}

impl Status {
    fn to_u64(self) -> u64 {
        match self {
            Status::InternalError => 0,
            Status::RequestRejected => 100,
            Status::DialRefused => 101,
            Status::Ok => 200,
        }
    }

    fn from_u64(v: u64) -> Result<Self> {
        match v {
            0 => Ok(Status::InternalError),
            100 => Ok(Status::RequestRejected),
            101 => Ok(Status::DialRefused),
            200 => Ok(Status::Ok),
            other => Err(Error::Parse(format!("unknown status {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStatus {
    Unused,
    DialError,
    DialBackError,
    Ok,
}

impl DialStatus {
    fn to_u64(self) -> u64 {
        match self {
            DialStatus::Unused => 0,
            DialStatus::DialError => 100,
            DialStatus::DialBackError => 101,
            DialStatus::Ok => 200,
        }
    }

    fn from_u64(v: u64) -> Result<Self> {
        match v {
            0 => Ok(DialStatus::Unused),
            100 => Ok(DialStatus::DialError),
            101 => Ok(DialStatus::DialBackError),
            200 => Ok(DialStatus::Ok),
            other => Err(Error::Parse(format!("unknown dial status {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DialResponse {
    pub status: Status,
    pub addr_idx: u32,
    pub dial_status: DialStatus,
}

impl DialResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint_field(1, self.status.to_u64(), &mut out);
        write_varint_field(2, self.addr_idx as u64, &mut out);
        write_varint_field(3, self.dial_status.to_u64(), &mut out);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut status = Status::InternalError;
        let mut addr_idx = 0u32;
        let mut dial_status = DialStatus::Unused;
        for field in parse_fields(data)? {
            match field.field {
                1 => status = Status::from_u64(field.varint)?,
                2 => addr_idx = field.varint as u32,
                3 => dial_status = DialStatus::from_u64(field.varint)?,
                _ => {}
            }
        }
        Ok(Self { status, addr_idx, dial_status })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DialDataResponse {
    pub data: Bytes,
}

impl DialDataResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_bytes_field(1, &self.data, &mut out);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut msg = Self::default();
        for field in parse_fields(data)? {
            if field.field == 1 {
                msg.data = field.bytes;
            }
        }
        Ok(msg)
    }
}

#[derive(Debug, Clone)]
pub enum DialMessage {
    DialRequest(DialRequest),
    DialResponse(DialResponse),
    DialDataRequest(DialDataRequest),
    DialDataResponse(DialDataResponse),
}

impl DialMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            DialMessage::DialRequest(m) => write_bytes_field(1, &m.encode(), &mut out),
            DialMessage::DialResponse(m) => write_bytes_field(2, &m.encode(), &mut out),
            DialMessage::DialDataRequest(m) => write_bytes_field(3, &m.encode(), &mut out),
            DialMessage::DialDataResponse(m) => write_bytes_field(4, &m.encode(), &mut out),
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let fields = parse_fields(data)?;
        let field = fields.first().ok_or_else(|| Error::Parse("empty oneof".into()))?;
        match field.field {
            1 => Ok(DialMessage::DialRequest(DialRequest::decode(&field.bytes)?)),
            2 => Ok(DialMessage::DialResponse(DialResponse::decode(&field.bytes)?)),
            3 => Ok(DialMessage::DialDataRequest(DialDataRequest::decode(&field.bytes)?)),
            4 => Ok(DialMessage::DialDataResponse(DialDataResponse::decode(&field.bytes)?)),
            other => Err(Error::Parse(format!("unknown oneof field {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DialBack {
    pub nonce: u64,
}

impl DialBack {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_fixed64_field(1, self.nonce, &mut out);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut nonce = None;
        for field in parse_fields(data)? {
            if field.field == 1 {
                if field.wire_type != WIRE_FIXED64 {
                    return Err(Error::Parse("dial-back nonce must be fixed64".into()));
                }
                nonce = Some(field.varint);
            }
        }
        Ok(Self { nonce: nonce.ok_or_else(|| Error::Parse("dial-back missing nonce".into()))? })
    }
}

/// The spec defines a single status variant, `OK = 0`; any other value on
/// the wire is a protocol violation rather than a meaningful alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialBackResponse;

impl DialBackResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint_field(1, 0, &mut out);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        for field in parse_fields(data)? {
            if field.field == 1 && field.varint != 0 {
                return Err(Error::Parse("unknown DialBackResponse status".into()));
            }
        }
        Ok(Self)
    }
}
