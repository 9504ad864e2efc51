//! Wire format for the NAT-behavior-discovery probe protocol (`spec.md` §4.2).
//!
//! Structurally this is the same header + TLV-attribute-list shape as
//! STUN (RFC 5389): a 20-byte header carrying a message type, attribute
//! length and 12-byte transaction id, followed by type-length-value
//! attributes padded to 4-byte boundaries. The mapping/filtering tests need
//! two attributes plain STUN binding doesn't define — `OTHER_ADDRESS` (RFC
//! 5780), which lets the rendezvous service advertise the alternate IP/port
//! its probes can also be reached on, and `CHANGE_REQUEST`, which asks the
//! service to source its response from the changed IP and/or port.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

const MAGIC_COOKIE: u32 = 0x2112_A442;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    BindingRequest = 0x0001,
    BindingResponse = 0x0101,
}

impl MessageType {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::BindingRequest),
            0x0101 => Some(Self::BindingResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AttributeType {
    XorMappedAddress = 0x0020,
    /// RFC 5780: the alternate address/port the rendezvous service can also
    /// be reached on, used to probe address-dependent mapping/filtering.
    OtherAddress = 0x802c,
    /// RFC 5780: asks the responder to source its reply from a changed IP
    /// and/or port, bits 0x02 (change IP) and 0x04 (change port).
    ChangeRequest = 0x0003,
}

pub const CHANGE_IP: u32 = 0x0000_0004;
pub const CHANGE_PORT: u32 = 0x0000_0002;

#[derive(Debug, Clone)]
pub struct Header {
    pub message_type: MessageType,
    pub transaction_id: [u8; 12],
}

#[derive(Debug, Clone)]
struct Attribute {
    attr_type: u16,
    value: Bytes,
}

#[derive(Debug, Clone)]
pub struct ProbeMessage {
    pub header: Header,
    attributes: Vec<Attribute>,
}

impl ProbeMessage {
    pub fn new(message_type: MessageType, transaction_id: [u8; 12]) -> Self {
        Self {
            header: Header { message_type, transaction_id },
            attributes: Vec::new(),
        }
    }

    pub fn add_xor_mapped_address(&mut self, addr: SocketAddr) {
        let value = encode_xor_address(addr, &self.header.transaction_id);
        self.attributes.push(Attribute { attr_type: AttributeType::XorMappedAddress as u16, value });
    }

    pub fn xor_mapped_address(&self) -> Result<Option<SocketAddr>> {
        self.find(AttributeType::XorMappedAddress as u16)
            .map(|a| decode_xor_address(&a.value, &self.header.transaction_id))
            .transpose()
    }

    pub fn add_other_address(&mut self, addr: SocketAddr) {
        let value = encode_xor_address(addr, &self.header.transaction_id);
        self.attributes.push(Attribute { attr_type: AttributeType::OtherAddress as u16, value });
    }

    pub fn other_address(&self) -> Result<Option<SocketAddr>> {
        self.find(AttributeType::OtherAddress as u16)
            .map(|a| decode_xor_address(&a.value, &self.header.transaction_id))
            .transpose()
    }

    pub fn add_change_request(&mut self, flags: u32) {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(flags);
        self.attributes.push(Attribute { attr_type: AttributeType::ChangeRequest as u16, value: buf.freeze() });
    }

    pub fn change_request(&self) -> Option<u32> {
        self.find(AttributeType::ChangeRequest as u16).map(|a| {
            let mut cursor = a.value.clone();
            cursor.get_u32()
        })
    }

    fn find(&self, attr_type: u16) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16(self.header.message_type as u16);
        let attrs_len: usize = self.attributes.iter().map(|a| 4 + align_to_4(a.value.len())).sum();
        buf.put_u16(attrs_len as u16);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(&self.header.transaction_id);
        for attr in &self.attributes {
            buf.put_u16(attr.attr_type);
            buf.put_u16(attr.value.len() as u16);
            buf.put_slice(&attr.value);
            let padding = (4 - (attr.value.len() % 4)) % 4;
            buf.put_bytes(0, padding);
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 20 {
            return Err(Error::Parse("message too short".into()));
        }
        let mut cursor = data;
        let message_type = MessageType::from_u16(cursor.get_u16())
            .ok_or_else(|| Error::Parse("unknown message type".into()))?;
        let length = cursor.get_u16() as usize;
        let magic = cursor.get_u32();
        if magic != MAGIC_COOKIE {
            return Err(Error::Parse("bad magic cookie".into()));
        }
        let mut transaction_id = [0u8; 12];
        cursor.copy_to_slice(&mut transaction_id);

        let mut attributes = Vec::new();
        let mut remaining = length;
        while remaining > 0 {
            if cursor.len() < 4 {
                break;
            }
            let attr_type = cursor.get_u16();
            let attr_len = cursor.get_u16() as usize;
            if cursor.len() < attr_len {
                return Err(Error::Parse("truncated attribute".into()));
            }
            let value = Bytes::copy_from_slice(&cursor[..attr_len]);
            cursor.advance(attr_len);
            attributes.push(Attribute { attr_type, value });
            let padding = (4 - (attr_len % 4)) % 4;
            cursor.advance(padding.min(cursor.len()));
            remaining = remaining.saturating_sub(4 + attr_len + padding);
        }

        Ok(Self { header: Header { message_type, transaction_id }, attributes })
    }
}

fn align_to_4(value: usize) -> usize {
    (value + 3) & !3
}

fn encode_xor_address(addr: SocketAddr, transaction_id: &[u8; 12]) -> Bytes {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u8(0);
    match addr {
        SocketAddr::V4(_) => buf.put_u8(0x01),
        SocketAddr::V6(_) => buf.put_u8(0x02),
    }
    let xor_port = addr.port() ^ ((MAGIC_COOKIE >> 16) as u16);
    buf.put_u16(xor_port);
    match addr.ip() {
        IpAddr::V4(ip) => {
            let octets = ip.octets();
            let magic_bytes = MAGIC_COOKIE.to_be_bytes();
            for i in 0..4 {
                buf.put_u8(octets[i] ^ magic_bytes[i]);
            }
        }
        IpAddr::V6(ip) => {
            let octets = ip.octets();
            let mut xor_key = [0u8; 16];
            xor_key[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
            xor_key[4..16].copy_from_slice(transaction_id);
            for i in 0..16 {
                buf.put_u8(octets[i] ^ xor_key[i]);
            }
        }
    }
    buf.freeze()
}

fn decode_xor_address(data: &[u8], transaction_id: &[u8; 12]) -> Result<SocketAddr> {
    if data.len() < 4 {
        return Err(Error::Parse("xor address too short".into()));
    }
    let mut cursor = data;
    cursor.advance(1);
    let family = cursor[0];
    cursor.advance(1);
    let xor_port = cursor.get_u16();
    let port = xor_port ^ ((MAGIC_COOKIE >> 16) as u16);
    match family {
        0x01 => {
            if cursor.len() < 4 {
                return Err(Error::Parse("ipv4 address truncated".into()));
            }
            let magic_bytes = MAGIC_COOKIE.to_be_bytes();
            let mut octets = [0u8; 4];
            for i in 0..4 {
                octets[i] = cursor[i] ^ magic_bytes[i];
            }
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        0x02 => {
            if cursor.len() < 16 {
                return Err(Error::Parse("ipv6 address truncated".into()));
            }
            let mut xor_key = [0u8; 16];
            xor_key[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
            xor_key[4..16].copy_from_slice(transaction_id);
            let mut octets = [0u8; 16];
            for i in 0..16 {
                octets[i] = cursor[i] ^ xor_key[i];
            }
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => Err(Error::Parse("unsupported address family".into())),
    }
}

pub fn random_transaction_id() -> [u8; 12] {
    let mut id = [0u8; 12];
    for byte in &mut id {
        *byte = rand::random();
    }
    id
}
