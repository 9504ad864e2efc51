//! `Addr`: the multiaddr-style network endpoint encoding described in the
//! data model (`spec.md` §3). Encodes the subset of multicodec protocol
//! codes the core actually needs — enough to round-trip IPv4/IPv6, TCP/UDP,
//! DNS variants, QUIC and the `p2p-circuit`/`p2p` markers bit-for-bit with
//! the wire format real multiaddr implementations use, without depending on
//! identity/DNS-resolution machinery this core does not own.

use crate::error::{Error, Result};
use crate::peer_id::PeerId;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// Multicodec protocol codes used on the wire. These match the public
// multicodec table so that `Addr::to_bytes`/`from_bytes` interoperate with
// any other multiaddr implementation.
const CODE_IP4: u64 = 0x04;
const CODE_TCP: u64 = 0x06;
const CODE_DNS: u64 = 0x35;
const CODE_DNS4: u64 = 0x36;
const CODE_DNS6: u64 = 0x37;
const CODE_DNSADDR: u64 = 0x38;
const CODE_UDP: u64 = 0x0111;
const CODE_P2P_CIRCUIT: u64 = 0x0122;
const CODE_IP6: u64 = 0x29;
const CODE_QUIC: u64 = 0x01cc;
const CODE_QUIC_V1: u64 = 0x01cd;
const CODE_P2P: u64 = 0x01a5;

/// A single address component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Dns(String),
    Dns4(String),
    Dns6(String),
    Dnsaddr(String),
    Tcp(u16),
    Udp(u16),
    Quic,
    QuicV1,
    /// Marks the boundary between a relay-facing prefix and a target-peer suffix.
    P2pCircuit,
    P2p(PeerId),
}

impl Protocol {
    fn code(&self) -> u64 {
        match self {
            Protocol::Ip4(_) => CODE_IP4,
            Protocol::Ip6(_) => CODE_IP6,
            Protocol::Dns(_) => CODE_DNS,
            Protocol::Dns4(_) => CODE_DNS4,
            Protocol::Dns6(_) => CODE_DNS6,
            Protocol::Dnsaddr(_) => CODE_DNSADDR,
            Protocol::Tcp(_) => CODE_TCP,
            Protocol::Udp(_) => CODE_UDP,
            Protocol::Quic => CODE_QUIC,
            Protocol::QuicV1 => CODE_QUIC_V1,
            Protocol::P2pCircuit => CODE_P2P_CIRCUIT,
            Protocol::P2p(_) => CODE_P2P,
        }
    }

    /// First component of an address must be an address family; these are the ones.
    fn is_address_family(&self) -> bool {
        matches!(
            self,
            Protocol::Ip4(_) | Protocol::Ip6(_) | Protocol::Dns(_) | Protocol::Dns4(_) | Protocol::Dns6(_) | Protocol::Dnsaddr(_)
        )
    }

    fn is_transport_port(&self) -> bool {
        matches!(self, Protocol::Tcp(_) | Protocol::Udp(_))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        encode_varint(self.code(), out);
        match self {
            Protocol::Ip4(ip) => out.extend_from_slice(&ip.octets()),
            Protocol::Ip6(ip) => out.extend_from_slice(&ip.octets()),
            Protocol::Tcp(port) | Protocol::Udp(port) => out.extend_from_slice(&port.to_be_bytes()),
            Protocol::Dns(s) | Protocol::Dns4(s) | Protocol::Dns6(s) | Protocol::Dnsaddr(s) => {
                encode_varint(s.len() as u64, out);
                out.extend_from_slice(s.as_bytes());
            }
            Protocol::Quic | Protocol::QuicV1 | Protocol::P2pCircuit => {}
            Protocol::P2p(peer) => {
                encode_varint(peer.as_bytes().len() as u64, out);
                out.extend_from_slice(peer.as_bytes());
            }
        }
    }

    fn decode(code: u64, buf: &mut &[u8]) -> Result<Self> {
        match code {
            CODE_IP4 => {
                let bytes = take(buf, 4)?;
                Ok(Protocol::Ip4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])))
            }
            CODE_IP6 => {
                let bytes = take(buf, 16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Ok(Protocol::Ip6(Ipv6Addr::from(octets)))
            }
            CODE_TCP => Ok(Protocol::Tcp(take_u16(buf)?)),
            CODE_UDP => Ok(Protocol::Udp(take_u16(buf)?)),
            CODE_DNS => Ok(Protocol::Dns(take_string(buf)?)),
            CODE_DNS4 => Ok(Protocol::Dns4(take_string(buf)?)),
            CODE_DNS6 => Ok(Protocol::Dns6(take_string(buf)?)),
            CODE_DNSADDR => Ok(Protocol::Dnsaddr(take_string(buf)?)),
            CODE_QUIC => Ok(Protocol::Quic),
            CODE_QUIC_V1 => Ok(Protocol::QuicV1),
            CODE_P2P_CIRCUIT => Ok(Protocol::P2pCircuit),
            CODE_P2P => {
                let len = decode_varint(buf)? as usize;
                let bytes = take(buf, len)?;
                if len != 32 {
                    return Err(Error::address("p2p component must be 32 bytes"));
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(bytes);
                Ok(Protocol::P2p(PeerId::from_bytes(arr)))
            }
            other => Err(Error::address(format!("unknown protocol code {other}"))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ip4(ip) => write!(f, "/ip4/{ip}"),
            Protocol::Ip6(ip) => write!(f, "/ip6/{ip}"),
            Protocol::Dns(s) => write!(f, "/dns/{s}"),
            Protocol::Dns4(s) => write!(f, "/dns4/{s}"),
            Protocol::Dns6(s) => write!(f, "/dns6/{s}"),
            Protocol::Dnsaddr(s) => write!(f, "/dnsaddr/{s}"),
            Protocol::Tcp(p) => write!(f, "/tcp/{p}"),
            Protocol::Udp(p) => write!(f, "/udp/{p}"),
            Protocol::Quic => write!(f, "/quic"),
            Protocol::QuicV1 => write!(f, "/quic-v1"),
            Protocol::P2pCircuit => write!(f, "/p2p-circuit"),
            Protocol::P2p(peer) => write!(f, "/p2p/{peer}"),
        }
    }
}

/// A fully qualified network endpoint: an ordered sequence of [`Protocol`]
/// components. Immutable once constructed, per the data-model lifecycle rule.
#[derive(Clone, PartialEq, Eq)]
pub struct Addr(Vec<Protocol>);

impl Addr {
    pub fn new(components: Vec<Protocol>) -> Result<Self> {
        match components.first() {
            Some(p) if p.is_address_family() => {}
            _ => return Err(Error::address("address must start with an address-family component")),
        }
        Ok(Self(components))
    }

    pub fn components(&self) -> &[Protocol] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for p in &self.0 {
            p.encode(&mut out);
        }
        out
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<Self> {
        let mut components = Vec::new();
        while !buf.is_empty() {
            let code = decode_varint(&mut buf)?;
            components.push(Protocol::decode(code, &mut buf)?);
        }
        Self::new(components)
    }

    /// True if a `p2p-circuit` marker is present anywhere in the address.
    pub fn is_relayed(&self) -> bool {
        self.0.iter().any(|p| matches!(p, Protocol::P2pCircuit))
    }

    /// Splits a relayed address into (relay-facing prefix, target-peer suffix),
    /// per the invariant that a `p2p-circuit` component divides the address.
    pub fn split_circuit(&self) -> Option<(Addr, Addr)> {
        let idx = self.0.iter().position(|p| matches!(p, Protocol::P2pCircuit))?;
        let prefix = self.0[..idx].to_vec();
        let suffix = self.0[idx + 1..].to_vec();
        let prefix = Addr(prefix);
        // the suffix does not necessarily start with an address-family component
        // (it is typically just a `/p2p/<peer>`), so it is wrapped without validation.
        Some((prefix, Addr(suffix)))
    }

    /// Removes the `p2p-circuit` marker and everything after it, returning just
    /// the relay-reachable prefix. Used before advertising addresses in DCUtR
    /// `CONNECT` messages, per §4.4 "All addresses carried MUST have the
    /// relay-circuit marker stripped."
    pub fn without_circuit_marker(&self) -> Addr {
        match self.0.iter().position(|p| matches!(p, Protocol::P2pCircuit)) {
            Some(idx) => Addr(self.0[..idx].to_vec()),
            None => self.clone(),
        }
    }

    /// The thin waist: first IP component plus first TCP/UDP component, per
    /// the glossary definition. `None` if the address lacks either.
    pub fn thin_waist(&self) -> Option<(Protocol, Protocol)> {
        let ip = self.0.iter().find(|p| matches!(p, Protocol::Ip4(_) | Protocol::Ip6(_)))?;
        let port = self.0.iter().find(|p| p.is_transport_port())?;
        Some((ip.clone(), port.clone()))
    }

    pub fn first_ip(&self) -> Option<IpAddr> {
        self.0.iter().find_map(|p| match p {
            Protocol::Ip4(ip) => Some(IpAddr::V4(*ip)),
            Protocol::Ip6(ip) => Some(IpAddr::V6(*ip)),
            _ => None,
        })
    }

    /// Whether the first address-family component denotes a private or
    /// loopback network, per the DCUtR address-filtering rule (§4.4).
    pub fn is_private_or_loopback(&self) -> bool {
        match self.first_ip() {
            Some(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
            Some(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified() || is_unique_local_v6(&v6),
            None => false,
        }
    }
}

fn is_unique_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.0 {
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

// --- varint (unsigned LEB128), matching the multiaddr/multicodec wire format ---

pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub fn decode_varint(buf: &mut &[u8]) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf.first().ok_or_else(|| Error::address("truncated varint"))?;
        *buf = &buf[1..];
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::address("varint too long"));
        }
    }
    Ok(value)
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::address("truncated address component"));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_u16(buf: &mut &[u8]) -> Result<u16> {
    let bytes = take(buf, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn take_string(buf: &mut &[u8]) -> Result<String> {
    let len = decode_varint(buf)? as usize;
    let bytes = take(buf, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::address(e.to_string()))
}
