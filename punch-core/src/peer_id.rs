use std::fmt;

/// Stable logical identifier for a remote node.
///
/// The cryptographic derivation from a public key (identity subsystem) is out
/// of scope for this core; `PeerId` here is the opaque, byte-equal handle the
/// rest of the workspace consumes, the same way `nyx-control`'s DHT `NodeId`
/// is a plain 32-byte wrapper rather than a key-management type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex_encode(&self.0[..8]))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_encode(&self.0))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_byte_equality() {
        let a = PeerId::from_bytes([1u8; 32]);
        let b = PeerId::from_bytes([1u8; 32]);
        let c = PeerId::from_bytes([2u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_is_stable() {
        let a = PeerId::from_bytes([0xab; 32]);
        assert_eq!(a.to_string().len(), 64);
    }
}
