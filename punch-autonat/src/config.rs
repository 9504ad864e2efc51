//! AutoNATv2 configuration (`spec.md` §6).

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DIAL_DATA_MAX_BYTES: u64 = 100_000;
pub const DIAL_DATA_MIN_BYTES: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoNatConfig {
    pub server_rpm: usize,
    pub server_per_peer_rpm: usize,
    pub server_dial_data_rpm: usize,
    pub allow_private_addrs: bool,
    #[serde(with = "secs")]
    pub amplification_wait: Duration,
    #[serde(with = "secs")]
    pub stream_timeout: Duration,
    #[serde(with = "secs")]
    pub dial_back_stream_timeout: Duration,
    #[serde(with = "secs")]
    pub dial_back_dial_timeout: Duration,
    pub max_msg_size: usize,
    pub dial_back_max_msg_size: usize,
}

impl Default for AutoNatConfig {
    fn default() -> Self {
        Self {
            server_rpm: 60,
            server_per_peer_rpm: 12,
            server_dial_data_rpm: 12,
            allow_private_addrs: false,
            amplification_wait: Duration::from_secs(3),
            stream_timeout: Duration::from_secs(15),
            dial_back_stream_timeout: Duration::from_secs(5),
            dial_back_dial_timeout: Duration::from_secs(5),
            max_msg_size: 8 * 1024,
            dial_back_max_msg_size: 1024,
        }
    }
}

impl AutoNatConfig {
    pub fn from_toml(s: &str) -> punch_core::Result<Self> {
        toml::from_str(s).map_err(Into::into)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = AutoNatConfig::default();
        assert_eq!(config.server_rpm, 60);
        assert_eq!(config.amplification_wait, Duration::from_secs(3));
    }
}
