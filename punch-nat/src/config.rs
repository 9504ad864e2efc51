//! NAT discovery configuration (`spec.md` §6, TOML via serde like every
//! other crate in the workspace).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatConfig {
    pub max_history_size: usize,
    #[serde(with = "humantime_secs")]
    pub check_interval: Duration,
    #[serde(with = "humantime_secs")]
    pub probe_timeout: Duration,
    pub storage_key: String,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            max_history_size: 100,
            check_interval: Duration::from_secs(30 * 60),
            probe_timeout: Duration::from_secs(5),
            storage_key: crate::tracker::DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl NatConfig {
    pub fn from_toml(s: &str) -> punch_core::Result<Self> {
        toml::from_str(s).map_err(Into::into)
    }
}

mod humantime_secs {
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
        let config = NatConfig::default();
        assert_eq!(config.max_history_size, 100);
        assert_eq!(config.check_interval, Duration::from_secs(1800));
    }

    #[test]
    fn parses_from_toml_with_partial_overrides() {
        let config = NatConfig::from_toml("max_history_size = 50\n").unwrap();
        assert_eq!(config.max_history_size, 50);
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }
}
