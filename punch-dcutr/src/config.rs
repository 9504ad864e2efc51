//! DCUtR timeouts and retry policy (`spec.md` §5, §6).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DcutrConfig {
    #[serde(with = "secs")]
    pub dial_timeout: Duration,
    #[serde(with = "secs")]
    pub attempt_timeout: Duration,
    pub max_retries: u32,
    pub max_message_len: usize,
}

impl Default for DcutrConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(60),
            max_retries: 3,
            max_message_len: crate::wire::MAX_MESSAGE_LEN,
        }
    }
}

impl DcutrConfig {
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
