//! Three-stage mapping test (`spec.md` §4.2).

use crate::behavior::Classification;
use crate::error::Result;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};

/// Sends a probe to `to` from the same local port across calls and reports
/// the externally observed mapped endpoint. A probe that times out is not an
/// error — the mapping test treats it as a legitimate `unknown` verdict.
#[async_trait]
pub trait MappingProbe: Send + Sync {
    async fn probe(&self, to: SocketAddr) -> Result<Option<SocketAddr>>;
}

pub async fn run_mapping_test(
    probe: &dyn MappingProbe,
    primary: SocketAddr,
    alternate_ip: IpAddr,
) -> Result<Classification> {
    let m_a = match probe.probe(primary).await? {
        Some(m) => m,
        None => return Ok(Classification::Unknown),
    };

    let probe_b_target = SocketAddr::new(alternate_ip, primary.port());
    let m_b = match probe.probe(probe_b_target).await? {
        Some(m) => m,
        None => return Ok(Classification::Unknown),
    };

    if m_a.port() == m_b.port() {
        return Ok(Classification::EndpointIndependent);
    }

    let probe_c_target = SocketAddr::new(primary.ip(), primary.port().wrapping_add(1));
    let m_c = match probe.probe(probe_c_target).await? {
        Some(m) => m,
        None => return Ok(Classification::Unknown),
    };

    if m_a.port() == m_c.port() {
        Ok(Classification::AddressDependent)
    } else {
        Ok(Classification::AddressAndPortDependent)
    }
}
