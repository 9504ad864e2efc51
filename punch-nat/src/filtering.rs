//! Four-stage filtering test (`spec.md` §4.2).

use crate::behavior::Classification;
use crate::error::Result;
use crate::wire::{CHANGE_IP, CHANGE_PORT};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Response to a single filtering sub-probe, or `None` on timeout (a
/// legitimate, non-error outcome per the mapping/filtering test design).
pub struct ProbeResponse {
    pub other_address: Option<SocketAddr>,
}

#[async_trait]
pub trait FilteringProbe: Send + Sync {
    /// `change_request` carries `CHANGE_IP`/`CHANGE_PORT` bits asking the
    /// responder to source its reply from a different endpoint.
    async fn probe(&self, to: SocketAddr, change_request: Option<u32>) -> Result<Option<ProbeResponse>>;
}

pub async fn run_filtering_test(probe: &dyn FilteringProbe, primary: SocketAddr) -> Result<Classification> {
    let first = match probe.probe(primary, None).await? {
        Some(r) => r,
        None => return Ok(Classification::Unknown),
    };
    let alternate = match first.other_address {
        Some(a) => a,
        None => return Ok(Classification::Unknown),
    };

    if probe.probe(primary, Some(CHANGE_IP | CHANGE_PORT)).await?.is_some() {
        return Ok(Classification::EndpointIndependent);
    }

    let touch = match probe.probe(alternate, None).await? {
        Some(r) => r,
        None => return Ok(Classification::Unknown),
    };
    if touch.other_address.is_none() {
        return Ok(Classification::Unknown);
    }

    if probe.probe(alternate, Some(CHANGE_PORT)).await?.is_some() {
        Ok(Classification::AddressDependent)
    } else {
        Ok(Classification::AddressAndPortDependent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct MockProbe {
        // (target, change_request) -> response
        responses: Mutex<HashMap<(SocketAddr, Option<u32>), Option<SocketAddr>>>,
    }

    #[async_trait]
    impl FilteringProbe for MockProbe {
        async fn probe(&self, to: SocketAddr, change_request: Option<u32>) -> Result<Option<ProbeResponse>> {
            let responses = self.responses.lock().await;
            match responses.get(&(to, change_request)) {
                Some(other) => Ok(Some(ProbeResponse { other_address: *other })),
                None => Ok(None),
            }
        }
    }

    fn primary() -> SocketAddr {
        "10.0.0.1:3478".parse().unwrap()
    }

    fn alternate() -> SocketAddr {
        "10.0.0.2:3479".parse().unwrap()
    }

    #[tokio::test]
    async fn endpoint_independent_when_changed_reply_arrives() {
        let mut responses = HashMap::new();
        responses.insert((primary(), None), Some(alternate()));
        responses.insert((primary(), Some(CHANGE_IP | CHANGE_PORT)), Some(alternate()));
        let probe = MockProbe { responses: Mutex::new(responses) };

        let verdict = run_filtering_test(&probe, primary()).await.unwrap();
        assert_eq!(verdict, Classification::EndpointIndependent);
    }

    #[tokio::test]
    async fn address_dependent_when_only_port_change_reply_arrives() {
        let mut responses = HashMap::new();
        responses.insert((primary(), None), Some(alternate()));
        responses.insert((alternate(), None), Some(alternate()));
        responses.insert((alternate(), Some(CHANGE_PORT)), Some(alternate()));
        let probe = MockProbe { responses: Mutex::new(responses) };

        let verdict = run_filtering_test(&probe, primary()).await.unwrap();
        assert_eq!(verdict, Classification::AddressDependent);
    }

    #[tokio::test]
    async fn address_and_port_dependent_when_nothing_changed_arrives() {
        let mut responses = HashMap::new();
        responses.insert((primary(), None), Some(alternate()));
        responses.insert((alternate(), None), Some(alternate()));
        let probe = MockProbe { responses: Mutex::new(responses) };

        let verdict = run_filtering_test(&probe, primary()).await.unwrap();
        assert_eq!(verdict, Classification::AddressAndPortDependent);
    }

    #[tokio::test]
    async fn missing_other_address_degrades_to_unknown() {
        let mut responses = HashMap::new();
        responses.insert((primary(), None), None);
        let probe = MockProbe { responses: Mutex::new(responses) };

        let verdict = run_filtering_test(&probe, primary()).await.unwrap();
        assert_eq!(verdict, Classification::Unknown);
    }
}
