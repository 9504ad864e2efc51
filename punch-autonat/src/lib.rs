#![forbid(unsafe_code)]

//! AutoNATv2 reachability verification (`spec.md` §4.3): a client flow that
//! asks peers to dial it back, a server flow that services such requests
//! under rate limiting and anti-amplification controls, and the supporting
//! wire codec, peer inventory and configuration.

pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod peer_inventory;
pub mod rate_limiter;
pub mod server;
pub mod wire;

pub use client::{run_client_dial_request, DialBackRegistry, Verdict};
pub use config::AutoNatConfig;
pub use error::{Error, Result};
pub use framing::{read_framed, write_framed};
pub use peer_inventory::PeerInventory;
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterMetrics};
pub use server::{serve_dial_request, DialBackDialer, DialBackOutcome};
