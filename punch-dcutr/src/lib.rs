#![forbid(unsafe_code)]

//! DCUtR hole punching (`spec.md` §4.4): runs over an already-established
//! relayed connection, exchanging observed addresses and racing direct
//! dials in parallel once both sides are synchronized.

pub mod cancel;
pub mod config;
pub mod dialer;
pub mod error;
pub mod filter;
pub mod framing;
pub mod initiator;
pub mod responder;
pub mod wire;

pub use cancel::{CancelRegistry, CancelToken};
pub use config::DcutrConfig;
pub use dialer::{race_dials, DirectDialer};
pub use error::{Error, Result};
pub use filter::{filter_addrs, AddrFilter, AllowAll};
pub use initiator::{initiate, run_initiator_exchange, PROTOCOL_ID};
pub use responder::respond;
pub use wire::{HolePunch, HolePunchType};
