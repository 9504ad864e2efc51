#![forbid(unsafe_code)]

//! NAT Traversal Coordinator (`spec.md` §4.5): the single "dial by peer id"
//! entry point that chooses a strategy from the current NAT behavior record
//! and falls back from hole punching to the relayed connection on failure,
//! plus the observed-address aggregator that feeds advertisable addresses
//! and whole-node NAT type inference back to the rest of the workspace.

pub mod coordinator;
pub mod error;
pub mod observed;

pub use coordinator::{dial_peer, DcutrContext, DialOutcome, Transport};
pub use error::{Error, Result};
pub use observed::{NatTypeInference, Observation, ObservedAddrAggregator, ThinWaist, TransportKind, ACTIVATION_THRESHOLD, MAX_EXTERNAL_PER_LOCAL};
