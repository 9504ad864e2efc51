#![forbid(unsafe_code)]

//! NAT behavior discovery and classification (`spec.md` §4.2): probes a
//! two-address rendezvous service to classify local mapping and filtering
//! behavior, tracks that behavior over time, and picks a traversal strategy
//! from the result.

pub mod behavior;
pub mod config;
pub mod error;
pub mod filtering;
pub mod mapping;
pub mod strategy;
pub mod tracker;
pub mod wire;

pub use behavior::{Classification, History, NatBehavior};
pub use config::NatConfig;
pub use error::{Error, Result};
pub use filtering::{run_filtering_test, FilteringProbe, ProbeResponse};
pub use mapping::{run_mapping_test, MappingProbe};
pub use strategy::{choose_pair_strategy, choose_strategy, Strategy};
pub use tracker::{run_discovery, Tracker, TrackerConfig, TrackerMetrics};
