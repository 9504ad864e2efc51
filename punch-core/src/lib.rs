#![forbid(unsafe_code)]

//! Shared plumbing for the NAT traversal workspace: addresses, peer ids, the
//! error taxonomy's common variants, an injectable clock, a storage seam, and
//! the host/peerstore/event-bus traits the four subsystem crates are written
//! against.

pub mod addr;
pub mod clock;
pub mod error;
pub mod host;
pub mod peer_id;
pub mod storage;

pub use addr::{Addr, Protocol};
pub use clock::{system_clock, Clock, SharedClock};
pub use error::{Error, Result};
pub use peer_id::PeerId;
pub use storage::{FileStorage, InMemoryStorage, Storage};
