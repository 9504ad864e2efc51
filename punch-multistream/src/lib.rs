#![forbid(unsafe_code)]

//! multistream-select: negotiates, over a freshly opened byte stream, exactly
//! one of the application protocols both sides understand (`spec.md` §4.1).

pub mod error;
pub mod io;
pub mod lazy;
pub mod leftover;
pub mod negotiate;
pub mod registry;
pub mod token;

pub use error::{Error, Result};
pub use io::NegotiationTimeouts;
pub use lazy::LazyClientStream;
pub use leftover::LeftoverStream;
pub use negotiate::{dialer_select, listener_select};
pub use registry::HandlerRegistry;
pub use token::FRAMEWORK_ID;
