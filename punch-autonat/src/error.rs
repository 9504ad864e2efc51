use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("multistream error: {0}")]
    Multistream(#[from] punch_multistream::Error),
    #[error("core error: {0}")]
    Core(#[from] punch_core::Error),
    #[error("message parse error: {0}")]
    Parse(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("request rejected by rate limiter")]
    RequestRejected,
    #[error("server refused to dial")]
    DialRefused,
    #[error("no peer available that speaks autonat v2")]
    NoPeerAvailable,
    #[error("timed out waiting for dial-back")]
    Timeout,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
