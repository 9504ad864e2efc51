use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("core error: {0}")]
    Core(#[from] punch_core::Error),
    #[error("message parse error: {0}")]
    Parse(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("a direct connection to the peer already exists")]
    AlreadyDirect,
    #[error("no candidate address could be reached")]
    AllDialsFailed,
    #[error("hole punch attempt cancelled")]
    Cancelled,
    #[error("timed out waiting for the peer's half of the exchange")]
    Timeout,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
