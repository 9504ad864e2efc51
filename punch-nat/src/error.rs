use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("probe message parse error: {0}")]
    Parse(String),
    #[error("rendezvous service did not advertise an alternate address")]
    NoAlternateAddress,
    #[error("probe timed out")]
    Timeout,
    #[error("core error: {0}")]
    Core(#[from] punch_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
