use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("core error: {0}")]
    Core(#[from] punch_core::Error),
    #[error("dcutr error: {0}")]
    Dcutr(#[from] punch_dcutr::Error),
    #[error("autonat error: {0}")]
    Autonat(#[from] punch_autonat::Error),
    #[error("observation queue is closed")]
    AggregatorClosed,
    #[error("no NAT behavior record available yet")]
    NoBehaviorRecorded,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
