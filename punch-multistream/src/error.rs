use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream reset")]
    Reset,
    #[error("incorrect multistream version")]
    IncorrectVersion,
    #[error("unrecognized response")]
    UnrecognizedResponse,
    #[error("token exceeds maximum size")]
    MessageTooLarge,
    #[error("no common protocol")]
    NoCommonProtocol,
    #[error("negotiation timed out")]
    Timeout,
    #[error("token was not valid utf-8")]
    InvalidUtf8,
}
