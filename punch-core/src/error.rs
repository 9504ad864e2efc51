use thiserror::Error;

/// Crate-wide result alias, mirroring the per-crate `Result<T, E = Error>` convention
/// used throughout the workspace.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Shared error taxonomy for the bits of plumbing every crate in the workspace
/// touches (addresses, storage, configuration). Subsystem crates define their
/// own richer `Error` enums for protocol-specific failures and convert into or
/// out of this one at the boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("address: {0}")]
    Address(String),
    #[error("storage: {0}")]
    Storage(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn address(msg: impl Into<String>) -> Self {
        Self::Address(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
