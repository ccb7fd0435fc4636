use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("retry should be greater than 0, got {0}")]
    InvalidRetry(u32),

    #[error("filter map error: {0}")]
    Map(String),

    #[error("filter map not found at {}", .path.display())]
    MapNotFound { path: PathBuf },

    #[error("address {0} is not supported by the filter map")]
    UnsupportedAddress(IpAddr),

    #[error("filter manager has been stopped")]
    Stopped,
}

impl From<aya::maps::MapError> for Error {
    fn from(err: aya::maps::MapError) -> Self {
        Self::Map(err.to_string())
    }
}
