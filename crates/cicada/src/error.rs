//! Errors of the facade.

use cicada_cic::{FtError, TransportError};
use cicada_config::ConfigError;

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, CicadaError>;

#[derive(thiserror::Error, Debug)]
pub enum CicadaError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured protocol is known but has no manager in this build.
    #[error("protocol {0} is not available")]
    UnsupportedProtocol(String),

    #[error("unable to reach fault-tolerance server: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Ft(#[from] FtError),
}
