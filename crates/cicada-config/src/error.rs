//! Errors raised while loading or checking configuration.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but cannot be read.
    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed TOML in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Unknown fault-tolerance protocol '{0}' (expected 'cic' or 'pml')")]
    UnknownProtocol(String),

    #[error("Unable to init fault tolerance: servers are not correctly set ({0})")]
    ServersNotSet(String),

    #[error("invalid configuration: {0}")]
    ValidationError(String),

    #[error("user directory unavailable: {0}")]
    XdgError(String),
}
