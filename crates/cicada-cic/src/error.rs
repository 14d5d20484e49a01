//! Error types for the checkpointing protocol.

/// Failure of a call to a remote collaborator (storage, location, recovery
/// server or the message transport).
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The remote endpoint could not be reached; it may have failed or moved.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The remote endpoint answered but refused the call.
    #[error("call rejected: {0}")]
    Rejected(String),

    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// Errors raised by a fault-tolerance manager.
#[derive(thiserror::Error, Debug)]
pub enum FtError {
    /// Committed history outside of the locally retained range. This is an
    /// invariant break and is never recovered.
    #[error(
        "protocol violation: deleting history from {from} up to {up_to} while local history spans {base} up to {delivered}"
    )]
    ProtocolViolation {
        from: u64,
        up_to: u64,
        base: u64,
        delivered: u64,
    },

    #[error("cannot perform this call on the manager of a half body: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid manager settings: {0}")]
    InvalidSettings(String),

    #[error("unable to snapshot entity state: {0}")]
    Snapshot(String),
}
