use thiserror::Error;

/// Errors surfaced by source login.
///
/// Each variant corresponds to a response the caller must send back to
/// the connecting encoder; none of them are retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("access denied")]
    Forbidden,
    #[error("not an NTRIP source")]
    NotNtrip,
    #[error("unauthorized source")]
    Unauthorized,
    #[error("empty source request")]
    EmptyRequest,
    #[error("mountpoint already in use")]
    MountConflict,
    #[error("server full")]
    CapacityExceeded,
}

/// Errors that terminate a source or client's participation in the fan-out
/// loop. These never propagate out of the owning thread; they
/// are converted into a kick (a state transition) by the caller.
#[derive(Debug, Clone, Error)]
pub enum KickReason {
    #[error("Source died")]
    SourceDied,
    #[error("Broken connection")]
    BrokenConnection,
    #[error("Too many errors (client not receiving data fast enough)")]
    TooManyErrors,
    #[error("UDP connection timeout")]
    UdpTimeout,
    #[error("{0}")]
    Other(String),
}
