//! Error type shared by every ESDM component.

/// Errors surfaced by the ESDM service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EsdmError {
    /// The DRNG has not been allocated yet.
    #[error("ESDM not yet available")]
    Unavailable,
    /// A request the backend refused outright.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The crypto primitive failed to seed, hash or generate.
    #[error("crypto primitive failure: {0}")]
    Fault(String),
    /// A non-blocking wait was requested but the condition is not met.
    #[error("operation would block")]
    WouldBlock,
    /// The operation is not compiled in or not offered by the backend.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EsdmError>;
