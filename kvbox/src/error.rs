//! Error types for connection management and cache operations.

use thiserror::Error;

use crate::codec::Compression;
use crate::transport::TransportError;

/// Boxed error used to carry the underlying transport cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for [`ConnectionManager`](crate::ConnectionManager) operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`ConnectionManager`](crate::ConnectionManager).
///
/// Every data operation error reaches the caller. The only failures that are
/// suppressed are the ones raised while tearing a connection down.
#[derive(Debug, Error)]
pub enum Error {
    /// Host or port is missing, nothing to connect to.
    ///
    /// Raised before any connection attempt and never retried.
    #[error("connection is not configured: host and port are required")]
    NotConfigured,

    /// A single connection attempt or a command failed at the transport level.
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] BoxError),

    /// Every configured connection attempt failed.
    #[error("connection failed after {tries} tries")]
    TriesExceeded {
        /// Number of attempts made.
        tries: u32,
        /// Failure of the last attempt.
        #[source]
        cause: BoxError,
    },

    /// The store rejected an operation that is expected to always succeed.
    #[error("impossible value: {0}")]
    ImpossibleValue(String),

    /// A read that requires the key to be present found nothing.
    #[error("key `{0}` not found")]
    KeyNotFound(String),

    /// A script call left an error in the transport's last-error slot.
    #[error("script execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Rejected(message) => Error::ImpossibleValue(message),
            TransportError::Io(cause) => Error::ConnectionFailed(cause),
        }
    }
}

/// Validation errors raised by configuration setters and by map parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required field is absent from the configuration map.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// Host must be a non-empty string.
    #[error("host must not be empty")]
    EmptyHost,

    /// Port is outside of 0..=65535.
    #[error("port {0} is out of range 0..=65535")]
    InvalidPort(i64),

    /// Connect timeout must be a finite, non-negative number of seconds.
    #[error("connect timeout {0} must be a non-negative number of seconds")]
    InvalidTimeout(f64),

    /// At least one connection attempt is required.
    #[error("connect tries must be positive, got {0}")]
    InvalidTries(i64),

    /// Database index is outside of 0..=15.
    #[error("database index {0} is out of range 0..=15")]
    InvalidDatabase(i64),

    /// Cache TTL must be a non-negative number of seconds.
    #[error("cache ttl {0} must be non-negative")]
    InvalidTtl(i64),

    /// Auth credential must be non-empty when given.
    #[error("auth password must not be empty")]
    EmptyPassword,

    /// Compression mode is not advertised by the environment.
    #[error("compression `{0}` is not supported in this environment")]
    UnsupportedCompression(Compression),

    /// The configuration document could not be parsed.
    #[error("invalid configuration document: {0}")]
    Parse(String),
}
