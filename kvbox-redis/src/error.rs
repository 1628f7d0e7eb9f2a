//! Error types for the Redis transport.
//!
//! Errors are converted to [`TransportError`] before they reach
//! [`ConnectionManager`](kvbox::ConnectionManager): failures of the
//! connection itself become [`TransportError::Io`], replies in which the
//! server refused a command become [`TransportError::Rejected`].

use std::time::Duration;

use kvbox::TransportError;
use redis::RedisError;

/// Error type for Redis transport operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client.
    ///
    /// This covers both lost connections and commands refused by the server,
    /// see [`Error::is_connection_error`].
    #[error("Redis transport error: {0}")]
    Redis(#[from] RedisError),

    /// Opening the connection took longer than the connect timeout.
    #[error("connection not established within {0:?}")]
    ConnectTimeout(Duration),

    /// A command was sent on a connection that was already closed.
    #[error("connection is closed")]
    Closed,
}

impl Error {
    /// True when the connection, not the command, failed.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Redis(error) => {
                error.is_io_error()
                    || error.is_connection_dropped()
                    || error.is_connection_refusal()
                    || error.is_timeout()
            }
            Error::ConnectTimeout(_) | Error::Closed => true,
        }
    }
}

impl From<Error> for TransportError {
    fn from(error: Error) -> Self {
        if error.is_connection_error() {
            return TransportError::Io(Box::new(error));
        }
        match error {
            Error::Redis(error) => TransportError::Rejected(error.to_string()),
            other => TransportError::Io(Box::new(other)),
        }
    }
}
