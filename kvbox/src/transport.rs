//! Boundary between [`ConnectionManager`](crate::ConnectionManager) and the
//! client that actually speaks to the store.
//!
//! If you want to plug in your own store client, you are in the right place:
//! implement [`Connector`] to open connections and [`Transport`] for the
//! commands. Values handed to a transport are already sentinel-encoded, the
//! transport is responsible for turning them into bytes with the session's
//! [`ValueCodec`](crate::codec::ValueCodec) and for applying the key prefix.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::Value;
use crate::codec::{CodecError, Compression, Serializer};
use crate::error::BoxError;

pub type TransportResult<T> = Result<T, TransportError>;

/// Failure reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The store answered, but refused the command (wrong type, missing key,
    /// not an integer, ...).
    #[error("command rejected: {0}")]
    Rejected(String),

    /// The command never got a usable answer: I/O, timeout, protocol or
    /// codec failure.
    #[error(transparent)]
    Io(BoxError),
}

impl TransportError {
    pub fn io(error: impl Into<BoxError>) -> Self {
        TransportError::Io(error.into())
    }
}

impl From<CodecError> for TransportError {
    fn from(error: CodecError) -> Self {
        TransportError::Io(Box::new(error))
    }
}

/// Network location of the store, plus the credentials and database a
/// connection must re-establish whenever it reconnects on its own.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    tls: bool,
    password: Option<String>,
    db: Option<u8>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
            password: None,
            db: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_db(mut self, db: u8) -> Self {
        self.db = Some(db);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn db(&self) -> Option<u8> {
        self.db
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tls {
            write!(f, "tls://{}:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Session-level option applied right after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOption {
    /// Prepended to every key sent, stripped from every key returned.
    Prefix(String),
    Serializer(Serializer),
    Compression(Compression),
}

/// Flags of a single-key write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expire the key after this long.
    pub ttl: Option<Duration>,
    /// Write only if the key does not exist yet.
    pub only_if_absent: bool,
}

impl SetOptions {
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            only_if_absent: false,
        }
    }

    pub fn if_absent() -> Self {
        Self {
            ttl: None,
            only_if_absent: true,
        }
    }
}

/// Opens connections to the store.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    /// Opens a connection that is closed for good by [`Transport::close`].
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> TransportResult<Self::Transport>;

    /// Opens a long-lived connection that the client may keep and reuse.
    async fn pconnect(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> TransportResult<Self::Transport>;
}

/// Commands of an established connection.
///
/// Replies follow the store's conventions: counts are what the store
/// counted, `bool` replies are the store's `1`/`0`, and [`ttl`](Self::ttl)
/// returns `-2` for a missing key and `-1` for a key without expiry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn auth(&mut self, password: &str) -> TransportResult<()>;

    async fn select(&mut self, db: u8) -> TransportResult<()>;

    async fn set_option(&mut self, option: SessionOption) -> TransportResult<()>;

    async fn ping(&mut self, payload: &str) -> TransportResult<String>;

    async fn get(&mut self, key: &str) -> TransportResult<Option<Value>>;

    /// Returns `false` if the write was not performed.
    async fn set(&mut self, key: &str, value: Value, options: SetOptions)
    -> TransportResult<bool>;

    async fn mget(&mut self, keys: &[&str]) -> TransportResult<Vec<Option<Value>>>;

    async fn mset(
        &mut self,
        entries: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> TransportResult<()>;

    /// Returns `false` if any of the keys already existed, nothing is written then.
    async fn msetnx(&mut self, entries: Vec<(String, Value)>) -> TransportResult<bool>;

    async fn getset(&mut self, key: &str, value: Value) -> TransportResult<Option<Value>>;

    async fn incr(&mut self, key: &str) -> TransportResult<i64>;

    async fn incr_by(&mut self, key: &str, delta: i64) -> TransportResult<i64>;

    async fn decr(&mut self, key: &str) -> TransportResult<i64>;

    async fn decr_by(&mut self, key: &str, delta: i64) -> TransportResult<i64>;

    /// Appends raw bytes to a string, bypassing the session codec.
    async fn append(&mut self, key: &str, suffix: &str) -> TransportResult<u64>;

    async fn del(&mut self, keys: &[&str]) -> TransportResult<u64>;

    async fn exists(&mut self, key: &str) -> TransportResult<bool>;

    async fn rename(&mut self, from: &str, to: &str) -> TransportResult<()>;

    async fn renamenx(&mut self, from: &str, to: &str) -> TransportResult<bool>;

    async fn strlen(&mut self, key: &str) -> TransportResult<u64>;

    async fn pexpire(&mut self, key: &str, ttl: Duration) -> TransportResult<bool>;

    /// Expires a key at a Unix time in milliseconds. A time in the past
    /// deletes the key.
    async fn pexpire_at(&mut self, key: &str, unix_millis: i64) -> TransportResult<bool>;

    async fn ttl(&mut self, key: &str) -> TransportResult<i64>;

    async fn persist(&mut self, key: &str) -> TransportResult<bool>;

    async fn getbit(&mut self, key: &str, offset: u64) -> TransportResult<bool>;

    /// Returns the previous bit.
    async fn setbit(&mut self, key: &str, offset: u64, bit: bool) -> TransportResult<bool>;

    /// Runs a script. Script errors go to the last-error slot.
    async fn eval(
        &mut self,
        script: &str,
        keys: &[&str],
        args: &[String],
    ) -> TransportResult<Value>;

    /// Runs a cached script by digest. Script errors go to the last-error slot.
    async fn evalsha(
        &mut self,
        digest: &str,
        keys: &[&str],
        args: &[String],
    ) -> TransportResult<Value>;

    fn last_error(&self) -> Option<String>;

    fn clear_last_error(&mut self);

    async fn sadd(&mut self, key: &str, members: Vec<Value>) -> TransportResult<u64>;

    async fn spop(&mut self, key: &str) -> TransportResult<Option<Value>>;

    async fn srandmember(&mut self, key: &str) -> TransportResult<Option<Value>>;

    async fn scard(&mut self, key: &str) -> TransportResult<u64>;

    async fn sismember(&mut self, key: &str, member: Value) -> TransportResult<bool>;

    async fn smembers(&mut self, key: &str) -> TransportResult<Vec<Value>>;

    async fn srem(&mut self, key: &str, members: Vec<Value>) -> TransportResult<u64>;

    async fn sdiffstore(&mut self, destination: &str, keys: &[&str]) -> TransportResult<u64>;

    /// Keys matching a glob pattern, without the session prefix.
    async fn keys(&mut self, pattern: &str) -> TransportResult<Vec<String>>;

    /// Starts flushing the whole store without waiting for it.
    async fn flushall_async(&mut self) -> TransportResult<()>;

    async fn close(&mut self) -> TransportResult<()>;
}
