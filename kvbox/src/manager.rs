//! Connection lifecycle: lazy connect, session setup, retries and teardown.

use tracing::{debug, trace, warn};

use crate::codec::Compression;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::stats::Statistics;
use crate::transport::{Connector, Endpoint, SessionOption, Transport, TransportError};

/// Payload of the liveness probe, the store must echo it back verbatim.
pub const PING_PAYLOAD: &str = "kvbox-liveness-probe";

/// Where a [`ConnectionManager`] is in its connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, the next operation will open one.
    NotConnected,
    /// Attempt number `attempt` (starting at 1) is in progress.
    Connecting { attempt: u32 },
    /// Session is set up and answered the liveness probe.
    Connected,
    /// The last connect cycle gave up after `tries` attempts.
    Failed { tries: u32 },
}

/// Owns the configuration and the single connection of a cache client.
///
/// The connection is opened lazily by the first operation (see
/// [`CacheOperations`](crate::CacheOperations)), and reopened by the next
/// operation after a [`disconnect`](crate::CacheOperations::disconnect) or a
/// failed connect cycle.
///
/// Operations take `&mut self`: one manager serves one logical owner. Use one
/// manager per concurrent unit of work, or wrap it in a lock.
///
/// ```no_run
/// use kvbox::{CacheOperations, ClientConfig, ConnectionManager};
/// use kvbox_memory::MemoryConnector;
/// use serde_json::json;
///
/// # async fn run() -> kvbox::Result<()> {
/// let config = ClientConfig::builder().host("localhost")?.port(6379).build();
/// let mut cache = ConnectionManager::new(config, MemoryConnector::new());
///
/// cache.set("greeting", json!("hello")).await?;
/// assert_eq!(cache.get("greeting").await?, json!("hello"));
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<C>
where
    C: Connector,
{
    config: ClientConfig,
    connector: C,
    state: ConnectionState,
    transport: Option<C::Transport>,
    stats: Statistics,
}

impl<C> ConnectionManager<C>
where
    C: Connector,
{
    /// Creates a manager. Nothing is opened until the first operation.
    pub fn new(config: ClientConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            state: ConnectionState::NotConnected,
            transport: None,
            stats: Statistics::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Hit and miss counters of [`exists`](crate::CacheOperations::exists).
    pub fn stats(&self) -> Statistics {
        self.stats
    }

    /// True when host and port are set.
    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.transport.is_some()
    }

    /// Connects now instead of on the first operation. No-op when connected.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport().await.map(|_| ())
    }

    /// Drops the current connection and opens a new one.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.close_transport().await;
        self.establish().await.map(|_| ())
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Statistics {
        &mut self.stats
    }

    /// Connection for the next command, connecting first if needed.
    pub(crate) async fn transport(&mut self) -> Result<&mut C::Transport> {
        trace!("Get transport");
        match self.transport {
            Some(ref mut transport) => Ok(transport),
            None => self.establish().await,
        }
    }

    /// Closes the connection and forgets it. Teardown failures are dropped.
    pub(crate) async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match transport.close().await {
                Ok(()) => debug!("Transport closed"),
                Err(error) => debug!(%error, "Ignoring transport teardown failure"),
            }
        }
        self.state = ConnectionState::NotConnected;
    }

    async fn establish(&mut self) -> Result<&mut C::Transport> {
        let Some(endpoint) = self.config.endpoint() else {
            return Err(Error::NotConfigured);
        };
        let label = endpoint.to_string();
        let tries = self.config.connect_tries();

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.state = ConnectionState::Connecting { attempt };
            metrics::record_connect_attempt(&label);

            match self.attempt(&endpoint).await {
                Ok(transport) => {
                    debug!(endpoint = %label, attempt, "Connected");
                    self.state = ConnectionState::Connected;
                    return Ok(self.transport.insert(transport));
                }
                Err(error) if attempt < tries => {
                    warn!(endpoint = %label, attempt, tries, %error, "Connection attempt failed, retrying");
                }
                Err(error) => {
                    warn!(endpoint = %label, attempt, tries, %error, "Connection attempt failed, giving up");
                    metrics::record_connect_failure(&label);
                    self.state = ConnectionState::Failed { tries: attempt };
                    return Err(Error::TriesExceeded {
                        tries: attempt,
                        cause: Box::new(error),
                    });
                }
            }
        }
    }

    /// One connect attempt: open, set the session up, probe.
    ///
    /// A half-built connection is closed before the error is returned.
    async fn attempt(&self, endpoint: &Endpoint) -> Result<C::Transport> {
        let timeout = self.config.connect_timeout();
        let opened = if self.config.persistent() {
            self.connector.pconnect(endpoint, timeout).await
        } else {
            self.connector.connect(endpoint, timeout).await
        };
        let mut transport = opened.map_err(connection_failed)?;

        if let Err(error) = self.prepare(&mut transport).await {
            if let Err(teardown) = transport.close().await {
                debug!(error = %teardown, "Ignoring teardown failure of half-built connection");
            }
            return Err(error);
        }
        Ok(transport)
    }

    async fn prepare(&self, transport: &mut C::Transport) -> Result<()> {
        if let Some(password) = self.config.auth_password() {
            debug!("Authenticating");
            transport.auth(password).await.map_err(connection_failed)?;
        }
        if let Some(db) = self.config.db_index() {
            debug!(db, "Selecting database");
            transport.select(db).await.map_err(connection_failed)?;
        }
        if let Some(prefix) = self.config.key_prefix() {
            debug!(prefix, "Setting key prefix");
            transport
                .set_option(SessionOption::Prefix(prefix.to_owned()))
                .await
                .map_err(connection_failed)?;
        }

        let serializer = self.config.capabilities().best_serializer();
        debug!(%serializer, "Setting serializer");
        transport
            .set_option(SessionOption::Serializer(serializer))
            .await
            .map_err(connection_failed)?;

        let compression = self.config.compression();
        if compression != Compression::None {
            debug!(%compression, "Setting compression");
            transport
                .set_option(SessionOption::Compression(compression))
                .await
                .map_err(connection_failed)?;
        }

        let echo = transport.ping(PING_PAYLOAD).await.map_err(connection_failed)?;
        if echo != PING_PAYLOAD {
            return Err(Error::ConnectionFailed(
                format!("liveness probe expected {PING_PAYLOAD:?}, got {echo:?}").into(),
            ));
        }
        Ok(())
    }
}

fn connection_failed(error: TransportError) -> Error {
    Error::ConnectionFailed(Box::new(error))
}

impl<C> std::fmt::Debug for ConnectionManager<C>
where
    C: Connector,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
