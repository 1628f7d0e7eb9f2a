//! Opening Redis connections.

use std::time::Duration;

use async_trait::async_trait;
use kvbox::transport::TransportResult;
use kvbox::{Connector, Endpoint};
use redis::Client;
use redis::aio::ConnectionManager;
use tracing::trace;

use crate::error::Error;
use crate::transport::{Connection, RedisTransport};

/// Opens [`RedisTransport`] connections with redis-rs.
///
/// [`connect`](Connector::connect) opens a multiplexed connection that lives
/// until it is closed. [`pconnect`](Connector::pconnect) opens a redis-rs
/// [`ConnectionManager`], which reconnects on its own when the socket drops.
///
/// The endpoint's password and database are part of the connection info, so
/// redis-rs authenticates and selects the database on every connection it
/// opens, reconnects included.
///
/// # Examples
/// ```no_run
/// use kvbox::{CacheOperations, ClientConfig, ConnectionManager};
/// use kvbox_redis::RedisConnector;
///
/// # async fn run() -> kvbox::Result<()> {
/// let config = ClientConfig::builder()
///     .host("127.0.0.1")?
///     .port(6379)
///     .persistent(true)
///     .build();
/// let mut cache = ConnectionManager::new(config, RedisConnector::new());
/// cache.set("greeting", serde_json::json!("hello")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RedisConnector {
    username: Option<String>,
}

impl RedisConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// ACL user to authenticate as. The password comes from the client
    /// configuration.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    fn client(&self, endpoint: &Endpoint) -> Result<Client, Error> {
        Ok(Client::open(connection_url(endpoint, self.username.as_deref()))?)
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
        persistent: bool,
    ) -> Result<RedisTransport, Error> {
        let client = self.client(endpoint)?;
        let opening = async {
            let connection = if persistent {
                trace!(%endpoint, "Initialize new redis connection manager");
                Connection::Managed(ConnectionManager::new(client).await?)
            } else {
                trace!(%endpoint, "Open multiplexed redis connection");
                Connection::Multiplexed(client.get_multiplexed_async_connection().await?)
            };
            Ok::<_, Error>(connection)
        };
        let connection = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, opening)
                .await
                .map_err(|_| Error::ConnectTimeout(timeout))??,
            None => opening.await?,
        };
        Ok(RedisTransport::new(connection, self.username.clone()))
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Transport = RedisTransport;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> TransportResult<RedisTransport> {
        Ok(self.open(endpoint, timeout, false).await?)
    }

    async fn pconnect(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> TransportResult<RedisTransport> {
        Ok(self.open(endpoint, timeout, true).await?)
    }
}

/// `redis://[user][:password@]host:port/db`, or `rediss://` when TLS is
/// requested.
pub fn connection_url(endpoint: &Endpoint, username: Option<&str>) -> String {
    let scheme = if endpoint.tls() { "rediss" } else { "redis" };
    let credentials = match (username, endpoint.password()) {
        (username, Some(password)) => format!(
            "{}:{}@",
            escape_userinfo(username.unwrap_or_default()),
            escape_userinfo(password)
        ),
        (Some(username), None) => format!("{}@", escape_userinfo(username)),
        (None, None) => String::new(),
    };
    format!(
        "{scheme}://{credentials}{}:{}/{}",
        endpoint.host(),
        endpoint.port(),
        endpoint.db().unwrap_or(0)
    )
}

/// Percent-encodes everything but RFC 3986 unreserved characters.
fn escape_userinfo(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}
