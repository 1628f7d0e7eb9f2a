//! Client configuration.
//!
//! [`ClientConfig`] is immutable. It is produced either by
//! [`ClientConfigBuilder`], whose setters validate their input immediately,
//! or from a [`ConfigMap`] deserialized from YAML or JSON.
//!
//! ```
//! use kvbox::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .host("127.0.0.1")?
//!     .port(6379)
//!     .connect_tries(3)?
//!     .key_prefix("My App")
//!     .build();
//!
//! assert!(config.is_configured());
//! assert_eq!(config.key_prefix(), Some("my-app"));
//! # Ok::<(), kvbox::ConfigError>(())
//! ```

use std::ops::RangeInclusive;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;
use crate::codec::Compression;
use crate::error::ConfigError;
use crate::transport::Endpoint;

/// Cache TTL used when none is configured, in seconds.
pub const DEFAULT_CACHE_TTL: u64 = 60;

/// Highest selectable database index.
pub const MAX_DB_INDEX: u8 = 15;

/// Extra seconds added to every cache TTL to spread expirations.
pub const TTL_JITTER_SECS: RangeInclusive<u64> = 10..=99;

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("static regex is valid"));

/// Normalizes a key prefix into a lowercase slug.
///
/// Runs of characters other than `a-z` and `0-9` collapse into one hyphen,
/// leading and trailing hyphens are trimmed. Returns `None` when nothing is
/// left.
pub fn normalize_key_prefix(prefix: &str) -> Option<String> {
    let lowered = prefix.to_lowercase();
    let slug = NON_SLUG_CHARS.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    (!slug.is_empty()).then(|| slug.to_owned())
}

/// Cache TTL widened to milliseconds with stampede jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    secs: u64,
    millis: u64,
}

impl CacheTtl {
    /// Converts `secs` adding a random jitter from [`TTL_JITTER_SECS`].
    pub fn new(secs: u64) -> Self {
        let jitter = rand::thread_rng().gen_range(TTL_JITTER_SECS);
        Self::with_jitter(secs, jitter)
    }

    fn with_jitter(secs: u64, jitter_secs: u64) -> Self {
        Self {
            secs,
            millis: secs.saturating_add(jitter_secs).saturating_mul(1000),
        }
    }

    /// TTL as configured, in seconds.
    pub fn secs(&self) -> u64 {
        self.secs
    }

    /// TTL written to the store, in milliseconds.
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// TTL-bearing writes are used only when the configured TTL is positive.
    pub fn is_enabled(&self) -> bool {
        self.secs > 0
    }

    /// TTL to attach to writes, if any.
    pub fn write_ttl(&self) -> Option<Duration> {
        self.is_enabled()
            .then(|| Duration::from_millis(self.millis))
    }
}

/// Validated client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    host: Option<String>,
    port: Option<u16>,
    connect_timeout: Option<Duration>,
    connect_tries: u32,
    persistent: bool,
    db_index: Option<u8>,
    cache_ttl: CacheTtl,
    auth_password: Option<String>,
    ssl: bool,
    key_prefix: Option<String>,
    compression: Compression,
    capabilities: Capabilities,
}

impl ClientConfig {
    /// Builder with the [`DEFAULT_CACHE_TTL`].
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::with_default_ttl(DEFAULT_CACHE_TTL)
    }

    /// Builds a configuration from a construction-time map.
    pub fn from_map(map: ConfigMap) -> Result<Self, ConfigError> {
        map.into_config(ClientConfig::builder())
    }

    /// Parses a YAML configuration document.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        let map: ConfigMap =
            serde_saphyr::from_str(document).map_err(|err| ConfigError::Parse(err.to_string()))?;
        Self::from_map(map)
    }

    /// Parses a JSON configuration document.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let map: ConfigMap =
            serde_json::from_str(document).map_err(|err| ConfigError::Parse(err.to_string()))?;
        Self::from_map(map)
    }

    /// True when a host and a port are set.
    pub fn is_configured(&self) -> bool {
        self.host.as_deref().is_some_and(|host| !host.is_empty()) && self.port.is_some()
    }

    /// Where to connect, if configured. Carries the auth password and the
    /// database index so that transports reconnecting on their own restore
    /// the session.
    pub fn endpoint(&self) -> Option<Endpoint> {
        let (Some(host), Some(port)) = (&self.host, self.port) else {
            return None;
        };
        if host.is_empty() {
            return None;
        }
        let mut endpoint = Endpoint::new(host.clone(), port, self.ssl);
        if let Some(password) = &self.auth_password {
            endpoint = endpoint.with_password(password.clone());
        }
        if let Some(db) = self.db_index {
            endpoint = endpoint.with_db(db);
        }
        Some(endpoint)
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Per-attempt connect timeout. `None` waits as long as the transport does.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn connect_tries(&self) -> u32 {
        self.connect_tries
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn db_index(&self) -> Option<u8> {
        self.db_index
    }

    pub fn cache_ttl(&self) -> CacheTtl {
        self.cache_ttl
    }

    pub fn auth_password(&self) -> Option<&str> {
        self.auth_password.as_deref()
    }

    pub fn ssl(&self) -> bool {
        self.ssl
    }

    pub fn key_prefix(&self) -> Option<&str> {
        self.key_prefix.as_deref()
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::builder().build()
    }
}

/// Builder for [`ClientConfig`].
///
/// Setters that can receive an invalid value return `Result` and reject it
/// right away, so a builder never holds an invalid field.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Starts a builder whose cache TTL defaults to `ttl_secs`.
    pub fn with_default_ttl(ttl_secs: u64) -> Self {
        Self {
            config: ClientConfig {
                host: None,
                port: None,
                connect_timeout: None,
                connect_tries: 1,
                persistent: false,
                db_index: None,
                cache_ttl: CacheTtl::new(ttl_secs),
                auth_password: None,
                ssl: false,
                key_prefix: None,
                compression: Compression::None,
                capabilities: Capabilities::detect(),
            },
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Result<Self, ConfigError> {
        let host = host.into();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        self.config.host = Some(host);
        Ok(self)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// Per-attempt connect timeout in seconds, `0` disables it.
    pub fn connect_timeout(mut self, secs: f64) -> Result<Self, ConfigError> {
        let timeout =
            Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidTimeout(secs))?;
        self.config.connect_timeout = (!timeout.is_zero()).then_some(timeout);
        Ok(self)
    }

    pub fn connect_tries(mut self, tries: u32) -> Result<Self, ConfigError> {
        if tries == 0 {
            return Err(ConfigError::InvalidTries(0));
        }
        self.config.connect_tries = tries;
        Ok(self)
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.config.persistent = persistent;
        self
    }

    pub fn db_index(mut self, index: u8) -> Result<Self, ConfigError> {
        if index > MAX_DB_INDEX {
            return Err(ConfigError::InvalidDatabase(i64::from(index)));
        }
        self.config.db_index = Some(index);
        Ok(self)
    }

    /// Cache TTL in seconds, jitter is added here.
    pub fn cache_ttl(mut self, secs: u64) -> Self {
        self.config.cache_ttl = CacheTtl::new(secs);
        self
    }

    pub fn auth_password(mut self, password: impl Into<String>) -> Result<Self, ConfigError> {
        let password = password.into();
        if password.is_empty() {
            return Err(ConfigError::EmptyPassword);
        }
        self.config.auth_password = Some(password);
        Ok(self)
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.config.ssl = ssl;
        self
    }

    /// Sets the key prefix, normalized with [`normalize_key_prefix`].
    pub fn key_prefix(mut self, prefix: &str) -> Self {
        self.config.key_prefix = normalize_key_prefix(prefix);
        self
    }

    /// Narrows what the environment advertises. Affects later
    /// [`compression`](Self::compression) calls and the serializer chosen
    /// at connect time.
    ///
    /// Fails if the compression already set is not among `capabilities`.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Result<Self, ConfigError> {
        let compression = self.config.compression;
        if !capabilities.supports_compression(compression) {
            return Err(ConfigError::UnsupportedCompression(compression));
        }
        self.config.capabilities = capabilities;
        Ok(self)
    }

    pub fn compression(mut self, compression: Compression) -> Result<Self, ConfigError> {
        if !self.config.capabilities.supports_compression(compression) {
            return Err(ConfigError::UnsupportedCompression(compression));
        }
        self.config.compression = compression;
        Ok(self)
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Construction-time configuration map.
///
/// `host` and `port` are required. Numeric fields are read wide and range
/// checked when converted into a [`ClientConfig`].
///
/// ```yaml
/// host: cache.internal
/// port: 6379
/// connect_timeout: 1.5
/// connect_tries: 3
/// db_index: 2
/// cache_ttl: 300
/// key_prefix: Billing Service
/// compression: none
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigMap {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub connect_timeout: Option<f64>,
    pub connect_tries: Option<i64>,
    pub persistent: Option<bool>,
    pub db_index: Option<i64>,
    pub cache_ttl: Option<i64>,
    pub auth_password: Option<String>,
    pub ssl: Option<bool>,
    pub key_prefix: Option<String>,
    pub compression: Option<Compression>,
}

impl ConfigMap {
    /// Applies the map on top of `builder`.
    pub fn into_config(self, builder: ClientConfigBuilder) -> Result<ClientConfig, ConfigError> {
        let host = self.host.ok_or(ConfigError::MissingField("host"))?;
        let port = self.port.ok_or(ConfigError::MissingField("port"))?;
        let port = u16::try_from(port).map_err(|_| ConfigError::InvalidPort(port))?;

        let mut builder = builder.host(host)?.port(port);
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout)?;
        }
        if let Some(tries) = self.connect_tries {
            let tries = u32::try_from(tries).map_err(|_| ConfigError::InvalidTries(tries))?;
            builder = builder.connect_tries(tries)?;
        }
        if let Some(persistent) = self.persistent {
            builder = builder.persistent(persistent);
        }
        if let Some(index) = self.db_index {
            let index = u8::try_from(index).map_err(|_| ConfigError::InvalidDatabase(index))?;
            builder = builder.db_index(index)?;
        }
        if let Some(ttl) = self.cache_ttl {
            let ttl = u64::try_from(ttl).map_err(|_| ConfigError::InvalidTtl(ttl))?;
            builder = builder.cache_ttl(ttl);
        }
        if let Some(password) = self.auth_password {
            builder = builder.auth_password(password)?;
        }
        if let Some(ssl) = self.ssl {
            builder = builder.ssl(ssl);
        }
        if let Some(prefix) = self.key_prefix {
            builder = builder.key_prefix(&prefix);
        }
        if let Some(compression) = self.compression {
            builder = builder.compression(compression)?;
        }
        Ok(builder.build())
    }
}

impl TryFrom<ConfigMap> for ClientConfig {
    type Error = ConfigError;

    fn try_from(map: ConfigMap) -> Result<Self, Self::Error> {
        ClientConfig::from_map(map)
    }
}
