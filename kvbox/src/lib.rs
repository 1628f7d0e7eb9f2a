#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod capabilities;
pub mod codec;
pub mod config;
pub mod error;
mod manager;
pub mod metrics;
mod operations;
mod stats;
pub mod transport;

pub use serde_json::Value;

pub use capabilities::Capabilities;
pub use codec::{Compression, Serializer};
pub use config::{CacheTtl, ClientConfig, ClientConfigBuilder, ConfigMap};
pub use error::{ConfigError, Error, Result};
pub use manager::{ConnectionManager, ConnectionState, PING_PAYLOAD};
pub use operations::{CacheOperations, KeyTtl};
pub use stats::Statistics;
pub use transport::{Connector, Endpoint, Transport, TransportError};
