#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod connector;
pub mod error;
mod transport;

#[doc(inline)]
pub use crate::connector::{RedisConnector, connection_url};
#[doc(inline)]
pub use crate::transport::RedisTransport;
