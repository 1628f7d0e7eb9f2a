#![doc = include_str!("../README.md")]

mod connector;
mod keyspace;
mod transport;

pub use connector::{MemoryConnector, ScriptHandler, SessionEvent};
pub use transport::MemoryTransport;
