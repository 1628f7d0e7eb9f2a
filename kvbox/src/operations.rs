//! Typed cache operations.
//!
//! Every operation connects lazily, delegates to the transport and
//! translates its failures: a rejected command becomes
//! [`Error::ImpossibleValue`], anything else [`Error::ConnectionFailed`].
//! Values and set members are sentinel-encoded on the way in and decoded on
//! the way out. Keys, script arguments and script replies are passed as is.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::Value;
use crate::codec::{decode, encode};
use crate::error::{Error, Result};
use crate::manager::ConnectionManager;
use crate::transport::{Connector, SetOptions, Transport, TransportError};

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after this long. May be zero.
    Expires(Duration),
}

/// Operation set of a cache client.
#[async_trait]
pub trait CacheOperations: Send {
    /// Reads a value. A missing key is [`Error::KeyNotFound`].
    async fn get(&mut self, key: &str) -> Result<Value>;

    /// Writes a value, with the configured cache TTL when it is positive.
    async fn set(&mut self, key: &str, value: Value) -> Result<()>;

    /// Reads several values. Missing keys read as `null`.
    async fn mget(&mut self, keys: &[&str]) -> Result<Vec<Value>>;

    /// Writes several values, with the configured cache TTL when it is positive.
    async fn mset(&mut self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Writes a value unless the key exists. Returns whether it was written.
    async fn setnx(&mut self, key: &str, value: Value) -> Result<bool>;

    /// Writes all values unless any key exists. Returns whether they were written.
    async fn msetnx(&mut self, entries: Vec<(String, Value)>) -> Result<bool>;

    /// Writes a value and returns the previous one.
    async fn getset(&mut self, key: &str, value: Value) -> Result<Option<Value>>;

    /// Increments an integer. Deltas below 2 increment by one.
    async fn incr(&mut self, key: &str, delta: i64) -> Result<i64>;

    /// Decrements an integer. Deltas below 2 decrement by one.
    async fn decr(&mut self, key: &str, delta: i64) -> Result<i64>;

    /// Appends to a raw string value, the session codec is not applied.
    async fn append(&mut self, key: &str, suffix: &str) -> Result<u64>;

    /// Checks a key and counts the lookup as a hit or a miss.
    async fn exists(&mut self, key: &str) -> Result<bool>;

    async fn delete(&mut self, keys: &[&str]) -> Result<u64>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    async fn renamenx(&mut self, from: &str, to: &str) -> Result<bool>;

    async fn strlen(&mut self, key: &str) -> Result<u64>;

    /// Sets a relative expiry, with millisecond resolution.
    async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool>;

    /// Sets an absolute expiry, with millisecond resolution.
    async fn expire_at(&mut self, key: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn ttl(&mut self, key: &str) -> Result<KeyTtl>;

    /// Removes the expiry of a key.
    async fn persist(&mut self, key: &str) -> Result<bool>;

    async fn getbit(&mut self, key: &str, offset: u64) -> Result<bool>;

    /// Sets a bit and returns the previous one.
    async fn setbit(&mut self, key: &str, offset: u64, bit: bool) -> Result<bool>;

    /// Runs a script by source.
    ///
    /// Fails with [`Error::ScriptExecutionFailed`] if the transport recorded
    /// an error, even when the call itself returned.
    async fn eval(&mut self, script: &str, keys: &[&str], args: &[String]) -> Result<Value>;

    /// Runs a cached script by digest, same error contract as [`eval`](Self::eval).
    async fn evalsha(&mut self, digest: &str, keys: &[&str], args: &[String]) -> Result<Value>;

    async fn sadd(&mut self, key: &str, members: Vec<Value>) -> Result<u64>;

    async fn spop(&mut self, key: &str) -> Result<Option<Value>>;

    async fn srandmember(&mut self, key: &str) -> Result<Option<Value>>;

    async fn scard(&mut self, key: &str) -> Result<u64>;

    async fn sismember(&mut self, key: &str, member: Value) -> Result<bool>;

    async fn smembers(&mut self, key: &str) -> Result<Vec<Value>>;

    async fn srem(&mut self, key: &str, members: Vec<Value>) -> Result<u64>;

    /// Stores the members of the first set missing from all the others.
    async fn sdiffstore(&mut self, destination: &str, keys: &[&str]) -> Result<u64>;

    /// Every key in the store. Meant for small or administrative datasets.
    async fn all_keys(&mut self) -> Result<Vec<String>>;

    /// Every key with its value, read one by one. Not atomic, keys that
    /// disappear midway are skipped, and so are keys holding sets.
    async fn all_values(&mut self) -> Result<BTreeMap<String, Value>>;

    /// Starts flushing the whole store and returns without waiting for it.
    async fn flush_all(&mut self) -> Result<()>;

    /// Closes the connection. Teardown failures are ignored.
    async fn disconnect(&mut self);
}

/// Transport failures during bulk enumeration read as lost connection.
fn collapsed(error: TransportError) -> Error {
    Error::ConnectionFailed(Box::new(error))
}

#[async_trait]
impl<C> CacheOperations for ConnectionManager<C>
where
    C: Connector,
{
    async fn get(&mut self, key: &str) -> Result<Value> {
        match self.transport().await?.get(key).await? {
            Some(stored) => Ok(decode(stored)),
            None => Err(Error::KeyNotFound(key.to_owned())),
        }
    }

    async fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let options = SetOptions::with_ttl(self.config().cache_ttl().write_ttl());
        let written = self.transport().await?.set(key, encode(value), options).await?;
        if !written {
            return Err(Error::ImpossibleValue(format!("write of `{key}` was refused")));
        }
        Ok(())
    }

    async fn mget(&mut self, keys: &[&str]) -> Result<Vec<Value>> {
        let stored = self.transport().await?.mget(keys).await?;
        Ok(stored
            .into_iter()
            .map(|value| value.map(decode).unwrap_or(Value::Null))
            .collect())
    }

    async fn mset(&mut self, entries: Vec<(String, Value)>) -> Result<()> {
        let ttl = self.config().cache_ttl().write_ttl();
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key, encode(value)))
            .collect();
        self.transport().await?.mset(entries, ttl).await?;
        Ok(())
    }

    async fn setnx(&mut self, key: &str, value: Value) -> Result<bool> {
        let transport = self.transport().await?;
        Ok(transport.set(key, encode(value), SetOptions::if_absent()).await?)
    }

    async fn msetnx(&mut self, entries: Vec<(String, Value)>) -> Result<bool> {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key, encode(value)))
            .collect();
        Ok(self.transport().await?.msetnx(entries).await?)
    }

    async fn getset(&mut self, key: &str, value: Value) -> Result<Option<Value>> {
        let previous = self.transport().await?.getset(key, encode(value)).await?;
        Ok(previous.map(decode))
    }

    async fn incr(&mut self, key: &str, delta: i64) -> Result<i64> {
        let transport = self.transport().await?;
        let value = if delta > 1 {
            transport.incr_by(key, delta).await?
        } else {
            transport.incr(key).await?
        };
        Ok(value)
    }

    async fn decr(&mut self, key: &str, delta: i64) -> Result<i64> {
        let transport = self.transport().await?;
        let value = if delta > 1 {
            transport.decr_by(key, delta).await?
        } else {
            transport.decr(key).await?
        };
        Ok(value)
    }

    async fn append(&mut self, key: &str, suffix: &str) -> Result<u64> {
        Ok(self.transport().await?.append(key, suffix).await?)
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        let found = self.transport().await?.exists(key).await?;
        trace!(key, found, "Existence check");
        self.stats_mut().record(found);
        Ok(found)
    }

    async fn delete(&mut self, keys: &[&str]) -> Result<u64> {
        Ok(self.transport().await?.del(keys).await?)
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        Ok(self.transport().await?.rename(from, to).await?)
    }

    async fn renamenx(&mut self, from: &str, to: &str) -> Result<bool> {
        Ok(self.transport().await?.renamenx(from, to).await?)
    }

    async fn strlen(&mut self, key: &str) -> Result<u64> {
        Ok(self.transport().await?.strlen(key).await?)
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.transport().await?.pexpire(key, ttl).await?)
    }

    async fn expire_at(&mut self, key: &str, at: DateTime<Utc>) -> Result<bool> {
        Ok(self.transport().await?.pexpire_at(key, at.timestamp_millis()).await?)
    }

    async fn ttl(&mut self, key: &str) -> Result<KeyTtl> {
        match self.transport().await?.ttl(key).await? {
            -2 => Ok(KeyTtl::Missing),
            -1 => Ok(KeyTtl::Persistent),
            secs => u64::try_from(secs)
                .map(|secs| KeyTtl::Expires(Duration::from_secs(secs)))
                .map_err(|_| Error::ImpossibleValue(format!("ttl of `{key}` is {secs}"))),
        }
    }

    async fn persist(&mut self, key: &str) -> Result<bool> {
        Ok(self.transport().await?.persist(key).await?)
    }

    async fn getbit(&mut self, key: &str, offset: u64) -> Result<bool> {
        Ok(self.transport().await?.getbit(key, offset).await?)
    }

    async fn setbit(&mut self, key: &str, offset: u64, bit: bool) -> Result<bool> {
        Ok(self.transport().await?.setbit(key, offset, bit).await?)
    }

    async fn eval(&mut self, script: &str, keys: &[&str], args: &[String]) -> Result<Value> {
        let transport = self.transport().await?;
        let reply = transport.eval(script, keys, args).await;
        take_script_error(transport)?;
        Ok(reply?)
    }

    async fn evalsha(&mut self, digest: &str, keys: &[&str], args: &[String]) -> Result<Value> {
        let transport = self.transport().await?;
        let reply = transport.evalsha(digest, keys, args).await;
        take_script_error(transport)?;
        Ok(reply?)
    }

    async fn sadd(&mut self, key: &str, members: Vec<Value>) -> Result<u64> {
        let members = members.into_iter().map(encode).collect();
        Ok(self.transport().await?.sadd(key, members).await?)
    }

    async fn spop(&mut self, key: &str) -> Result<Option<Value>> {
        Ok(self.transport().await?.spop(key).await?.map(decode))
    }

    async fn srandmember(&mut self, key: &str) -> Result<Option<Value>> {
        Ok(self.transport().await?.srandmember(key).await?.map(decode))
    }

    async fn scard(&mut self, key: &str) -> Result<u64> {
        Ok(self.transport().await?.scard(key).await?)
    }

    async fn sismember(&mut self, key: &str, member: Value) -> Result<bool> {
        Ok(self.transport().await?.sismember(key, encode(member)).await?)
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<Value>> {
        let members = self.transport().await?.smembers(key).await?;
        Ok(members.into_iter().map(decode).collect())
    }

    async fn srem(&mut self, key: &str, members: Vec<Value>) -> Result<u64> {
        let members = members.into_iter().map(encode).collect();
        Ok(self.transport().await?.srem(key, members).await?)
    }

    async fn sdiffstore(&mut self, destination: &str, keys: &[&str]) -> Result<u64> {
        Ok(self.transport().await?.sdiffstore(destination, keys).await?)
    }

    async fn all_keys(&mut self) -> Result<Vec<String>> {
        self.transport().await?.keys("*").await.map_err(collapsed)
    }

    async fn all_values(&mut self) -> Result<BTreeMap<String, Value>> {
        let transport = self.transport().await?;
        let keys = transport.keys("*").await.map_err(collapsed)?;
        let mut values = BTreeMap::new();
        for key in keys {
            match transport.get(&key).await {
                Ok(Some(stored)) => {
                    values.insert(key, decode(stored));
                }
                Ok(None) => {}
                Err(TransportError::Rejected(reason)) => {
                    trace!(key = %key, %reason, "Skipping key without a plain value");
                }
                Err(error) => return Err(collapsed(error)),
            }
        }
        Ok(values)
    }

    async fn flush_all(&mut self) -> Result<()> {
        Ok(self.transport().await?.flushall_async().await?)
    }

    async fn disconnect(&mut self) {
        self.close_transport().await;
    }
}

/// Reads and clears the last-error slot after a script call.
fn take_script_error<T>(transport: &mut T) -> Result<()>
where
    T: Transport + ?Sized,
{
    let last_error = transport.last_error();
    transport.clear_last_error();
    match last_error {
        Some(message) if !message.is_empty() => Err(Error::ScriptExecutionFailed(message)),
        _ => Ok(()),
    }
}
