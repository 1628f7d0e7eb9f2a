//! Redis commands behind the [`Transport`] trait.

use std::time::Duration;

use async_trait::async_trait;
use kvbox::codec::ValueCodec;
use kvbox::transport::{SessionOption, SetOptions, TransportResult};
use kvbox::{Transport, TransportError, Value};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Cmd, FromRedisValue, Pipeline};
use tracing::trace;

use crate::error::Error;

pub(crate) enum Connection {
    Multiplexed(MultiplexedConnection),
    Managed(ConnectionManager),
}

/// Established Redis connection with its session state.
///
/// The key prefix and the codec are applied client-side: keys are prefixed
/// before they are sent and stripped from `KEYS` replies, values are turned
/// into bytes with the session's [`ValueCodec`].
pub struct RedisTransport {
    connection: Option<Connection>,
    username: Option<String>,
    prefix: String,
    codec: ValueCodec,
    last_error: Option<String>,
}

impl RedisTransport {
    pub(crate) fn new(connection: Connection, username: Option<String>) -> Self {
        Self {
            connection: Some(connection),
            username,
            prefix: String::new(),
            codec: ValueCodec::default(),
            last_error: None,
        }
    }

    /// Byte codec of this connection.
    pub fn codec(&self) -> ValueCodec {
        self.codec
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn prefixed(&self, keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| self.key(key)).collect()
    }

    fn encode(&self, value: &Value) -> TransportResult<Vec<u8>> {
        Ok(self.codec.to_bytes(value)?)
    }

    fn decode(&self, bytes: Option<Vec<u8>>) -> TransportResult<Option<Value>> {
        Ok(bytes.map(|bytes| self.codec.from_bytes(bytes)).transpose()?)
    }

    async fn query<T: FromRedisValue>(&mut self, cmd: &Cmd) -> Result<T, Error> {
        let value = match self.connection.as_mut() {
            Some(Connection::Multiplexed(connection)) => cmd.query_async(connection).await?,
            Some(Connection::Managed(connection)) => cmd.query_async(connection).await?,
            None => return Err(Error::Closed),
        };
        Ok(value)
    }

    async fn run<T: FromRedisValue>(&mut self, cmd: &Cmd) -> TransportResult<T> {
        Ok(self.query(cmd).await?)
    }

    async fn run_pipeline(&mut self, pipe: &Pipeline) -> TransportResult<()> {
        let result: Result<(), Error> = match self.connection.as_mut() {
            Some(Connection::Multiplexed(connection)) => {
                pipe.query_async(connection).await.map_err(Error::from)
            }
            Some(Connection::Managed(connection)) => {
                pipe.query_async(connection).await.map_err(Error::from)
            }
            None => Err(Error::Closed),
        };
        Ok(result?)
    }

    /// Runs a script command, server-side failures land in the last-error slot.
    async fn run_script(&mut self, cmd: &Cmd) -> TransportResult<Value> {
        match self.query::<redis::Value>(cmd).await {
            Ok(reply) => Ok(reply_to_value(reply)),
            Err(error) if !error.is_connection_error() => {
                trace!(%error, "Script failed");
                self.last_error = Some(error.to_string());
                Ok(Value::Bool(false))
            }
            Err(error) => Err(error.into()),
        }
    }
}

fn script_cmd(name: &str, script: &str, keys: Vec<String>, args: &[String]) -> Cmd {
    let mut cmd = redis::cmd(name);
    cmd.arg(script).arg(keys.len()).arg(keys).arg(args);
    cmd
}

/// Converts a script reply the way Redis converts Lua values.
fn reply_to_value(reply: redis::Value) -> Value {
    match reply {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(number) => Value::from(number),
        redis::Value::Double(number) => Value::from(number),
        redis::Value::Boolean(flag) => Value::Bool(flag),
        redis::Value::Okay => Value::from("OK"),
        redis::Value::SimpleString(text) => Value::String(text),
        redis::Value::BulkString(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(reply_to_value).collect())
        }
        redis::Value::Map(pairs) => Value::Object(
            pairs
                .into_iter()
                .map(|(key, value)| (map_key(reply_to_value(key)), reply_to_value(value)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn map_key(key: Value) -> String {
    match key {
        Value::String(key) => key,
        other => other.to_string(),
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn auth(&mut self, password: &str) -> TransportResult<()> {
        let mut cmd = redis::cmd("AUTH");
        if let Some(username) = &self.username {
            cmd.arg(username);
        }
        cmd.arg(password);
        self.run(&cmd).await
    }

    async fn select(&mut self, db: u8) -> TransportResult<()> {
        self.run(redis::cmd("SELECT").arg(i64::from(db))).await
    }

    async fn set_option(&mut self, option: SessionOption) -> TransportResult<()> {
        match option {
            SessionOption::Prefix(prefix) => self.prefix = prefix,
            SessionOption::Serializer(serializer) if serializer.is_compiled() => {
                self.codec.set_serializer(serializer)
            }
            SessionOption::Compression(compression) if compression.is_compiled() => {
                self.codec.set_compression(compression)
            }
            unsupported => {
                return Err(TransportError::Rejected(format!(
                    "unsupported session option {unsupported:?}"
                )));
            }
        }
        Ok(())
    }

    async fn ping(&mut self, payload: &str) -> TransportResult<String> {
        self.run(redis::cmd("PING").arg(payload)).await
    }

    async fn get(&mut self, key: &str) -> TransportResult<Option<Value>> {
        let bytes: Option<Vec<u8>> = self.run(redis::cmd("GET").arg(self.key(key))).await?;
        self.decode(bytes)
    }

    async fn set(&mut self, key: &str, value: Value, options: SetOptions) -> TransportResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(self.encode(&value)?);
        if let Some(ttl) = options.ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        if options.only_if_absent {
            cmd.arg("NX");
        }
        let reply: redis::Value = self.run(&cmd).await?;
        Ok(!matches!(reply, redis::Value::Nil))
    }

    async fn mget(&mut self, keys: &[&str]) -> TransportResult<Vec<Option<Value>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let stored: Vec<Option<Vec<u8>>> = self.run(redis::cmd("MGET").arg(self.prefixed(keys))).await?;
        stored.into_iter().map(|bytes| self.decode(bytes)).collect()
    }

    async fn mset(
        &mut self,
        entries: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> TransportResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        match ttl {
            None => {
                let mut cmd = redis::cmd("MSET");
                for (key, value) in &entries {
                    cmd.arg(self.key(key)).arg(self.encode(value)?);
                }
                self.run(&cmd).await
            }
            Some(ttl) => {
                let mut pipe = redis::pipe();
                pipe.atomic();
                for (key, value) in &entries {
                    pipe.cmd("SET")
                        .arg(self.key(key))
                        .arg(self.encode(value)?)
                        .arg("PX")
                        .arg(ttl.as_millis() as u64)
                        .ignore();
                }
                self.run_pipeline(&pipe).await
            }
        }
    }

    async fn msetnx(&mut self, entries: Vec<(String, Value)>) -> TransportResult<bool> {
        if entries.is_empty() {
            return Ok(true);
        }
        let mut cmd = redis::cmd("MSETNX");
        for (key, value) in &entries {
            cmd.arg(self.key(key)).arg(self.encode(value)?);
        }
        self.run(&cmd).await
    }

    async fn getset(&mut self, key: &str, value: Value) -> TransportResult<Option<Value>> {
        let mut cmd = redis::cmd("GETSET");
        cmd.arg(self.key(key)).arg(self.encode(&value)?);
        let previous: Option<Vec<u8>> = self.run(&cmd).await?;
        self.decode(previous)
    }

    async fn incr(&mut self, key: &str) -> TransportResult<i64> {
        self.run(redis::cmd("INCR").arg(self.key(key))).await
    }

    async fn incr_by(&mut self, key: &str, delta: i64) -> TransportResult<i64> {
        self.run(redis::cmd("INCRBY").arg(self.key(key)).arg(delta)).await
    }

    async fn decr(&mut self, key: &str) -> TransportResult<i64> {
        self.run(redis::cmd("DECR").arg(self.key(key))).await
    }

    async fn decr_by(&mut self, key: &str, delta: i64) -> TransportResult<i64> {
        self.run(redis::cmd("DECRBY").arg(self.key(key)).arg(delta)).await
    }

    async fn append(&mut self, key: &str, suffix: &str) -> TransportResult<u64> {
        self.run(redis::cmd("APPEND").arg(self.key(key)).arg(suffix)).await
    }

    async fn del(&mut self, keys: &[&str]) -> TransportResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run(redis::cmd("DEL").arg(self.prefixed(keys))).await
    }

    async fn exists(&mut self, key: &str) -> TransportResult<bool> {
        self.run(redis::cmd("EXISTS").arg(self.key(key))).await
    }

    async fn rename(&mut self, from: &str, to: &str) -> TransportResult<()> {
        self.run(redis::cmd("RENAME").arg(self.key(from)).arg(self.key(to))).await
    }

    async fn renamenx(&mut self, from: &str, to: &str) -> TransportResult<bool> {
        self.run(redis::cmd("RENAMENX").arg(self.key(from)).arg(self.key(to))).await
    }

    async fn strlen(&mut self, key: &str) -> TransportResult<u64> {
        self.run(redis::cmd("STRLEN").arg(self.key(key))).await
    }

    async fn pexpire(&mut self, key: &str, ttl: Duration) -> TransportResult<bool> {
        let millis = ttl.as_millis() as u64;
        self.run(redis::cmd("PEXPIRE").arg(self.key(key)).arg(millis)).await
    }

    async fn pexpire_at(&mut self, key: &str, unix_millis: i64) -> TransportResult<bool> {
        self.run(redis::cmd("PEXPIREAT").arg(self.key(key)).arg(unix_millis)).await
    }

    async fn ttl(&mut self, key: &str) -> TransportResult<i64> {
        self.run(redis::cmd("TTL").arg(self.key(key))).await
    }

    async fn persist(&mut self, key: &str) -> TransportResult<bool> {
        self.run(redis::cmd("PERSIST").arg(self.key(key))).await
    }

    async fn getbit(&mut self, key: &str, offset: u64) -> TransportResult<bool> {
        self.run(redis::cmd("GETBIT").arg(self.key(key)).arg(offset)).await
    }

    async fn setbit(&mut self, key: &str, offset: u64, bit: bool) -> TransportResult<bool> {
        let cmd = redis::cmd("SETBIT")
            .arg(self.key(key))
            .arg(offset)
            .arg(u32::from(bit))
            .to_owned();
        self.run(&cmd).await
    }

    async fn eval(&mut self, script: &str, keys: &[&str], args: &[String]) -> TransportResult<Value> {
        let cmd = script_cmd("EVAL", script, self.prefixed(keys), args);
        self.run_script(&cmd).await
    }

    async fn evalsha(
        &mut self,
        digest: &str,
        keys: &[&str],
        args: &[String],
    ) -> TransportResult<Value> {
        let cmd = script_cmd("EVALSHA", digest, self.prefixed(keys), args);
        self.run_script(&cmd).await
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    async fn sadd(&mut self, key: &str, members: Vec<Value>) -> TransportResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("SADD");
        cmd.arg(self.key(key));
        for member in &members {
            cmd.arg(self.encode(member)?);
        }
        self.run(&cmd).await
    }

    async fn spop(&mut self, key: &str) -> TransportResult<Option<Value>> {
        let member: Option<Vec<u8>> = self.run(redis::cmd("SPOP").arg(self.key(key))).await?;
        self.decode(member)
    }

    async fn srandmember(&mut self, key: &str) -> TransportResult<Option<Value>> {
        let member: Option<Vec<u8>> =
            self.run(redis::cmd("SRANDMEMBER").arg(self.key(key))).await?;
        self.decode(member)
    }

    async fn scard(&mut self, key: &str) -> TransportResult<u64> {
        self.run(redis::cmd("SCARD").arg(self.key(key))).await
    }

    async fn sismember(&mut self, key: &str, member: Value) -> TransportResult<bool> {
        let mut cmd = redis::cmd("SISMEMBER");
        cmd.arg(self.key(key)).arg(self.encode(&member)?);
        self.run(&cmd).await
    }

    async fn smembers(&mut self, key: &str) -> TransportResult<Vec<Value>> {
        let members: Vec<Vec<u8>> = self.run(redis::cmd("SMEMBERS").arg(self.key(key))).await?;
        members
            .into_iter()
            .map(|bytes| self.codec.from_bytes(bytes).map_err(TransportError::from))
            .collect()
    }

    async fn srem(&mut self, key: &str, members: Vec<Value>) -> TransportResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("SREM");
        cmd.arg(self.key(key));
        for member in &members {
            cmd.arg(self.encode(member)?);
        }
        self.run(&cmd).await
    }

    async fn sdiffstore(&mut self, destination: &str, keys: &[&str]) -> TransportResult<u64> {
        let cmd = redis::cmd("SDIFFSTORE")
            .arg(self.key(destination))
            .arg(self.prefixed(keys))
            .to_owned();
        self.run(&cmd).await
    }

    async fn keys(&mut self, pattern: &str) -> TransportResult<Vec<String>> {
        let keys: Vec<String> = self.run(redis::cmd("KEYS").arg(self.key(pattern))).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(self.prefix.as_str()).map(str::to_owned))
            .collect())
    }

    async fn flushall_async(&mut self) -> TransportResult<()> {
        self.run(redis::cmd("FLUSHALL").arg("ASYNC")).await
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.connection.take().is_some() {
            trace!("Redis connection dropped");
        }
        Ok(())
    }
}
