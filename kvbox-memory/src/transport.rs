use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kvbox::codec::ValueCodec;
use kvbox::transport::{SessionOption, SetOptions, TransportResult};
use kvbox::{Transport, TransportError, Value};
use rand::seq::IteratorRandom;
use tokio::time::Instant;

use crate::connector::{SessionEvent, Shared};
use crate::keyspace::{Entry, Keyspace, NO_SUCH_KEY};

const MAX_DB_INDEX: u8 = 15;

/// Bit offsets address at most a 512 MiB string.
const MAX_BIT_OFFSET: u64 = (1 << 32) - 1;

/// Connection to a [`MemoryConnector`](crate::MemoryConnector) store.
pub struct MemoryTransport {
    shared: Arc<Shared>,
    db: u8,
    prefix: String,
    codec: ValueCodec,
    authenticated: bool,
    closed: bool,
    last_error: Option<String>,
}

impl MemoryTransport {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            db: 0,
            prefix: String::new(),
            codec: ValueCodec::default(),
            authenticated: false,
            closed: false,
            last_error: None,
        }
    }

    /// Database selected on this connection.
    pub fn db(&self) -> u8 {
        self.db
    }

    /// Byte codec of this connection.
    pub fn codec(&self) -> ValueCodec {
        self.codec
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn ready(&self) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::io("connection is closed"));
        }
        if self.shared.commands_fail() {
            return Err(TransportError::io("connection reset by peer"));
        }
        if self.shared.password.is_some() && !self.authenticated {
            return Err(TransportError::Rejected(
                "NOAUTH Authentication required.".to_owned(),
            ));
        }
        Ok(())
    }

    /// Runs `command` against the keyspace once the connection is usable.
    fn with_keyspace<T>(
        &self,
        command: impl FnOnce(&mut Keyspace, u8) -> Result<T, String>,
    ) -> TransportResult<T> {
        self.ready()?;
        let mut keyspace = self.shared.keyspace.lock();
        command(&mut keyspace, self.db).map_err(TransportError::Rejected)
    }

    fn encode(&self, value: &Value) -> TransportResult<Vec<u8>> {
        Ok(self.codec.to_bytes(value)?)
    }

    fn decode(&self, bytes: Vec<u8>) -> TransportResult<Value> {
        Ok(self.codec.from_bytes(bytes)?)
    }

    fn encode_all(&self, values: &[Value]) -> TransportResult<Vec<Vec<u8>>> {
        values.iter().map(|value| self.encode(value)).collect()
    }

    fn run_script(
        &mut self,
        name: &str,
        missing: &str,
        keys: &[&str],
        args: &[String],
    ) -> TransportResult<Value> {
        self.ready()?;
        let Some(handler) = self.shared.script(name) else {
            self.last_error = Some(missing.to_owned());
            return Ok(Value::Bool(false));
        };
        let keys: Vec<String> = keys.iter().map(|key| self.key(key)).collect();
        match handler(keys.as_slice(), args) {
            Ok(reply) => Ok(reply),
            Err(message) => {
                self.last_error = Some(message);
                Ok(Value::Bool(false))
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn auth(&mut self, password: &str) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::io("connection is closed"));
        }
        self.shared.record(SessionEvent::Auth);
        match &self.shared.password {
            None => Err(TransportError::Rejected(
                "ERR AUTH called without any password configured".to_owned(),
            )),
            Some(expected) if expected == password => {
                self.authenticated = true;
                Ok(())
            }
            Some(_) => Err(TransportError::Rejected(
                "WRONGPASS invalid username-password pair".to_owned(),
            )),
        }
    }

    async fn select(&mut self, db: u8) -> TransportResult<()> {
        self.ready()?;
        self.shared.record(SessionEvent::Select(db));
        if db > MAX_DB_INDEX {
            return Err(TransportError::Rejected("ERR DB index is out of range".to_owned()));
        }
        self.db = db;
        Ok(())
    }

    async fn set_option(&mut self, option: SessionOption) -> TransportResult<()> {
        self.ready()?;
        self.shared.record(SessionEvent::Option(option.clone()));
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
                    "ERR unsupported option {unsupported:?}"
                )));
            }
        }
        Ok(())
    }

    async fn ping(&mut self, payload: &str) -> TransportResult<String> {
        self.ready()?;
        self.shared.record(SessionEvent::Ping);
        if self.shared.take_wrong_echo() {
            return Ok("PONG".to_owned());
        }
        Ok(payload.to_owned())
    }

    async fn get(&mut self, key: &str) -> TransportResult<Option<Value>> {
        let key = self.key(key);
        let bytes = self.with_keyspace(|keyspace, db| {
            Ok(keyspace.string(db, &key)?.map(|bytes| bytes.clone()))
        })?;
        bytes.map(|bytes| self.decode(bytes)).transpose()
    }

    async fn set(&mut self, key: &str, value: Value, options: SetOptions) -> TransportResult<bool> {
        let key = self.key(key);
        let bytes = self.encode(&value)?;
        self.with_keyspace(|keyspace, db| {
            if options.only_if_absent && keyspace.contains(db, &key) {
                return Ok(false);
            }
            keyspace.insert(db, &key, Entry::string(bytes, options.ttl));
            Ok(true)
        })
    }

    async fn mget(&mut self, keys: &[&str]) -> TransportResult<Vec<Option<Value>>> {
        let keys: Vec<String> = keys.iter().map(|key| self.key(key)).collect();
        let stored = self.with_keyspace(|keyspace, db| {
            // Keys of another type read as missing.
            Ok(keys
                .iter()
                .map(|key| keyspace.string(db, key).ok().flatten().cloned())
                .collect::<Vec<_>>())
        })?;
        stored
            .into_iter()
            .map(|bytes| bytes.map(|bytes| self.decode(bytes)).transpose())
            .collect()
    }

    async fn mset(
        &mut self,
        entries: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> TransportResult<()> {
        let entries = entries
            .into_iter()
            .map(|(key, value)| Ok((self.key(&key), self.encode(&value)?)))
            .collect::<TransportResult<Vec<_>>>()?;
        self.with_keyspace(|keyspace, db| {
            for (key, bytes) in entries {
                keyspace.insert(db, &key, Entry::string(bytes, ttl));
            }
            Ok(())
        })
    }

    async fn msetnx(&mut self, entries: Vec<(String, Value)>) -> TransportResult<bool> {
        let entries = entries
            .into_iter()
            .map(|(key, value)| Ok((self.key(&key), self.encode(&value)?)))
            .collect::<TransportResult<Vec<_>>>()?;
        self.with_keyspace(|keyspace, db| {
            if entries.iter().any(|(key, _)| keyspace.contains(db, key)) {
                return Ok(false);
            }
            for (key, bytes) in entries {
                keyspace.insert(db, &key, Entry::string(bytes, None));
            }
            Ok(true)
        })
    }

    async fn getset(&mut self, key: &str, value: Value) -> TransportResult<Option<Value>> {
        let key = self.key(key);
        let bytes = self.encode(&value)?;
        let previous = self.with_keyspace(|keyspace, db| {
            let previous = keyspace.string(db, &key)?.cloned();
            keyspace.insert(db, &key, Entry::string(bytes, None));
            Ok(previous)
        })?;
        previous.map(|bytes| self.decode(bytes)).transpose()
    }

    async fn incr(&mut self, key: &str) -> TransportResult<i64> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&mut self, key: &str, delta: i64) -> TransportResult<i64> {
        let key = self.key(key);
        self.with_keyspace(|keyspace, db| keyspace.add(db, &key, delta))
    }

    async fn decr(&mut self, key: &str) -> TransportResult<i64> {
        self.decr_by(key, 1).await
    }

    async fn decr_by(&mut self, key: &str, delta: i64) -> TransportResult<i64> {
        let key = self.key(key);
        let delta = delta
            .checked_neg()
            .ok_or_else(|| TransportError::Rejected("ERR decrement would overflow".to_owned()))?;
        self.with_keyspace(|keyspace, db| keyspace.add(db, &key, delta))
    }

    async fn append(&mut self, key: &str, suffix: &str) -> TransportResult<u64> {
        let key = self.key(key);
        self.with_keyspace(|keyspace, db| match keyspace.string(db, &key)? {
            Some(bytes) => {
                bytes.extend_from_slice(suffix.as_bytes());
                Ok(bytes.len() as u64)
            }
            None => {
                keyspace.insert(db, &key, Entry::string(suffix.as_bytes().to_vec(), None));
                Ok(suffix.len() as u64)
            }
        })
    }

    async fn del(&mut self, keys: &[&str]) -> TransportResult<u64> {
        let keys: Vec<String> = keys.iter().map(|key| self.key(key)).collect();
        self.with_keyspace(|keyspace, db| {
            Ok(keys
                .iter()
                .filter(|key| keyspace.remove(db, key).is_some())
                .count() as u64)
        })
    }

    async fn exists(&mut self, key: &str) -> TransportResult<bool> {
        let key = self.key(key);
        self.with_keyspace(|keyspace, db| Ok(keyspace.contains(db, &key)))
    }

    async fn rename(&mut self, from: &str, to: &str) -> TransportResult<()> {
        let (from, to) = (self.key(from), self.key(to));
        self.with_keyspace(|keyspace, db| {
            let entry = keyspace
                .remove(db, &from)
                .ok_or_else(|| NO_SUCH_KEY.to_owned())?;
            keyspace.insert(db, &to, entry);
            Ok(())
        })
    }

    async fn renamenx(&mut self, from: &str, to: &str) -> TransportResult<bool> {
        let (from, to) = (self.key(from), self.key(to));
        self.with_keyspace(|keyspace, db| {
            if !keyspace.contains(db, &from) {
                return Err(NO_SUCH_KEY.to_owned());
            }
            if keyspace.contains(db, &to) {
                return Ok(false);
            }
            if let Some(entry) = keyspace.remove(db, &from) {
                keyspace.insert(db, &to, entry);
            }
            Ok(true)
        })
    }

    async fn strlen(&mut self, key: &str) -> TransportResult<u64> {
        let key = self.key(key);
        self.with_keyspace(|keyspace, db| {
            Ok(keyspace
                .string(db, &key)?
                .map_or(0, |bytes| bytes.len() as u64))
        })
    }

    async fn pexpire(&mut self, key: &str, ttl: Duration) -> TransportResult<bool> {
        let key = self.key(key);
        self.with_keyspace(|keyspace, db| match keyspace.entry(db, &key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn pexpire_at(&mut self, key: &str, unix_millis: i64) -> TransportResult<bool> {
        let key = self.key(key);
        let remaining_ms = unix_millis.saturating_sub(Utc::now().timestamp_millis());
        self.with_keyspace(|keyspace, db| {
            if !keyspace.contains(db, &key) {
                return Ok(false);
            }
            match u64::try_from(remaining_ms) {
                Ok(ms) if ms > 0 => {
                    if let Some(entry) = keyspace.entry(db, &key) {
                        entry.expires_at = Some(Instant::now() + Duration::from_millis(ms));
                    }
                }
                _ => {
                    keyspace.remove(db, &key);
                }
            }
            Ok(true)
        })
    }

    async fn ttl(&mut self, key: &str) -> TransportResult<i64> {
        let key = self.key(key);
        self.with_keyspace(|keyspace, db| {
            let Some(entry) = keyspace.entry(db, &key) else {
                return Ok(-2);
            };
            Ok(match entry.expires_at {
                None => -1,
                Some(at) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    ((remaining.as_millis() + 500) / 1000) as i64
                }
            })
        })
    }

    async fn persist(&mut self, key: &str) -> TransportResult<bool> {
        let key = self.key(key);
        self.with_keyspace(|keyspace, db| {
            Ok(keyspace
                .entry(db, &key)
                .and_then(|entry| entry.expires_at.take())
                .is_some())
        })
    }

    async fn getbit(&mut self, key: &str, offset: u64) -> TransportResult<bool> {
        let key = self.key(key);
        let (byte, mask) = bit_position(offset)?;
        self.with_keyspace(|keyspace, db| {
            let Some(bytes) = keyspace.string(db, &key)? else {
                return Ok(false);
            };
            Ok(bytes.get(byte).is_some_and(|value| value & mask != 0))
        })
    }

    async fn setbit(&mut self, key: &str, offset: u64, bit: bool) -> TransportResult<bool> {
        let key = self.key(key);
        let (byte, mask) = bit_position(offset)?;
        self.with_keyspace(|keyspace, db| {
            if keyspace.string(db, &key)?.is_none() {
                keyspace.insert(db, &key, Entry::string(Vec::new(), None));
            }
            let bytes = keyspace
                .string(db, &key)?
                .ok_or_else(|| NO_SUCH_KEY.to_owned())?;
            if bytes.len() <= byte {
                bytes.resize(byte + 1, 0);
            }
            let previous = bytes[byte] & mask != 0;
            if bit {
                bytes[byte] |= mask;
            } else {
                bytes[byte] &= !mask;
            }
            Ok(previous)
        })
    }

    async fn eval(&mut self, script: &str, keys: &[&str], args: &[String]) -> TransportResult<Value> {
        self.run_script(script, "ERR Error compiling script", keys, args)
    }

    async fn evalsha(
        &mut self,
        digest: &str,
        keys: &[&str],
        args: &[String],
    ) -> TransportResult<Value> {
        self.run_script(digest, "NOSCRIPT No matching script.", keys, args)
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    async fn sadd(&mut self, key: &str, members: Vec<Value>) -> TransportResult<u64> {
        let key = self.key(key);
        let members = self.encode_all(&members)?;
        self.with_keyspace(|keyspace, db| {
            let mut set = keyspace.members(db, &key)?;
            let added = members
                .into_iter()
                .filter(|member| set.insert(member.clone()))
                .count();
            keyspace.store_members(db, &key, set);
            Ok(added as u64)
        })
    }

    async fn spop(&mut self, key: &str) -> TransportResult<Option<Value>> {
        let key = self.key(key);
        let popped = self.with_keyspace(|keyspace, db| {
            let mut set = keyspace.members(db, &key)?;
            let picked = set.iter().choose(&mut rand::thread_rng()).cloned();
            if let Some(member) = &picked {
                set.remove(member);
                keyspace.store_members(db, &key, set);
            }
            Ok(picked)
        })?;
        popped.map(|bytes| self.decode(bytes)).transpose()
    }

    async fn srandmember(&mut self, key: &str) -> TransportResult<Option<Value>> {
        let key = self.key(key);
        let picked = self.with_keyspace(|keyspace, db| {
            let set = keyspace.members(db, &key)?;
            Ok(set.into_iter().choose(&mut rand::thread_rng()))
        })?;
        picked.map(|bytes| self.decode(bytes)).transpose()
    }

    async fn scard(&mut self, key: &str) -> TransportResult<u64> {
        let key = self.key(key);
        self.with_keyspace(|keyspace, db| Ok(keyspace.members(db, &key)?.len() as u64))
    }

    async fn sismember(&mut self, key: &str, member: Value) -> TransportResult<bool> {
        let key = self.key(key);
        let member = self.encode(&member)?;
        self.with_keyspace(|keyspace, db| Ok(keyspace.members(db, &key)?.contains(&member)))
    }

    async fn smembers(&mut self, key: &str) -> TransportResult<Vec<Value>> {
        let key = self.key(key);
        let members = self.with_keyspace(|keyspace, db| keyspace.members(db, &key))?;
        members
            .into_iter()
            .map(|bytes| self.decode(bytes))
            .collect()
    }

    async fn srem(&mut self, key: &str, members: Vec<Value>) -> TransportResult<u64> {
        let key = self.key(key);
        let members = self.encode_all(&members)?;
        self.with_keyspace(|keyspace, db| {
            let mut set = keyspace.members(db, &key)?;
            let removed = members.iter().filter(|member| set.remove(*member)).count();
            keyspace.store_members(db, &key, set);
            Ok(removed as u64)
        })
    }

    async fn sdiffstore(&mut self, destination: &str, keys: &[&str]) -> TransportResult<u64> {
        let destination = self.key(destination);
        let keys: Vec<String> = keys.iter().map(|key| self.key(key)).collect();
        self.with_keyspace(|keyspace, db| {
            let Some((first, rest)) = keys.split_first() else {
                return Err("ERR wrong number of arguments for 'sdiffstore' command".to_owned());
            };
            let mut difference = keyspace.members(db, first)?;
            for key in rest {
                let other = keyspace.members(db, key)?;
                difference.retain(|member| !other.contains(member));
            }
            let count = difference.len() as u64;
            keyspace.remove(db, &destination);
            keyspace.store_members(db, &destination, difference);
            Ok(count)
        })
    }

    async fn keys(&mut self, pattern: &str) -> TransportResult<Vec<String>> {
        let pattern = self.key(pattern);
        let prefix = self.prefix.clone();
        self.with_keyspace(|keyspace, db| {
            Ok(keyspace
                .keys(db, &pattern)
                .into_iter()
                .filter_map(|key| key.strip_prefix(prefix.as_str()).map(str::to_owned))
                .collect())
        })
    }

    async fn flushall_async(&mut self) -> TransportResult<()> {
        self.with_keyspace(|keyspace, _| {
            keyspace.clear();
            Ok(())
        })
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.record(SessionEvent::Close);
        if self.shared.close_fails() {
            return Err(TransportError::io("broken pipe while closing"));
        }
        Ok(())
    }
}

/// Byte index and mask of a bit, most significant bit first.
fn bit_position(offset: u64) -> TransportResult<(usize, u8)> {
    let out_of_range =
        || TransportError::Rejected("ERR bit offset is not an integer or out of range".to_owned());
    if offset > MAX_BIT_OFFSET {
        return Err(out_of_range());
    }
    let byte = usize::try_from(offset / 8).map_err(|_| out_of_range())?;
    Ok((byte, 0x80 >> (offset % 8)))
}
