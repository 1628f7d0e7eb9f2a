//! Byte-level storage shared by every connection of a [`MemoryConnector`].
//!
//! [`MemoryConnector`]: crate::MemoryConnector

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

pub(crate) const WRONGTYPE: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";
pub(crate) const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";
pub(crate) const NO_SUCH_KEY: &str = "ERR no such key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Data {
    String(Vec<u8>),
    Set(BTreeSet<Vec<u8>>),
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) data: Data,
    pub(crate) expires_at: Option<Instant>,
}

impl Entry {
    pub(crate) fn string(bytes: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data: Data::String(bytes),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    pub(crate) fn set(members: BTreeSet<Vec<u8>>) -> Self {
        Self {
            data: Data::Set(members),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// All databases of the in-memory store.
#[derive(Debug, Default)]
pub(crate) struct Keyspace {
    entries: HashMap<(u8, String), Entry>,
}

impl Keyspace {
    /// Live entry, expired ones are evicted on the way.
    pub(crate) fn entry(&mut self, db: u8, key: &str) -> Option<&mut Entry> {
        let slot = (db, key.to_owned());
        let now = Instant::now();
        if self.entries.get(&slot).is_some_and(|entry| entry.is_expired(now)) {
            self.entries.remove(&slot);
        }
        self.entries.get_mut(&slot)
    }

    pub(crate) fn contains(&mut self, db: u8, key: &str) -> bool {
        self.entry(db, key).is_some()
    }

    pub(crate) fn insert(&mut self, db: u8, key: &str, entry: Entry) {
        self.entries.insert((db, key.to_owned()), entry);
    }

    pub(crate) fn remove(&mut self, db: u8, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(&(db, key.to_owned()))?;
        (!entry.is_expired(Instant::now())).then_some(entry)
    }

    pub(crate) fn string(&mut self, db: u8, key: &str) -> Result<Option<&mut Vec<u8>>, String> {
        match self.entry(db, key) {
            None => Ok(None),
            Some(Entry {
                data: Data::String(bytes),
                ..
            }) => Ok(Some(bytes)),
            Some(_) => Err(WRONGTYPE.to_owned()),
        }
    }

    /// Members of a set, a missing key is an empty set.
    pub(crate) fn members(&mut self, db: u8, key: &str) -> Result<BTreeSet<Vec<u8>>, String> {
        match self.entry(db, key) {
            None => Ok(BTreeSet::new()),
            Some(Entry {
                data: Data::Set(members),
                ..
            }) => Ok(members.clone()),
            Some(_) => Err(WRONGTYPE.to_owned()),
        }
    }

    /// Stores a set, or removes the key when it is empty.
    pub(crate) fn store_members(&mut self, db: u8, key: &str, members: BTreeSet<Vec<u8>>) {
        if members.is_empty() {
            self.entries.remove(&(db, key.to_owned()));
        } else {
            let expires_at = self.entry(db, key).and_then(|entry| entry.expires_at);
            let mut entry = Entry::set(members);
            entry.expires_at = expires_at;
            self.insert(db, key, entry);
        }
    }

    /// Adds `delta` to an integer string, creating it at zero.
    pub(crate) fn add(&mut self, db: u8, key: &str, delta: i64) -> Result<i64, String> {
        let current = match self.string(db, key)? {
            None => 0,
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| NOT_AN_INTEGER.to_owned())?,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| "ERR increment or decrement would overflow".to_owned())?;
        match self.entry(db, key) {
            Some(entry) => entry.data = Data::String(next.to_string().into_bytes()),
            None => self.insert(db, key, Entry::string(next.to_string().into_bytes(), None)),
        }
        Ok(next)
    }

    /// Keys of `db` matching a glob pattern.
    pub(crate) fn keys(&mut self, db: u8, pattern: &str) -> Vec<String> {
        let Some(matcher) = glob_to_regex(pattern) else {
            return Vec::new();
        };
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let mut keys: Vec<String> = self
            .entries
            .keys()
            .filter(|(entry_db, key)| *entry_db == db && matcher.is_match(key))
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Translates `*`, `?` and `[...]` globs into an anchored regex.
///
/// `None` for patterns that can't match anything, like an empty class.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '[' => {
                source.push('[');
                let mut first = true;
                for next in chars.by_ref() {
                    match next {
                        ']' => break,
                        '^' if first => source.push('^'),
                        '-' => source.push('-'),
                        other => source.push_str(&regex::escape(&other.to_string())),
                    }
                    first = false;
                }
                source.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    source.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).ok()
}
