//! Sentinel encoding of values the store can't represent unambiguously.
//!
//! Transports commonly use `false` and "nothing" as failure signals, so
//! `null`, `false` and `true` never reach the store as themselves. They are
//! replaced by reserved strings on write and restored on read.
//!
//! A stored string that happens to equal one of the sentinels reads back as
//! the sentinel's value. There is no escaping.

use serde_json::Value;

/// Stored form of `null`.
pub const NULL_SENTINEL: &str = "__kvbox_null__";
/// Stored form of `false`.
pub const FALSE_SENTINEL: &str = "__kvbox_false__";
/// Stored form of `true`.
pub const TRUE_SENTINEL: &str = "__kvbox_true__";

/// Value as it crosses the encode boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Absence of value.
    Null,
    /// Boolean, stored as a sentinel string.
    Bool(bool),
    /// Anything else, stored as is.
    Raw(Value),
}

impl WireValue {
    /// Tags an application value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => WireValue::Null,
            Value::Bool(flag) => WireValue::Bool(flag),
            other => WireValue::Raw(other),
        }
    }

    /// Recognizes sentinels in a value read from the store.
    pub fn from_stored(stored: Value) -> Self {
        match stored.as_str() {
            Some(NULL_SENTINEL) => WireValue::Null,
            Some(FALSE_SENTINEL) => WireValue::Bool(false),
            Some(TRUE_SENTINEL) => WireValue::Bool(true),
            _ => WireValue::Raw(stored),
        }
    }

    /// Form written to the store.
    pub fn into_stored(self) -> Value {
        match self {
            WireValue::Null => Value::String(NULL_SENTINEL.to_owned()),
            WireValue::Bool(false) => Value::String(FALSE_SENTINEL.to_owned()),
            WireValue::Bool(true) => Value::String(TRUE_SENTINEL.to_owned()),
            WireValue::Raw(value) => value,
        }
    }

    /// Application value.
    pub fn into_value(self) -> Value {
        match self {
            WireValue::Null => Value::Null,
            WireValue::Bool(flag) => Value::Bool(flag),
            WireValue::Raw(value) => value,
        }
    }
}

/// Encodes an application value for storage.
pub fn encode(value: Value) -> Value {
    WireValue::from_value(value).into_stored()
}

/// Decodes a stored value back into an application value.
pub fn decode(stored: Value) -> Value {
    WireValue::from_stored(stored).into_value()
}
