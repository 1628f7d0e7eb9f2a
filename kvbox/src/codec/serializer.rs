use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CodecError;

/// Serialization format for stored values.
///
/// Ordered from the least to the most capable. Connection setup picks the
/// most capable one the environment advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    /// JSON, always available.
    #[default]
    Json,
    /// Rusty Object Notation, requires the `ron` feature.
    Ron,
    /// MessagePack, requires the `msgpack` feature.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl Serializer {
    /// Whether this build can serialize with this format.
    pub const fn is_compiled(self) -> bool {
        match self {
            Serializer::Json => true,
            Serializer::Ron => cfg!(feature = "ron"),
            Serializer::MessagePack => cfg!(feature = "msgpack"),
        }
    }

    /// Format tag written in the value header.
    pub(crate) const fn tag(self) -> u8 {
        match self {
            Serializer::Json => 0,
            Serializer::Ron => 1,
            Serializer::MessagePack => 2,
        }
    }

    pub(crate) const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Serializer::Json),
            1 => Some(Serializer::Ron),
            2 => Some(Serializer::MessagePack),
            _ => None,
        }
    }

    pub fn serialize(self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match self {
            Serializer::Json => {
                serde_json::to_vec(value).map_err(|err| CodecError::Serialize(Box::new(err)))
            }
            #[cfg(feature = "ron")]
            Serializer::Ron => ron::to_string(value)
                .map(String::into_bytes)
                .map_err(|err| CodecError::Serialize(Box::new(err))),
            #[cfg(feature = "msgpack")]
            Serializer::MessagePack => {
                rmp_serde::to_vec(value).map_err(|err| CodecError::Serialize(Box::new(err)))
            }
            #[allow(unreachable_patterns)]
            unsupported => Err(CodecError::Unsupported(unsupported.to_string())),
        }
    }

    pub fn deserialize(self, data: &[u8]) -> Result<Value, CodecError> {
        match self {
            Serializer::Json => {
                serde_json::from_slice(data).map_err(|err| CodecError::Deserialize(Box::new(err)))
            }
            #[cfg(feature = "ron")]
            Serializer::Ron => {
                ron::de::from_bytes(data).map_err(|err| CodecError::Deserialize(Box::new(err)))
            }
            #[cfg(feature = "msgpack")]
            Serializer::MessagePack => {
                rmp_serde::from_slice(data).map_err(|err| CodecError::Deserialize(Box::new(err)))
            }
            #[allow(unreachable_patterns)]
            unsupported => Err(CodecError::Unsupported(unsupported.to_string())),
        }
    }
}

impl fmt::Display for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Serializer::Json => "json",
            Serializer::Ron => "ron",
            Serializer::MessagePack => "msgpack",
        };
        f.write_str(name)
    }
}
