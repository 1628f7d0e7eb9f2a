//! Value encoding: sentinel mapping, serialization and compression.
//!
//! Encoding happens in two steps. [`wire`] swaps `null`/`false`/`true` for
//! sentinel strings inside the [`ConnectionManager`](crate::ConnectionManager),
//! and [`ValueCodec`] turns the result into bytes inside the transport,
//! according to the session's serializer and compression options.

use thiserror::Error;

mod compression;
mod serializer;
pub mod wire;

pub use compression::Compression;
pub use serializer::Serializer;
pub use wire::{WireValue, decode, encode};

use crate::error::BoxError;
use crate::Value;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(#[source] BoxError),

    #[error("deserialization failed: {0}")]
    Deserialize(#[source] BoxError),

    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("`{0}` is not compiled into this build")]
    Unsupported(String),
}

/// First byte of every value a [`ValueCodec`] serializes.
///
/// `0xC1` is never produced by MessagePack and never starts valid UTF-8, so
/// bytes written by the store itself (`INCR`, `APPEND`, `SETBIT`) or by other
/// clients can't be mistaken for a serialized value.
pub const FORMAT_MARKER: u8 = 0xC1;

/// Marker byte plus the format tag.
pub const HEADER_LEN: usize = 2;

/// Byte-level codec of a transport session.
///
/// Integers are stored as their decimal text, so the store's counter
/// commands work on values written with [`set`](crate::CacheOperations::set).
/// Everything else is serialized, compressed and prefixed with
/// [`FORMAT_MARKER`] and a tag naming the serializer and compression used.
/// Reads follow the tag, not the session options. Bytes without a header
/// read as text: canonical integers become numbers, anything else a string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueCodec {
    serializer: Serializer,
    compression: Compression,
}

impl ValueCodec {
    pub fn new(serializer: Serializer, compression: Compression) -> Self {
        Self {
            serializer,
            compression,
        }
    }

    pub fn serializer(&self) -> Serializer {
        self.serializer
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn set_serializer(&mut self, serializer: Serializer) {
        self.serializer = serializer;
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    pub fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        if let Some(number) = value.as_i64() {
            return Ok(number.to_string().into_bytes());
        }
        let data = self.compression.compress(self.serializer.serialize(value)?)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + data.len());
        bytes.push(FORMAT_MARKER);
        bytes.push(self.serializer.tag() | (self.compression.tag() << 4));
        bytes.extend(data);
        Ok(bytes)
    }

    pub fn from_bytes(&self, mut bytes: Vec<u8>) -> Result<Value, CodecError> {
        if bytes.len() < HEADER_LEN || bytes[0] != FORMAT_MARKER {
            return Ok(plain_text(bytes));
        }
        let tag = bytes[1];
        let (Some(serializer), Some(compression)) = (
            Serializer::from_tag(tag & 0x0f),
            Compression::from_tag(tag >> 4),
        ) else {
            return Err(CodecError::Unsupported(format!("format tag {tag:#04x}")));
        };
        let data = compression.decompress(bytes.split_off(HEADER_LEN))?;
        serializer.deserialize(&data)
    }
}

/// Value of bytes that carry no format header.
fn plain_text(bytes: Vec<u8>) -> Value {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
    };
    match text.parse::<i64>() {
        Ok(number) if number.to_string() == text => Value::from(number),
        _ => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serialized_values_carry_a_header() {
        let codec = ValueCodec::default();
        let bytes = codec.to_bytes(&json!({"a": 1})).unwrap();
        assert_eq!(&bytes[..HEADER_LEN], &[FORMAT_MARKER, 0x00]);
        assert_eq!(&bytes[HEADER_LEN..], br#"{"a":1}"#);
        assert_eq!(codec.from_bytes(bytes).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn integers_are_stored_as_decimal_text() {
        let codec = ValueCodec::default();
        assert_eq!(codec.to_bytes(&json!(-42)).unwrap(), b"-42");
        assert_eq!(codec.from_bytes(b"-42".to_vec()).unwrap(), json!(-42));
        // Floats and strings that look like numbers keep their type.
        let bytes = codec.to_bytes(&json!(1.5)).unwrap();
        assert_eq!(codec.from_bytes(bytes).unwrap(), json!(1.5));
        let bytes = codec.to_bytes(&json!("10")).unwrap();
        assert_eq!(codec.from_bytes(bytes).unwrap(), json!("10"));
    }

    #[test]
    fn bytes_without_header_read_as_text() {
        let codec = ValueCodec::new(Serializer::MessagePack, Compression::None);
        assert_eq!(codec.from_bytes(b"10".to_vec()).unwrap(), json!(10));
        assert_eq!(codec.from_bytes(b"hello".to_vec()).unwrap(), json!("hello"));
        assert_eq!(codec.from_bytes(b"007".to_vec()).unwrap(), json!("007"));
        assert_eq!(codec.from_bytes(Vec::new()).unwrap(), json!(""));
        assert_eq!(codec.from_bytes(vec![0x40]).unwrap(), json!("@"));
        assert_eq!(codec.from_bytes(vec![0xff]).unwrap(), json!("\u{fffd}"));
    }

    #[test]
    fn reads_follow_the_header_not_the_session() {
        let written = ValueCodec::default().to_bytes(&json!(["a", null])).unwrap();
        let reader = ValueCodec::new(Serializer::Ron, Compression::None);
        assert_eq!(reader.from_bytes(written).unwrap(), json!(["a", null]));
    }

    #[test]
    fn unknown_format_tag_is_an_error() {
        let codec = ValueCodec::default();
        assert!(matches!(
            codec.from_bytes(vec![FORMAT_MARKER, 0x0f, b'1']),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[cfg(feature = "msgpack")]
    #[test]
    fn msgpack_values_survive_the_header() {
        let codec = ValueCodec::new(Serializer::MessagePack, Compression::None);
        for value in [json!("x"), json!(7.5), json!({"k": [1, 2]}), json!(u64::MAX)] {
            let bytes = codec.to_bytes(&value).unwrap();
            assert_eq!(bytes[0], FORMAT_MARKER);
            assert_eq!(codec.from_bytes(bytes).unwrap(), value);
        }
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn codec_compresses_after_serializing() {
        let codec = ValueCodec::new(Serializer::Json, Compression::Gzip);
        let value = json!("x".repeat(512));
        let bytes = codec.to_bytes(&value).unwrap();
        assert!(bytes.len() < 512);
        assert_eq!(bytes[1], 0x10);
        assert_eq!(codec.from_bytes(bytes).unwrap(), value);
    }
}
