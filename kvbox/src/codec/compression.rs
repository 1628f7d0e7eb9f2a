use std::fmt;

use serde::{Deserialize, Serialize};

use super::CodecError;

#[cfg(feature = "gzip")]
const GZIP_LEVEL: u32 = 6;
#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 3;

/// Compression applied to stored values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Values are stored as serialized.
    #[default]
    None,
    /// Gzip (`flate2`), requires the `gzip` feature.
    Gzip,
    /// Zstandard, requires the `zstd` feature.
    Zstd,
}

impl Compression {
    /// Whether this build can compress with this mode.
    pub const fn is_compiled(self) -> bool {
        match self {
            Compression::None => true,
            Compression::Gzip => cfg!(feature = "gzip"),
            Compression::Zstd => cfg!(feature = "zstd"),
        }
    }

    /// Compression tag written in the value header.
    pub(crate) const fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Zstd => 2,
        }
    }

    pub(crate) const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Zstd),
            _ => None,
        }
    }

    pub fn compress(self, data: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        match self {
            Compression::None => Ok(data),
            #[cfg(feature = "gzip")]
            Compression::Gzip => {
                use std::io::Write;

                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::new(GZIP_LEVEL),
                );
                encoder.write_all(&data).map_err(CodecError::Compression)?;
                encoder.finish().map_err(CodecError::Compression)
            }
            #[cfg(feature = "zstd")]
            Compression::Zstd => {
                zstd::stream::encode_all(data.as_slice(), ZSTD_LEVEL).map_err(CodecError::Compression)
            }
            #[allow(unreachable_patterns)]
            unsupported => Err(CodecError::Unsupported(unsupported.to_string())),
        }
    }

    pub fn decompress(self, data: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        match self {
            Compression::None => Ok(data),
            #[cfg(feature = "gzip")]
            Compression::Gzip => {
                use std::io::Read;

                let mut decoder = flate2::read::GzDecoder::new(data.as_slice());
                let mut out = Vec::with_capacity(data.len() * 2);
                decoder
                    .read_to_end(&mut out)
                    .map_err(CodecError::Compression)?;
                Ok(out)
            }
            #[cfg(feature = "zstd")]
            Compression::Zstd => {
                zstd::stream::decode_all(data.as_slice()).map_err(CodecError::Compression)
            }
            #[allow(unreachable_patterns)]
            unsupported => Err(CodecError::Unsupported(unsupported.to_string())),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_passthrough() {
        let data = b"payload".to_vec();
        let compressed = Compression::None.compress(data.clone()).unwrap();
        assert_eq!(compressed, data);
        assert_eq!(Compression::None.decompress(compressed).unwrap(), data);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_restores_payload() {
        let data = "kvbox ".repeat(64).into_bytes();
        let compressed = Compression::Gzip.compress(data.clone()).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Compression::Gzip.decompress(compressed).unwrap(), data);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_restores_payload() {
        let data = "kvbox ".repeat(64).into_bytes();
        let compressed = Compression::Zstd.compress(data.clone()).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Compression::Zstd.decompress(compressed).unwrap(), data);
    }

    #[cfg(not(feature = "zstd"))]
    #[test]
    fn missing_zstd_support_is_an_error() {
        assert!(matches!(
            Compression::Zstd.compress(vec![1, 2, 3]),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[test]
    fn parses_lowercase_names() {
        let mode: Compression = serde_json::from_str("\"zstd\"").unwrap();
        assert_eq!(mode, Compression::Zstd);
        assert_eq!(mode.to_string(), "zstd");
    }
}
