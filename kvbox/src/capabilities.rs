use crate::codec::{Compression, Serializer};

/// Serializers and compressors the environment advertises.
///
/// [`Capabilities::detect`] reports what the build was compiled with. Other
/// constructors can only narrow that set, never widen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    msgpack: bool,
    ron: bool,
    gzip: bool,
    zstd: bool,
}

impl Capabilities {
    /// Everything compiled into this build.
    pub const fn detect() -> Self {
        Self {
            msgpack: Serializer::MessagePack.is_compiled(),
            ron: Serializer::Ron.is_compiled(),
            gzip: Compression::Gzip.is_compiled(),
            zstd: Compression::Zstd.is_compiled(),
        }
    }

    /// JSON only, no compression.
    pub const fn minimal() -> Self {
        Self {
            msgpack: false,
            ron: false,
            gzip: false,
            zstd: false,
        }
    }

    /// Drops a serializer from the advertised set. JSON can't be dropped.
    pub const fn without_serializer(mut self, serializer: Serializer) -> Self {
        match serializer {
            Serializer::Json => {}
            Serializer::Ron => self.ron = false,
            Serializer::MessagePack => self.msgpack = false,
        }
        self
    }

    /// Drops a compression mode from the advertised set.
    pub const fn without_compression(mut self, compression: Compression) -> Self {
        match compression {
            Compression::None => {}
            Compression::Gzip => self.gzip = false,
            Compression::Zstd => self.zstd = false,
        }
        self
    }

    pub const fn supports_serializer(&self, serializer: Serializer) -> bool {
        match serializer {
            Serializer::Json => true,
            Serializer::Ron => self.ron,
            Serializer::MessagePack => self.msgpack,
        }
    }

    pub const fn supports_compression(&self, compression: Compression) -> bool {
        match compression {
            Compression::None => true,
            Compression::Gzip => self.gzip,
            Compression::Zstd => self.zstd,
        }
    }

    /// Most capable advertised serializer: MessagePack, then RON, then JSON.
    pub fn best_serializer(&self) -> Serializer {
        [Serializer::MessagePack, Serializer::Ron]
            .into_iter()
            .find(|serializer| self.supports_serializer(*serializer))
            .unwrap_or(Serializer::Json)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}
