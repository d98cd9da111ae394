//! # Codec - Record Compression
//!
//! Pure `compress` / `decompress` primitives used by the freezer. Every
//! archived record is compressed independently, so a codec never sees more
//! than one payload at a time and carries no state between calls.
//!
//! ## Available codecs
//!
//! | Kind    | Type          | Notes                                        |
//! |---------|---------------|----------------------------------------------|
//! | `zstd`  | [`ZstdCodec`] | Default. Level 3 unless configured otherwise |
//! | `lz4`   | [`Lz4Codec`]  | Block format with a 4-byte size prefix       |
//! | `none`  | [`Passthrough`] | Identity; compressed length == input length |
//!
//! ## Example
//!
//! ```rust
//! use codec::{Codec, CodecKind};
//!
//! let codec = CodecKind::Zstd.build();
//! let packed = codec.compress(b"hello hello hello").unwrap();
//! assert_eq!(codec.decompress(&packed).unwrap(), b"hello hello hello");
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default zstd compression level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Errors raised by a codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The compressor rejected the input.
    #[error("{codec} compression failed: {reason}")]
    Compress {
        codec: &'static str,
        reason: String,
    },

    /// The decompressor rejected the input (malformed or truncated bytes).
    #[error("{codec} decompression failed: {reason}")]
    Decompress {
        codec: &'static str,
        reason: String,
    },
}

/// A pure, stateless compression primitive.
///
/// Implementations must be deterministic enough that
/// `decompress(compress(x)) == x` for every `x`.
pub trait Codec: Send + Sync {
    /// Short name recorded in archive metadata (e.g. `"zstd"`).
    fn name(&self) -> &'static str;

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError>;
}

impl<C: Codec + ?Sized> Codec for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        (**self).compress(input)
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        (**self).decompress(input)
    }
}

impl<C: Codec + ?Sized> Codec for &C {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        (**self).compress(input)
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        (**self).decompress(input)
    }
}

/// zstd single-frame codec.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ZSTD_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::stream::encode_all(input, self.level).map_err(|e| CodecError::Compress {
            codec: "zstd",
            reason: e.to_string(),
        })
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::stream::decode_all(input).map_err(|e| CodecError::Decompress {
            codec: "zstd",
            reason: e.to_string(),
        })
    }
}

/// LZ4 block codec. The uncompressed length is prepended (4 bytes LE) so the
/// decompressor can size its output buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(input))
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(input).map_err(|e| CodecError::Decompress {
            codec: "lz4",
            reason: e.to_string(),
        })
    }
}

/// Identity codec. Stores payloads verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Codec for Passthrough {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(input.to_vec())
    }
}

/// Codec selector used by configuration and archive metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    #[default]
    Zstd,
    Lz4,
    None,
}

impl CodecKind {
    /// Instantiates the codec with its default settings.
    #[must_use]
    pub fn build(self) -> Box<dyn Codec> {
        match self {
            CodecKind::Zstd => Box::new(ZstdCodec::default()),
            CodecKind::Lz4 => Box::new(Lz4Codec),
            CodecKind::None => Box::new(Passthrough),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CodecKind::Zstd => "zstd",
            CodecKind::Lz4 => "lz4",
            CodecKind::None => "none",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a codec name is not recognised.
#[derive(Debug, Error)]
#[error("unknown codec '{0}' (expected zstd, lz4 or none)")]
pub struct UnknownCodec(pub String);

impl FromStr for CodecKind {
    type Err = UnknownCodec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zstd" => Ok(CodecKind::Zstd),
            "lz4" => Ok(CodecKind::Lz4),
            "none" | "passthrough" => Ok(CodecKind::None),
            other => Err(UnknownCodec(other.to_string())),
        }
    }
}
