//! # Batch Compression
//!
//! Purpose: Compress and decompress whole encoded message sets.
//!
//! ## Design Principles
//! 1. **Batch Granularity**: A codec runs once over a flushed batch, never per
//!    message, trading a little latency for throughput.
//! 2. **Wire Compatible Codes**: The low two attribute bits of a message carry
//!    the codec (0 none, 1 gzip, 2 snappy).
//! 3. **Lenient Names**: Unknown codec names fall back to `none`.

use std::io::{Read, Write};

use bytes::Bytes;
use tracing::warn;

use crate::error::{KqError, KqResult};

/// Mask selecting the codec bits in a message attributes byte.
pub const COMPRESSION_ATTRIBUTE_MASK: u8 = 0x03;

/// Compression codec applied to a produced batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
}

impl Compression {
    /// Resolves a configured codec name; unrecognized names map to `None`.
    pub fn from_name(name: Option<&str>) -> Self {
        let Some(name) = name else {
            return Compression::None;
        };
        match name.to_ascii_lowercase().as_str() {
            "gzip" => Compression::Gzip,
            "snappy" => Compression::Snappy,
            "none" | "" => Compression::None,
            other => {
                warn!(codec = other, "unknown compression codec, using none");
                Compression::None
            }
        }
    }

    /// Decodes the codec from a message attributes byte.
    pub fn from_attributes(attributes: u8) -> KqResult<Self> {
        match attributes & COMPRESSION_ATTRIBUTE_MASK {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Snappy),
            code => Err(KqError::compression(format!("unsupported codec {code}"))),
        }
    }

    /// Returns the attribute bits for this codec.
    pub const fn attributes(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Snappy => 2,
        }
    }

    /// Compresses `data` with this codec.
    pub fn compress(self, data: &[u8]) -> KqResult<Bytes> {
        match self {
            Compression::None => Ok(Bytes::copy_from_slice(data)),
            Compression::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::with_capacity(data.len()),
                    flate2::Compression::fast(),
                );
                encoder
                    .write_all(data)
                    .map_err(|err| KqError::compression(err.to_string()))?;
                let compressed = encoder
                    .finish()
                    .map_err(|err| KqError::compression(err.to_string()))?;
                Ok(Bytes::from(compressed))
            }
            Compression::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map(Bytes::from)
                .map_err(|err| KqError::compression(err.to_string())),
        }
    }

    /// Decompresses `data` produced by this codec.
    pub fn decompress(self, data: &[u8]) -> KqResult<Bytes> {
        match self {
            Compression::None => Ok(Bytes::copy_from_slice(data)),
            Compression::Gzip => {
                let mut out = Vec::new();
                flate2::read::GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|err| KqError::compression(err.to_string()))?;
                Ok(Bytes::from(out))
            }
            Compression::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map(Bytes::from)
                .map_err(|err| KqError::compression(err.to_string())),
        }
    }
}
