//! Bitmap cell compression registry.
//!
//! Every `CELM` cell names its compression with a CoreUI id.  The full id
//! space is recognised so diagnostics can name what a catalog uses.
//! Stored, zlib and LZFSE cells have a codec; LZVN cells are read through
//! the LZFSE decoder, which understands LZVN-framed blocks.  Asking for any
//! other codec fails hard with [`CodecError::UnavailableCodec`]; there is no
//! fallback.

use std::fmt;
use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use thiserror::Error;

/// Default zlib level for rewritten bitmaps.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

// ── Compression ids ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum Compression {
    Uncompressed = 0,
    Rle          = 1,
    Zip          = 2,
    Lzvn         = 3,
    Lzfse        = 4,
    JpegLzfse    = 5,
    Blurred      = 6,
    Astc         = 7,
    PaletteImg   = 8,
    Hevc         = 9,
    DeepmapLzfse = 10,
    Deepmap2     = 11,
}

impl Compression {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0  => Compression::Uncompressed,
            1  => Compression::Rle,
            2  => Compression::Zip,
            3  => Compression::Lzvn,
            4  => Compression::Lzfse,
            5  => Compression::JpegLzfse,
            6  => Compression::Blurred,
            7  => Compression::Astc,
            8  => Compression::PaletteImg,
            9  => Compression::Hevc,
            10 => Compression::DeepmapLzfse,
            11 => Compression::Deepmap2,
            _  => return None,
        })
    }

    /// Human-readable name (for diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            Compression::Uncompressed => "none",
            Compression::Rle          => "rle",
            Compression::Zip          => "zip",
            Compression::Lzvn         => "lzvn",
            Compression::Lzfse        => "lzfse",
            Compression::JpegLzfse    => "jpeg-lzfse",
            Compression::Blurred      => "blurred",
            Compression::Astc         => "astc",
            Compression::PaletteImg   => "palette-img",
            Compression::Hevc         => "hevc",
            Compression::DeepmapLzfse => "deepmap-lzfse",
            Compression::Deepmap2     => "deepmap2",
        }
    }

    /// Parse from a CLI string.  Only compressions this build can write.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "uncompressed" => Some(Compression::Uncompressed),
            "zip" | "zlib"          => Some(Compression::Zip),
            "lzfse"                 => Some(Compression::Lzfse),
            _                       => None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Decompressed data exceeds the expected {limit} bytes")]
    Oversized { limit: usize },
    /// The catalog uses a compression this build has no codec for.
    #[error("Compression {compression} is not available in this build")]
    UnavailableCodec { compression: Compression },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn compression(&self) -> Compression;
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError>;
    /// Decompress at most `limit` bytes; more output is an error.
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression(&self) -> Compression { Compression::Uncompressed }
    fn compress(&self, data: &[u8], _: u32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        if data.len() > limit {
            return Err(CodecError::Oversized { limit });
        }
        Ok(data.to_vec())
    }
}

pub struct ZipCodec;
impl Codec for ZipCodec {
    fn compression(&self) -> Compression { Compression::Zip }
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
        encoder.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        encoder.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        // One byte past the limit tells "exactly full" apart from "too big".
        ZlibDecoder::new(data)
            .take(limit as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        if out.len() > limit {
            return Err(CodecError::Oversized { limit });
        }
        Ok(out)
    }
}

/// LZFSE streams as written by Apple's compression library.
///
/// The stream header carries the decoded size of each block, so a hostile
/// cell can only make the decoder allocate what it declares; the result is
/// still held to `limit`.
pub struct LzfseCodec;
impl Codec for LzfseCodec {
    fn compression(&self) -> Compression { Compression::Lzfse }
    fn compress(&self, data: &[u8], _: u32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzfse_rust::encode_bytes(data, &mut out).map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzfse_rust::decode_bytes(data, &mut out).map_err(|e| CodecError::Decompression(e.to_string()))?;
        if out.len() > limit {
            return Err(CodecError::Oversized { limit });
        }
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a compression id to a built-in codec.
pub fn get_codec(compression: Compression) -> Result<Box<dyn Codec>, CodecError> {
    match compression {
        Compression::Uncompressed => Ok(Box::new(NoneCodec)),
        Compression::Zip          => Ok(Box::new(ZipCodec)),
        Compression::Lzfse        => Ok(Box::new(LzfseCodec)),
        Compression::Lzvn         => Ok(Box::new(LzfseCodec)),
        other                     => Err(CodecError::UnavailableCodec { compression: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_roundtrip() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let codec = get_codec(Compression::Zip).unwrap();
        let packed = codec.compress(&data, DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(codec.decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn zip_output_is_capped() {
        let data = vec![0u8; 10_000];
        let codec = ZipCodec;
        let packed = codec.compress(&data, 9).unwrap();
        assert!(matches!(codec.decompress(&packed, 100), Err(CodecError::Oversized { limit: 100 })));
    }

    #[test]
    fn lzfse_roundtrip() {
        let data: Vec<u8> = (0..64 * 64 * 4u32).map(|i| (i / 13 % 251) as u8).collect();
        let codec = get_codec(Compression::Lzfse).unwrap();
        assert_eq!(codec.compression(), Compression::Lzfse);
        let packed = codec.compress(&data, DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(packed.starts_with(b"bvx"));
        assert_eq!(codec.decompress(&packed, data.len()).unwrap(), data);
        assert!(matches!(codec.decompress(&packed, 10), Err(CodecError::Oversized { limit: 10 })));
        assert!(codec.decompress(b"not a stream", 100).is_err());
    }

    #[test]
    fn lzvn_cells_use_the_lzfse_decoder() {
        let codec = get_codec(Compression::Lzvn).unwrap();
        let packed = LzfseCodec.compress(b"hello hello hello", 0).unwrap();
        assert_eq!(codec.decompress(&packed, 64).unwrap(), b"hello hello hello");
    }

    #[test]
    fn other_compressions_are_unavailable() {
        assert!(matches!(
            get_codec(Compression::Astc),
            Err(CodecError::UnavailableCodec { compression: Compression::Astc })
        ));
        assert_eq!(Compression::from_u32(4), Some(Compression::Lzfse));
        assert_eq!(Compression::from_name("LZFSE"), Some(Compression::Lzfse));
        assert_eq!(Compression::from_u32(99), None);
    }
}
