//! Error taxonomy shared by every layer of the crate.
//!
//! [`Error`] is the only error a caller of the public API sees.  Each variant
//! carries structured fields (paths, names, typed reasons) rather than
//! pre-rendered text so a front-end can format or localise it on its own.
//! Lower layers report [`Corruption`] and [`DecodeFailure`] values that are
//! wrapped into the taxonomy at the API boundary.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::RenditionType;
use crate::codec::Compression;
use crate::csi::FourCc;
use crate::encode::EncodeError;

pub type Result<T> = std::result::Result<T, Error>;

// ── Taxonomy ─────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum Error {
    /// Structural violation found while loading an archive.
    #[error("corrupt archive: {reason}")]
    CorruptArchive { reason: Corruption },

    /// No rendition with this name exists in the catalog.
    #[error("rendition '{name}' not found in the asset catalog")]
    NotFound { name: String },

    /// Payload present but not decodable as its declared type.
    #[error("cannot decode rendition '{name}': {reason}")]
    Decode { name: String, reason: DecodeFailure },

    /// A replacement representation disagrees with the target's type.
    #[error("rendition '{name}' is of type {expected}, replacement is {found}")]
    TypeMismatch {
        name:     String,
        expected: RenditionType,
        found:    RenditionType,
    },

    /// Rewriting the archive failed after the target was located.
    #[error("failed to rewrite archive for rendition '{name}': {source}")]
    Mutation {
        name:   String,
        #[source]
        source: MutationFailure,
    },

    /// Filesystem access failure unrelated to the archive format.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub(crate) fn decode(name: &str, reason: DecodeFailure) -> Self {
        Error::Decode { name: name.to_owned(), reason }
    }

    pub(crate) fn mutation(name: &str, source: impl Into<MutationFailure>) -> Self {
        Error::Mutation { name: name.to_owned(), source: source.into() }
    }
}

impl From<Corruption> for Error {
    fn from(reason: Corruption) -> Self {
        Error::CorruptArchive { reason }
    }
}

// ── Structural corruption ────────────────────────────────────────────────────

/// What exactly is wrong with an archive's container structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("file is {len} bytes, smaller than the {min}-byte store header")]
    TooSmall { len: usize, min: usize },

    #[error("bad store magic {found:02x?}")]
    BadMagic { found: [u8; 8] },

    #[error("unsupported store version {0}")]
    UnsupportedVersion(u32),

    #[error("{region} at {offset}+{length} exceeds file size {file_len}")]
    RegionOutOfBounds {
        region:   &'static str,
        offset:   u64,
        length:   u64,
        file_len: u64,
    },

    #[error("block table declares {count} entries but holds only {length} bytes")]
    ImplausibleBlockCount { count: u32, length: u32 },

    #[error("block {id} at {offset}+{length} exceeds file size {file_len}")]
    BlockOutOfBounds {
        id:       u32,
        offset:   u32,
        length:   u32,
        file_len: u64,
    },

    #[error("block {id} overlaps the store header")]
    BlockOverlapsHeader { id: u32 },

    #[error("blocks {first} and {second} overlap")]
    OverlappingBlocks { first: u32, second: u32 },

    #[error("reference to missing block {0}")]
    MissingBlock(u32),

    #[error("truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        what:      &'static str,
        needed:    usize,
        available: usize,
    },

    #[error("required variable {0} is missing")]
    MissingVariable(&'static str),

    #[error("variable name at entry {index} is not valid UTF-8")]
    InvalidVariableName { index: u32 },

    #[error("bad {what} tag: expected {expected:?}, found {found:?}")]
    BadTag {
        what:     &'static str,
        expected: [u8; 4],
        found:    [u8; 4],
    },

    #[error("tree page {0} is reachable more than once")]
    TreeCycle(u32),
}

// ── Decode failures ──────────────────────────────────────────────────────────

/// Why a rendition's payload could not be turned into a representation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeFailure {
    #[error("rendition header: {0}")]
    Header(Corruption),

    #[error("payload needs {needed} bytes, block holds {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad payload tag: expected {expected:?}, found {found:?}")]
    BadTag { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported pixel format {0}")]
    UnsupportedPixelFormat(FourCc),

    #[error("unsupported compression {0}")]
    UnsupportedCompression(Compression),

    #[error("unknown compression id {0}")]
    UnknownCompression(u32),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("image has zero width or height")]
    EmptyImage,

    #[error("{width}x{height} image needs {expected} bytes of pixel data, found {actual}")]
    PixelDataSize {
        width:    u32,
        height:   u32,
        expected: usize,
        actual:   usize,
    },

    #[error("payload does not carry a {0} signature")]
    BadSignature(RenditionType),

    #[error("colour with {0} components")]
    ColorComponents(u32),

    #[error("rendition carries no decodable payload")]
    NoPayload,

    #[error("PNG: {0}")]
    Png(String),

    #[error("JPEG: {0}")]
    Jpeg(String),
}

// ── Mutation failures ────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum MutationFailure {
    #[error("{0}")]
    Encode(#[from] EncodeError),

    #[error("rewritten archive does not reopen: {0}")]
    Reopen(Corruption),

    #[error("rendition '{name}' differs after rewrite")]
    Verification { name: String },

    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}
