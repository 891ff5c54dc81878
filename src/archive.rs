//! High-level [`Archive`]: a validated, fully loaded catalog file.
//!
//! ```no_run
//! use assetcar::{catalog, decode, Archive};
//!
//! let archive = Archive::open("Assets.car")?;
//! let renditions = catalog::enumerate(&archive);
//! let icon = renditions.find("AppIcon")?;
//! let representation = decode::decode(&archive, icon)?;
//! # Ok::<(), assetcar::Error>(())
//! ```
//!
//! The whole file is read into memory before anything else happens, and the
//! buffer is never modified afterwards; renditions refer into it by byte
//! range.  Every structure the catalog needs (block table, variables, the
//! `CARHEADER`, `KEYFORMAT`, `RENDITIONS` and `FACETKEYS` trees) is validated
//! up front, so later reads can only fail at the level of a single entry.

use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::bom::tree::{read_tree, Tree, TreeEntry};
use crate::bom::{BomError, BomStore, BomWriter};
use crate::car::{
    CarHeader, KeyFormat, VAR_CAR_HEADER, VAR_FACET_KEYS, VAR_KEY_FORMAT, VAR_RENDITIONS,
};
use crate::error::{Corruption, Error, Result};

pub struct Archive {
    path:       Option<PathBuf>,
    data:       Vec<u8>,
    store:      BomStore,
    header:     CarHeader,
    key_format: KeyFormat,
    renditions: Tree,
    facets:     Option<Tree>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("len", &self.data.len())
            .field("renditions", &self.renditions.entries.len())
            .finish()
    }
}

impl Archive {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let mut archive = Self::from_bytes(data)?;
        tracing::debug!(
            path = %path.display(),
            bytes = archive.data.len(),
            renditions = archive.renditions.entries.len(),
            "opened asset catalog"
        );
        archive.path = Some(path.to_owned());
        Ok(archive)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let store = BomStore::parse(&data)?;

        let header_block = store
            .variable(VAR_CAR_HEADER)
            .ok_or(Corruption::MissingVariable(VAR_CAR_HEADER))?;
        let header = CarHeader::read(store.block(&data, header_block)?)?;

        let format_block = store
            .variable(VAR_KEY_FORMAT)
            .ok_or(Corruption::MissingVariable(VAR_KEY_FORMAT))?;
        let key_format = KeyFormat::read(store.block(&data, format_block)?)?;

        let renditions_block = store
            .variable(VAR_RENDITIONS)
            .ok_or(Corruption::MissingVariable(VAR_RENDITIONS))?;
        let renditions = read_tree(&store, &data, renditions_block)?;

        let facets = match store.variable(VAR_FACET_KEYS) {
            Some(block) => Some(read_tree(&store, &data, block)?),
            None => None,
        };

        Ok(Self { path: None, data, store, header, key_format, renditions, facets })
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn key_format(&self) -> &KeyFormat {
        &self.key_format
    }

    pub fn store(&self) -> &BomStore {
        &self.store
    }

    /// `RENDITIONS` entries in traversal order.
    pub fn rendition_entries(&self) -> &[TreeEntry] {
        &self.renditions.entries
    }

    /// `FACETKEYS` entries in traversal order; empty when the tree is absent.
    pub fn facet_entries(&self) -> &[TreeEntry] {
        self.facets.as_ref().map_or(&[][..], |t| t.entries.as_slice())
    }

    pub(crate) fn rendition_tree(&self) -> &Tree {
        &self.renditions
    }

    pub(crate) fn facet_tree(&self) -> Option<&Tree> {
        self.facets.as_ref()
    }

    pub fn block(&self, id: u32) -> std::result::Result<&[u8], Corruption> {
        self.store.block(&self.data, id)
    }

    pub fn block_range(&self, id: u32) -> std::result::Result<Range<usize>, Corruption> {
        self.store.block_range(id).map(|r| r.as_range())
    }

    /// Bytes at a range previously handed out by [`Archive::block_range`].
    pub fn slice(&self, range: Range<usize>) -> Option<&[u8]> {
        self.data.get(range)
    }

    // ── Serialisation ────────────────────────────────────────────────────────

    /// A writer seeded with every block and variable of this archive.
    pub(crate) fn writer(&self) -> BomWriter<'_> {
        BomWriter::from_store(&self.store, &self.data)
    }

    /// Re-serialise the archive without changes.
    ///
    /// The output is compacted (null blocks leave no gaps) but block ids,
    /// variables and every block's contents are preserved.
    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, BomError> {
        self.writer().finish()
    }
}
