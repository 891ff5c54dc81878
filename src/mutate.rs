//! Mutation engine: removing and replacing renditions.
//!
//! Both operations start from a writer seeded with every block of the loaded
//! archive, so untouched blocks keep their ids and bytes and unknown
//! variables ride along.  The result is a fresh, compacted store whose
//! offsets are all recomputed; nothing touches disk until [`commit`].
//!
//! [`Editor`] ties the pieces together for a file on disk: mutate in
//! memory, optionally re-open and verify the bytes, then commit atomically.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::archive::Archive;
use crate::bom::tree::{write_tree, Tree, TreeEntry};
use crate::bom::{BomError, BomWriter};
use crate::car::{Attribute, FacetToken, RenditionKey, VAR_CAR_HEADER};
use crate::catalog::{self, Rendition, RenditionCollection};
use crate::csi::{layout, CsiBlock, CsiHeader, FourCc};
use crate::decode::decode_block;
use crate::encode::{encode_rendition, EncodeError};
use crate::error::{Error, MutationFailure, Result};
use crate::representation::Representation;
use crate::writer::WriteOptions;

// ── Locating ─────────────────────────────────────────────────────────────────

/// Index of `target`'s entry in the archive's `RENDITIONS` tree.
fn locate(archive: &Archive, target: &Rendition) -> Result<usize> {
    let entries = archive.rendition_entries();
    let is_target = |e: &TreeEntry| e.key_block == target.key_block && e.value_block == target.value_block;
    if entries.get(target.position).is_some_and(is_target) {
        return Ok(target.position);
    }
    entries
        .iter()
        .position(is_target)
        .ok_or_else(|| Error::NotFound { name: target.name.clone() })
}

/// Whether any variable or any tree entry other than `skip` refers to `id`.
fn is_shared(archive: &Archive, id: u32, skip: usize) -> bool {
    archive.store().variables().iter().any(|v| v.block == id)
        || archive
            .rendition_entries()
            .iter()
            .enumerate()
            .any(|(i, e)| i != skip && (e.key_block == id || e.value_block == id))
        || archive
            .facet_entries()
            .iter()
            .any(|e| e.key_block == id || e.value_block == id)
}

fn rewrite_tree(
    writer:  &mut BomWriter<'_>,
    tree:    &Tree,
    entries: &[TreeEntry],
) -> std::result::Result<u32, BomError> {
    for &page in &tree.pages {
        writer.free_block(page);
    }
    write_tree(writer, Some(tree.header_block), entries)
}

fn store_error(name: &str, e: BomError) -> Error {
    Error::mutation(name, EncodeError::from(e))
}

// ── Remove ───────────────────────────────────────────────────────────────────

/// Serialise `archive` without `target`.
///
/// The rendition's key and CSI blocks are freed (unless something else
/// still points at them), its facet goes when no other rendition carries
/// the same identifier, and the header's rendition count drops by one.
pub fn remove(archive: &Archive, target: &Rendition) -> Result<Vec<u8>> {
    let index = locate(archive, target)?;
    let entry = archive.rendition_entries()[index];
    let mut writer = archive.writer();

    let remaining: Vec<TreeEntry> = archive
        .rendition_entries()
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != index)
        .map(|(_, e)| *e)
        .collect();

    for id in [entry.key_block, entry.value_block] {
        if !is_shared(archive, id, index) {
            writer.free_block(id);
        }
    }
    rewrite_tree(&mut writer, archive.rendition_tree(), &remaining)
        .map_err(|e| store_error(&target.name, e))?;

    if let (Some(identifier), Some(facets)) = (target.identifier(), archive.facet_tree()) {
        if !identifier_in_use(archive, &remaining, identifier) {
            drop_facets(archive, &mut writer, facets, identifier).map_err(|e| store_error(&target.name, e))?;
        }
    }

    let mut header = archive.header().clone();
    header.rendition_count = header.rendition_count.saturating_sub(1);
    if let Some(block) = archive.store().variable(VAR_CAR_HEADER) {
        writer.set_block(block, header.to_bytes());
    }

    let bytes = writer.finish().map_err(|e| store_error(&target.name, e))?;
    tracing::debug!(name = %target.name, kind = %target.kind, bytes = bytes.len(), "removed rendition");
    Ok(bytes)
}

fn identifier_in_use(archive: &Archive, entries: &[TreeEntry], identifier: u16) -> bool {
    entries.iter().any(|e| {
        archive
            .block(e.key_block)
            .and_then(|b| RenditionKey::parse(b, archive.key_format()))
            .map(|k| k.get(Attribute::Identifier) == Some(identifier))
            .unwrap_or(false)
    })
}

fn drop_facets(
    archive:    &Archive,
    writer:     &mut BomWriter<'_>,
    facets:     &Tree,
    identifier: u16,
) -> std::result::Result<(), BomError> {
    let mut kept = Vec::with_capacity(facets.entries.len());
    let mut dropped = Vec::new();
    for &entry in &facets.entries {
        let token = archive.block(entry.value_block).and_then(FacetToken::parse);
        match token {
            Ok(token) if token.identifier() == Some(identifier) => dropped.push(entry),
            _ => kept.push(entry),
        }
    }
    if dropped.is_empty() {
        return Ok(());
    }
    let still_used: HashSet<u32> = kept.iter().flat_map(|e| [e.key_block, e.value_block]).collect();
    for entry in &dropped {
        for id in [entry.key_block, entry.value_block] {
            if !still_used.contains(&id) {
                writer.free_block(id);
            }
        }
    }
    rewrite_tree(writer, facets, &kept)?;
    Ok(())
}

// ── Replace ──────────────────────────────────────────────────────────────────

/// Serialise `archive` with `target`'s payload replaced by `repr`.
///
/// The CSI block keeps its id unless another entry shares it, in which case
/// the target gets a block of its own.
pub fn replace(
    archive: &Archive,
    target:  &Rendition,
    repr:    &Representation,
    options: &WriteOptions,
) -> Result<Vec<u8>> {
    if !repr.fits(target.kind) {
        return Err(Error::TypeMismatch {
            name:     target.name.clone(),
            expected: target.kind,
            found:    repr.rendition_type(),
        });
    }
    let index = locate(archive, target)?;
    let entry = archive.rendition_entries()[index];

    let old = archive.block(entry.value_block).unwrap_or(&[]);
    let (template, tlv) = match CsiBlock::parse(old) {
        Ok(csi) => (csi.header, csi.tlv),
        Err(_) => (CsiHeader::new(&target.file_name, layout::DATA, FourCc::DATA, 1), &[][..]),
    };
    let block = encode_rendition(&template, tlv, repr, options).map_err(|e| Error::mutation(&target.name, e))?;

    let mut writer = archive.writer();
    if is_shared(archive, entry.value_block, index) {
        let mut entries = archive.rendition_entries().to_vec();
        entries[index].value_block = writer.push_block(block);
        rewrite_tree(&mut writer, archive.rendition_tree(), &entries)
            .map_err(|e| store_error(&target.name, e))?;
    } else {
        writer.set_block(entry.value_block, block);
    }

    let bytes = writer.finish().map_err(|e| store_error(&target.name, e))?;
    tracing::debug!(name = %target.name, kind = %target.kind, bytes = bytes.len(), "replaced rendition");
    Ok(bytes)
}

// ── Verification ─────────────────────────────────────────────────────────────

/// What a rewrite was supposed to do to `target`.
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    Removed,
    Replaced(&'a Representation),
}

fn digest(archive: &Archive, r: &Rendition) -> Option<blake3::Hash> {
    archive.slice(r.payload.clone()).map(blake3::hash)
}

/// Re-open `bytes` and check that only `target` changed.
///
/// Every other rendition must come back with the same name, type and CSI
/// digest, in the same order.  A replaced target must decode as its type;
/// a removed one must be gone.
pub fn verify_rewrite(original: &Archive, bytes: &[u8], target: &Rendition, change: Change<'_>) -> Result<()> {
    let failed = || Error::mutation(&target.name, MutationFailure::Verification { name: target.name.clone() });

    let reopened = Archive::from_bytes(bytes.to_vec()).map_err(|e| match e {
        Error::CorruptArchive { reason } => Error::mutation(&target.name, MutationFailure::Reopen(reason)),
        other => other,
    })?;
    let before = catalog::enumerate(original).in_traversal_order().into_iter().cloned().collect::<Vec<_>>();
    let after = catalog::enumerate(&reopened);
    let after = after.in_traversal_order();

    let expected_len = match change {
        Change::Removed => before.len().saturating_sub(1),
        Change::Replaced(_) => before.len(),
    };
    if after.len() != expected_len {
        return Err(failed());
    }

    let mut after_iter = after.iter();
    for old in &before {
        let is_target = old.position == target.position;
        if is_target && matches!(change, Change::Removed) {
            continue;
        }
        let new = after_iter.next().ok_or_else(failed)?;
        if new.name != old.name || new.kind != old.kind {
            return Err(failed());
        }
        if let (true, Change::Replaced(repr)) = (is_target, change) {
            let block = reopened.slice(new.payload.clone()).ok_or_else(failed)?;
            let decoded = decode_block(new.kind, block).map_err(|_| failed())?;
            // Translucent pixels lose precision to premultiplication.
            let same = match (&decoded, repr) {
                (Representation::Image(a), Representation::Image(b)) => {
                    (a.width, a.height, a.channels) == (b.width, b.height, b.channels)
                }
                (a, b) => a == b,
            };
            if !same {
                return Err(failed());
            }
        } else if digest(original, old) != digest(&reopened, new) {
            tracing::warn!(name = %old.name, "rendition changed during rewrite");
            return Err(failed());
        }
    }
    Ok(())
}

// ── Commit ───────────────────────────────────────────────────────────────────

/// Replace the file at `path` with `bytes` atomically.
///
/// The bytes go to a temporary file in the same directory, are synced, and
/// the temporary file is renamed over `path`.  On failure the original file
/// is untouched and the temporary file is removed.
pub fn commit(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io_err = |e| Error::io(path, e);
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(io_err)?;
    }
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "committed archive");
    Ok(())
}

// ── Editor ───────────────────────────────────────────────────────────────────

/// An archive file open for editing.
///
/// Every successful edit is committed to disk and the editor reloads the
/// new bytes, so the next lookup sees the result.
#[derive(Debug)]
pub struct Editor {
    archive: Archive,
    path:    PathBuf,
    options: WriteOptions,
}

impl Editor {
    pub fn open<P: AsRef<Path>>(path: P, options: WriteOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let archive = Archive::open(&path)?;
        Ok(Self { archive, path, options })
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn renditions(&self) -> RenditionCollection {
        catalog::enumerate(&self.archive)
    }

    fn apply(&mut self, bytes: Vec<u8>, target: &Rendition, change: Change<'_>) -> Result<()> {
        if self.options.verify {
            verify_rewrite(&self.archive, &bytes, target, change)?;
        }
        commit(&self.path, &bytes).map_err(|e| match e {
            Error::Io { source, .. } => Error::mutation(&target.name, source),
            other => other,
        })?;
        self.archive = Archive::from_bytes(bytes)?;
        Ok(())
    }

    pub fn remove(&mut self, target: &Rendition) -> Result<()> {
        let bytes = remove(&self.archive, target)?;
        self.apply(bytes, target, Change::Removed)
    }

    pub fn replace(&mut self, target: &Rendition, repr: &Representation) -> Result<()> {
        let bytes = replace(&self.archive, target, repr, &self.options)?;
        self.apply(bytes, target, Change::Replaced(repr))
    }

    /// Remove the first rendition called `name`.
    pub fn remove_named(&mut self, name: &str) -> Result<()> {
        let target = self.renditions().find(name)?.clone();
        self.remove(&target)
    }

    /// Replace the first rendition called `name`.
    pub fn replace_named(&mut self, name: &str, repr: &Representation) -> Result<()> {
        let target = self.renditions().find(name)?.clone();
        self.replace(&target, repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{enumerate, RenditionType};
    use crate::representation::{Color, PixelBuffer};
    use crate::writer::{CatalogWriter, Variant};

    fn sample() -> Archive {
        let mut w = CatalogWriter::new();
        w.add_image("a", Variant::default(), PixelBuffer::filled(2, 2, [10, 20, 30, 255])).unwrap();
        w.add_color("b", Color::srgb(0.0, 0.5, 1.0, 1.0)).unwrap();
        w.add_image("a", Variant::scaled(2), PixelBuffer::filled(4, 4, [10, 20, 30, 255])).unwrap();
        w.add_pdf("c", b"%PDF-1.4\n%%EOF".to_vec()).unwrap();
        Archive::from_bytes(w.finish().unwrap()).unwrap()
    }

    #[test]
    fn removing_last_variant_drops_the_facet() {
        let archive = sample();
        let c = enumerate(&archive);
        let pdf = c.find("c").unwrap();
        let bytes = remove(&archive, pdf).unwrap();
        verify_rewrite(&archive, &bytes, pdf, Change::Removed).unwrap();
        let after = Archive::from_bytes(bytes).unwrap();
        assert_eq!(after.facet_entries().len(), 2);
        assert_eq!(after.header().rendition_count, 3);
    }

    #[test]
    fn removing_one_variant_keeps_the_facet() {
        let archive = sample();
        let c = enumerate(&archive);
        let first = c.find("a").unwrap();
        let after = Archive::from_bytes(remove(&archive, first).unwrap()).unwrap();
        assert_eq!(after.facet_entries().len(), 3);
        let c2 = enumerate(&after);
        assert_eq!(c2.find("a").unwrap().scale, 2);
    }

    #[test]
    fn replace_keeps_block_id() {
        let archive = sample();
        let c = enumerate(&archive);
        let color = c.find("b").unwrap();
        let new = Representation::Color(Color::srgb(1.0, 1.0, 0.0, 1.0));
        let bytes = replace(&archive, color, &new, &WriteOptions::default()).unwrap();
        verify_rewrite(&archive, &bytes, color, Change::Replaced(&new)).unwrap();
        let after = Archive::from_bytes(bytes).unwrap();
        let c2 = enumerate(&after);
        let color2 = c2.find("b").unwrap();
        assert_eq!(color2.value_block, color.value_block);
        assert_eq!(crate::decode::decode(&after, color2).unwrap(), new);
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let archive = sample();
        let c = enumerate(&archive);
        let err = replace(&archive, c.find("b").unwrap(), &Representation::Pdf(b"%PDF".to_vec()), &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch { expected: RenditionType::Color, found: RenditionType::Pdf, .. }
        ));
    }

    #[test]
    fn stale_rendition_is_not_found() {
        let archive = sample();
        let mut stale = enumerate(&archive).find("c").unwrap().clone();
        stale.key_block = 9999;
        assert!(matches!(remove(&archive, &stale), Err(Error::NotFound { .. })));
    }

    #[test]
    fn verification_catches_wrong_bytes() {
        let archive = sample();
        let c = enumerate(&archive);
        let target = c.find("b").unwrap();
        // Bytes of the untouched archive do not reflect a removal.
        let same = archive.to_bytes().unwrap();
        assert!(matches!(
            verify_rewrite(&archive, &same, target, Change::Removed),
            Err(Error::Mutation { source: MutationFailure::Verification { .. }, .. })
        ));
    }
}
