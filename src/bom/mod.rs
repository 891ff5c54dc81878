//! BOM store: the outer container of a compiled asset catalog.
//!
//! # Layout
//! All integers in this layer are big-endian.
//!
//! ```text
//! 0     magic "BOMStore"
//! 8     u32 version (1)
//! 12    u32 non-null block count
//! 16    u32 block table offset     20  u32 block table length
//! 24    u32 variables offset       28  u32 variables length
//! 32    zero padding up to HEADER_SIZE
//! ```
//!
//! The block table is `u32 count` followed by `count` `(u32 offset, u32 length)`
//! pairs; entry 0 is always the null block.  A free list (`u32 count` + pairs)
//! follows the entries and is ignored on read.  The variables region is
//! `u32 count` followed by `(u32 block, u8 name_len, name)` records.
//!
//! [`BomStore::parse`] validates every range against the buffer before any
//! block is handed out, so later readers never index out of bounds.

pub mod tree;

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::ops::Range;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::error::Corruption;

pub const MAGIC: &[u8; 8] = b"BOMStore";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 512;

const BLOCK_ENTRY_SIZE: usize = 8;

#[derive(Error, Debug)]
pub enum BomError {
    #[error("store would exceed the 4 GiB addressable by the block table")]
    TooLarge,
    #[error("variable name '{0}' is longer than 255 bytes")]
    NameTooLong(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BomHeader {
    pub version:      u32,
    pub block_count:  u32,
    pub index_offset: u32,
    pub index_length: u32,
    pub vars_offset:  u32,
    pub vars_length:  u32,
}

impl BomHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<BigEndian>(self.version)?;
        writer.write_u32::<BigEndian>(self.block_count)?;
        writer.write_u32::<BigEndian>(self.index_offset)?;
        writer.write_u32::<BigEndian>(self.index_length)?;
        writer.write_u32::<BigEndian>(self.vars_offset)?;
        writer.write_u32::<BigEndian>(self.vars_length)?;
        writer.write_all(&[0u8; HEADER_SIZE - 32])?;
        Ok(())
    }

    pub fn read(buf: &[u8]) -> Result<Self, Corruption> {
        if buf.len() < HEADER_SIZE {
            return Err(Corruption::TooSmall { len: buf.len(), min: HEADER_SIZE });
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[..8]);
        if &magic != MAGIC {
            return Err(Corruption::BadMagic { found: magic });
        }
        let mut r = &buf[8..32];
        let version = read_u32(&mut r, "store header")?;
        if version != VERSION {
            return Err(Corruption::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            block_count:  read_u32(&mut r, "store header")?,
            index_offset: read_u32(&mut r, "store header")?,
            index_length: read_u32(&mut r, "store header")?,
            vars_offset:  read_u32(&mut r, "store header")?,
            vars_length:  read_u32(&mut r, "store header")?,
        })
    }
}

// ── Block table & variables ──────────────────────────────────────────────────

/// Location of one block inside the store.  `(0, 0)` marks a null block; a
/// zero-length block anywhere else is live and empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockRange {
    pub offset: u32,
    pub length: u32,
}

impl BlockRange {
    pub fn is_null(&self) -> bool {
        self.offset == 0 && self.length == 0
    }

    pub fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }

    pub fn as_range(&self) -> Range<usize> {
        self.offset as usize..self.end() as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name:  String,
    pub block: u32,
}

/// Validated view of a store's header, block table and variables.
///
/// Holds no reference to the underlying buffer; callers pass the same buffer
/// that was parsed back into [`BomStore::block`].
#[derive(Debug, Clone)]
pub struct BomStore {
    pub header: BomHeader,
    blocks:     Vec<BlockRange>,
    vars:       Vec<Variable>,
}

impl BomStore {
    pub fn parse(buf: &[u8]) -> Result<Self, Corruption> {
        let header = BomHeader::read(buf)?;
        let file_len = buf.len() as u64;

        let index = region(buf, "block table", header.index_offset, header.index_length)?;
        let mut r = index;
        let count = read_u32(&mut r, "block table")?;
        let needed = 4u64 + count as u64 * BLOCK_ENTRY_SIZE as u64;
        if needed > header.index_length as u64 || count as u64 > file_len / BLOCK_ENTRY_SIZE as u64 {
            return Err(Corruption::ImplausibleBlockCount { count, length: header.index_length });
        }

        let mut blocks = Vec::with_capacity(count as usize);
        for id in 0..count {
            let offset = read_u32(&mut r, "block table")?;
            let length = read_u32(&mut r, "block table")?;
            let range = BlockRange { offset, length };
            if !range.is_null() {
                if range.end() > file_len {
                    return Err(Corruption::BlockOutOfBounds { id, offset, length, file_len });
                }
                if length > 0 && (offset as usize) < HEADER_SIZE {
                    return Err(Corruption::BlockOverlapsHeader { id });
                }
            }
            blocks.push(range);
        }
        check_overlaps(&blocks)?;

        let live = blocks.iter().filter(|b| !b.is_null()).count();
        if header.block_count as usize > blocks.len() {
            return Err(Corruption::ImplausibleBlockCount {
                count:  header.block_count,
                length: header.index_length,
            });
        }
        if live != header.block_count as usize {
            tracing::debug!(declared = header.block_count, live, "store block count differs from table");
        }

        let vars_region = region(buf, "variables", header.vars_offset, header.vars_length)?;
        let vars = parse_variables(vars_region, blocks.len())?;

        Ok(Self { header, blocks, vars })
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[BlockRange] {
        &self.blocks
    }

    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    pub fn variable(&self, name: &str) -> Option<u32> {
        self.vars.iter().find(|v| v.name == name).map(|v| v.block)
    }

    /// Byte range of block `id` inside the parsed buffer.
    pub fn block_range(&self, id: u32) -> Result<BlockRange, Corruption> {
        match self.blocks.get(id as usize) {
            Some(range) if !range.is_null() => Ok(*range),
            _ => Err(Corruption::MissingBlock(id)),
        }
    }

    pub fn block<'a>(&self, buf: &'a [u8], id: u32) -> Result<&'a [u8], Corruption> {
        let range = self.block_range(id)?;
        buf.get(range.as_range()).ok_or(Corruption::MissingBlock(id))
    }
}

fn region<'a>(buf: &'a [u8], what: &'static str, offset: u32, length: u32) -> Result<&'a [u8], Corruption> {
    let end = offset as u64 + length as u64;
    if end > buf.len() as u64 || (offset as usize) < HEADER_SIZE {
        return Err(Corruption::RegionOutOfBounds {
            region:   what,
            offset:   offset as u64,
            length:   length as u64,
            file_len: buf.len() as u64,
        });
    }
    Ok(&buf[offset as usize..end as usize])
}

fn check_overlaps(blocks: &[BlockRange]) -> Result<(), Corruption> {
    let mut live: Vec<(u32, BlockRange)> = blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.is_null())
        .map(|(id, b)| (id as u32, *b))
        .collect();
    live.sort_by_key(|(_, b)| b.offset);
    for pair in live.windows(2) {
        let (first, a) = pair[0];
        let (second, b) = pair[1];
        if a.end() > b.offset as u64 {
            return Err(Corruption::OverlappingBlocks { first, second });
        }
    }
    Ok(())
}

fn parse_variables(mut r: &[u8], block_count: usize) -> Result<Vec<Variable>, Corruption> {
    let count = read_u32(&mut r, "variables")?;
    // Each record is at least 5 bytes; reject counts the region cannot hold.
    if count as usize > r.len() / 5 {
        return Err(Corruption::Truncated {
            what:      "variables",
            needed:    count as usize * 5,
            available: r.len(),
        });
    }
    let mut vars = Vec::with_capacity(count as usize);
    for index in 0..count {
        let block = read_u32(&mut r, "variables")?;
        let len = r.read_u8().map_err(|_| truncated("variables", 1, 0))? as usize;
        if r.len() < len {
            return Err(truncated("variables", len, r.len()));
        }
        let (name, rest) = r.split_at(len);
        r = rest;
        let name = std::str::from_utf8(name)
            .map_err(|_| Corruption::InvalidVariableName { index })?
            .to_owned();
        if block as usize >= block_count {
            return Err(Corruption::MissingBlock(block));
        }
        vars.push(Variable { name, block });
    }
    Ok(vars)
}

pub(crate) fn read_u32(r: &mut &[u8], what: &'static str) -> Result<u32, Corruption> {
    let available = r.len();
    r.read_u32::<BigEndian>().map_err(|_| truncated(what, 4, available))
}

pub(crate) fn truncated(what: &'static str, needed: usize, available: usize) -> Corruption {
    Corruption::Truncated { what, needed, available }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Serialises a store from block contents addressed by id.
///
/// Block ids handed out by [`BomWriter::allocate`] stay stable through
/// [`BomWriter::finish`]; freed ids are reused before the table grows.
/// Payloads are laid out back to back in id order, so every offset in the
/// output is recomputed from scratch.
#[derive(Debug, Default)]
pub struct BomWriter<'a> {
    blocks: Vec<Option<Cow<'a, [u8]>>>,
    free:   BTreeSet<u32>,
    vars:   Vec<Variable>,
}

impl<'a> BomWriter<'a> {
    pub fn new() -> Self {
        Self { blocks: vec![None], free: BTreeSet::new(), vars: Vec::new() }
    }

    /// Seed a writer with every block and variable of a parsed store.
    pub fn from_store(store: &BomStore, buf: &'a [u8]) -> Self {
        let mut writer = Self::new();
        writer.blocks.clear();
        for (id, range) in store.blocks().iter().enumerate() {
            if range.is_null() || id == 0 {
                writer.blocks.push(None);
                if id != 0 {
                    writer.free.insert(id as u32);
                }
            } else {
                writer.blocks.push(Some(Cow::Borrowed(&buf[range.as_range()])));
            }
        }
        if writer.blocks.is_empty() {
            writer.blocks.push(None);
        }
        writer.vars = store.variables().to_vec();
        writer
    }

    /// Reserve an id; its contents stay empty until [`BomWriter::set_block`].
    pub fn allocate(&mut self) -> u32 {
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        self.blocks.push(None);
        (self.blocks.len() - 1) as u32
    }

    pub fn push_block(&mut self, data: impl Into<Cow<'a, [u8]>>) -> u32 {
        let id = self.allocate();
        self.set_block(id, data);
        id
    }

    pub fn set_block(&mut self, id: u32, data: impl Into<Cow<'a, [u8]>>) {
        let idx = id as usize;
        if idx >= self.blocks.len() {
            self.blocks.resize(idx + 1, None);
        }
        self.free.remove(&id);
        self.blocks[idx] = Some(data.into());
    }

    pub fn free_block(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        if let Some(slot) = self.blocks.get_mut(id as usize) {
            *slot = None;
            self.free.insert(id);
        }
    }

    pub fn block(&self, id: u32) -> Option<&[u8]> {
        self.blocks.get(id as usize).and_then(|b| b.as_deref())
    }

    /// Add or repoint a named variable.
    pub fn set_variable(&mut self, name: &str, block: u32) {
        match self.vars.iter_mut().find(|v| v.name == name) {
            Some(var) => var.block = block,
            None => self.vars.push(Variable { name: name.to_owned(), block }),
        }
    }

    pub fn finish(self) -> Result<Vec<u8>, BomError> {
        let mut out = Vec::with_capacity(
            HEADER_SIZE + self.blocks.iter().flatten().map(|b| b.len()).sum::<usize>(),
        );
        out.resize(HEADER_SIZE, 0);

        let mut table = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            match block {
                Some(data) => {
                    let offset = to_u32(out.len())?;
                    out.extend_from_slice(data);
                    table.push(BlockRange { offset, length: to_u32(data.len())? });
                }
                None => table.push(BlockRange::default()),
            }
        }

        let index_offset = to_u32(out.len())?;
        out.write_u32::<BigEndian>(to_u32(table.len())?)?;
        for range in &table {
            out.write_u32::<BigEndian>(range.offset)?;
            out.write_u32::<BigEndian>(range.length)?;
        }
        // Empty free list.
        out.write_u32::<BigEndian>(0)?;
        let index_length = to_u32(out.len())? - index_offset;

        let vars_offset = to_u32(out.len())?;
        out.write_u32::<BigEndian>(to_u32(self.vars.len())?)?;
        for var in &self.vars {
            let name = var.name.as_bytes();
            let len = u8::try_from(name.len()).map_err(|_| BomError::NameTooLong(var.name.clone()))?;
            out.write_u32::<BigEndian>(var.block)?;
            out.write_u8(len)?;
            out.write_all(name)?;
        }
        let vars_length = to_u32(out.len())? - vars_offset;

        let header = BomHeader {
            version: VERSION,
            block_count: table.iter().filter(|b| !b.is_null()).count() as u32,
            index_offset,
            index_length,
            vars_offset,
            vars_length,
        };
        header.write(&mut out[..HEADER_SIZE])?;
        Ok(out)
    }
}

fn to_u32(n: usize) -> Result<u32, BomError> {
    u32::try_from(n).map_err(|_| BomError::TooLarge)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut w = BomWriter::new();
        let a = w.push_block(b"alpha".to_vec());
        let b = w.push_block(b"beta".to_vec());
        w.set_variable("A", a);
        w.set_variable("B", b);
        w.finish().unwrap()
    }

    #[test]
    fn header_roundtrip() {
        let header = BomHeader {
            version: VERSION,
            block_count: 3,
            index_offset: 600,
            index_length: 40,
            vars_offset: 640,
            vars_length: 12,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(BomHeader::read(&buf).unwrap(), header);
    }

    #[test]
    fn parse_written_store() {
        let buf = sample();
        let store = BomStore::parse(&buf).unwrap();
        assert_eq!(store.block_count(), 3);
        assert_eq!(store.header.block_count, 2);
        let a = store.variable("A").unwrap();
        assert_eq!(store.block(&buf, a).unwrap(), b"alpha");
        let b = store.variable("B").unwrap();
        assert_eq!(store.block(&buf, b).unwrap(), b"beta");
        assert_eq!(store.block(&buf, 0), Err(Corruption::MissingBlock(0)));
    }

    #[test]
    fn rejects_bad_magic_and_short_files() {
        let mut buf = sample();
        assert!(matches!(BomStore::parse(&buf[..100]), Err(Corruption::TooSmall { .. })));
        buf[0] = b'X';
        assert!(matches!(BomStore::parse(&buf), Err(Corruption::BadMagic { .. })));
    }

    #[test]
    fn rejects_block_past_end() {
        let mut buf = sample();
        let store = BomStore::parse(&buf).unwrap();
        // Point block 1's length far past the end of the file.
        let entry = store.header.index_offset as usize + 4 + BLOCK_ENTRY_SIZE + 4;
        buf[entry..entry + 4].copy_from_slice(&0x00FF_FFFFu32.to_be_bytes());
        assert!(matches!(BomStore::parse(&buf), Err(Corruption::BlockOutOfBounds { id: 1, .. })));
    }

    #[test]
    fn rejects_overlapping_blocks() {
        let mut buf = sample();
        let store = BomStore::parse(&buf).unwrap();
        let first = store.block_range(1).unwrap();
        // Move block 2 onto block 1.
        let entry = store.header.index_offset as usize + 4 + 2 * BLOCK_ENTRY_SIZE;
        buf[entry..entry + 4].copy_from_slice(&first.offset.to_be_bytes());
        assert!(matches!(BomStore::parse(&buf), Err(Corruption::OverlappingBlocks { .. })));
    }

    #[test]
    fn freed_ids_are_reused() {
        let mut w = BomWriter::new();
        let a = w.push_block(b"a".to_vec());
        let _b = w.push_block(b"b".to_vec());
        w.free_block(a);
        assert_eq!(w.allocate(), a);
    }

    #[test]
    fn empty_blocks_stay_live() {
        let mut w = BomWriter::new();
        let empty = w.push_block(Vec::new());
        let after = w.push_block(b"after".to_vec());
        w.set_variable("E", empty);
        let buf = w.finish().unwrap();

        let store = BomStore::parse(&buf).unwrap();
        assert_eq!(store.block(&buf, empty).unwrap(), b"");
        assert_eq!(store.block(&buf, after).unwrap(), b"after");
        assert!(!store.blocks()[empty as usize].is_null());

        let again = BomWriter::from_store(&store, &buf).finish().unwrap();
        assert_eq!(again, buf);
    }
}
