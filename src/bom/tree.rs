//! BOM trees: ordered `(key block, value block)` lists stored as paged B-trees.
//!
//! A tree variable points at a small header block (`"tree"`, version, root
//! page, page size, entry count).  Pages are `paths` blocks:
//!
//! ```text
//! u16 is_leaf | u16 count | u32 forward | u32 backward | count × (u32 value, u32 key)
//! ```
//!
//! In a non-leaf page `value` is the child page id.  Traversal is an in-order
//! walk from the root; every page id is visited at most once, so a cyclic or
//! self-referencing tree is reported instead of looping.

use std::collections::HashSet;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{read_u32, truncated, BomError, BomStore, BomWriter};
use crate::error::Corruption;

pub const TREE_MAGIC: &[u8; 4] = b"tree";
pub const TREE_VERSION: u32 = 1;
pub const PAGE_SIZE: u32 = 4096;

const TREE_HEADER_SIZE: usize = 21;
const PAGE_HEADER_SIZE: usize = 12;
const PATH_SIZE: usize = 8;

/// Entries per page before the writer splits.
pub const PAGE_CAPACITY: usize = (PAGE_SIZE as usize - PAGE_HEADER_SIZE) / PATH_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeEntry {
    pub key_block:   u32,
    pub value_block: u32,
}

/// A tree as found in a store: entries in traversal order plus every page
/// that makes it up (needed to free the pages on rewrite).
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub header_block: u32,
    pub entries:      Vec<TreeEntry>,
    pub pages:        Vec<u32>,
}

struct Page {
    is_leaf: bool,
    paths:   Vec<(u32, u32)>,
}

fn parse_page(buf: &[u8], id: u32) -> Result<Page, Corruption> {
    if buf.len() < PAGE_HEADER_SIZE {
        return Err(truncated("tree page", PAGE_HEADER_SIZE, buf.len()));
    }
    let mut r = buf;
    let is_leaf = r.read_u16::<BigEndian>().map_err(|_| truncated("tree page", 2, 0))? != 0;
    let count = r.read_u16::<BigEndian>().map_err(|_| truncated("tree page", 2, 0))? as usize;
    let _forward = read_u32(&mut r, "tree page")?;
    let _backward = read_u32(&mut r, "tree page")?;
    let needed = PAGE_HEADER_SIZE + count * PATH_SIZE;
    if buf.len() < needed {
        tracing::debug!(page = id, needed, len = buf.len(), "short tree page");
        return Err(truncated("tree page", needed, buf.len()));
    }
    let mut paths = Vec::with_capacity(count);
    for _ in 0..count {
        let value = read_u32(&mut r, "tree page")?;
        let key = read_u32(&mut r, "tree page")?;
        paths.push((value, key));
    }
    Ok(Page { is_leaf, paths })
}

/// Read the tree whose header lives in `header_block`.
pub fn read_tree(store: &BomStore, buf: &[u8], header_block: u32) -> Result<Tree, Corruption> {
    let header = store.block(buf, header_block)?;
    if header.len() < TREE_HEADER_SIZE {
        return Err(truncated("tree header", TREE_HEADER_SIZE, header.len()));
    }
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&header[..4]);
    if &tag != TREE_MAGIC {
        return Err(Corruption::BadTag { what: "tree", expected: *TREE_MAGIC, found: tag });
    }
    let mut r = &header[4..];
    let _version = read_u32(&mut r, "tree header")?;
    let root = read_u32(&mut r, "tree header")?;

    let mut tree = Tree { header_block, ..Tree::default() };
    let mut seen = HashSet::new();
    seen.insert(header_block);
    // Explicit stack keeps deep or hostile trees off the call stack.
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            return Err(Corruption::TreeCycle(id));
        }
        let page = parse_page(store.block(buf, id)?, id)?;
        tree.pages.push(id);
        if page.is_leaf {
            tree.entries.extend(page.paths.iter().map(|&(value_block, key_block)| TreeEntry {
                key_block,
                value_block,
            }));
        } else {
            stack.extend(page.paths.iter().rev().map(|&(child, _)| child));
        }
    }
    Ok(tree)
}

fn encode_page(is_leaf: bool, forward: u32, backward: u32, paths: &[(u32, u32)]) -> Result<Vec<u8>, BomError> {
    let mut page = Vec::with_capacity(PAGE_SIZE as usize);
    page.write_u16::<BigEndian>(is_leaf as u16)?;
    page.write_u16::<BigEndian>(paths.len() as u16)?;
    page.write_u32::<BigEndian>(forward)?;
    page.write_u32::<BigEndian>(backward)?;
    for &(value, key) in paths {
        page.write_u32::<BigEndian>(value)?;
        page.write_u32::<BigEndian>(key)?;
    }
    page.resize(PAGE_SIZE as usize, 0);
    Ok(page)
}

/// Write `entries` as a fresh tree.
///
/// When `header_block` is given the tree header is written into that id so
/// the variable pointing at it stays valid; otherwise a new id is allocated.
/// Returns the header block id.
pub fn write_tree(
    writer:       &mut BomWriter<'_>,
    header_block: Option<u32>,
    entries:      &[TreeEntry],
) -> Result<u32, BomError> {
    let header_block = header_block.unwrap_or_else(|| writer.allocate());

    // Leaves, chained left to right.
    let chunks: Vec<&[TreeEntry]> = if entries.is_empty() {
        vec![&entries[..0]]
    } else {
        entries.chunks(PAGE_CAPACITY).collect()
    };
    let ids: Vec<u32> = chunks.iter().map(|_| writer.allocate()).collect();
    // (page id, last key in the subtree)
    let mut level: Vec<(u32, u32)> = Vec::with_capacity(ids.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let forward = ids.get(i + 1).copied().unwrap_or(0);
        let backward = if i == 0 { 0 } else { ids[i - 1] };
        let paths: Vec<(u32, u32)> = chunk.iter().map(|e| (e.value_block, e.key_block)).collect();
        writer.set_block(ids[i], encode_page(true, forward, backward, &paths)?);
        level.push((ids[i], chunk.last().map_or(0, |e| e.key_block)));
    }

    // Index pages until a single root remains.
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / PAGE_CAPACITY + 1);
        for group in level.chunks(PAGE_CAPACITY) {
            let id = writer.allocate();
            writer.set_block(id, encode_page(false, 0, 0, group)?);
            next.push((id, group.last().map_or(0, |&(_, key)| key)));
        }
        level = next;
    }
    let root = level[0].0;

    let mut header = Vec::with_capacity(TREE_HEADER_SIZE);
    header.extend_from_slice(TREE_MAGIC);
    header.write_u32::<BigEndian>(TREE_VERSION)?;
    header.write_u32::<BigEndian>(root)?;
    header.write_u32::<BigEndian>(PAGE_SIZE)?;
    header.write_u32::<BigEndian>(u32::try_from(entries.len()).map_err(|_| BomError::TooLarge)?)?;
    header.write_u8(0)?;
    writer.set_block(header_block, header);
    Ok(header_block)
}
