//! Rendition catalog: the typed, grouped view over an archive's entries.
//!
//! [`enumerate`] walks `RENDITIONS` in traversal order and never fails as a
//! whole.  An entry whose key, header or value block cannot be read is kept
//! and classified [`RenditionType::Other`], so one bad entry costs exactly
//! one rendition's worth of information.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use serde::Serialize;

use crate::archive::Archive;
use crate::car::key::PART_ICON;
use crate::car::{Attribute, FacetToken, Idiom, RenditionKey};
use crate::csi::{layout, CsiHeader, FourCc};
use crate::error::{Error, Result};

// ── Rendition type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RenditionType {
    Image,
    Icon,
    ImageSet,
    Color,
    Svg,
    Pdf,
    Other,
}

impl RenditionType {
    pub fn is_bitmap(self) -> bool {
        matches!(self, RenditionType::Image | RenditionType::Icon | RenditionType::ImageSet)
    }

    /// Lower-case token used in file names and machine output.
    pub fn slug(self) -> &'static str {
        match self {
            RenditionType::Image => "image",
            RenditionType::Icon => "icon",
            RenditionType::ImageSet => "imageset",
            RenditionType::Color => "color",
            RenditionType::Svg => "svg",
            RenditionType::Pdf => "pdf",
            RenditionType::Other => "other",
        }
    }

    /// Classify a rendition from its header and key.
    pub fn classify(header: &CsiHeader, key: &RenditionKey) -> Self {
        if header.layout == layout::COLOR {
            return RenditionType::Color;
        }
        match header.pixel_format {
            FourCc::PDF => RenditionType::Pdf,
            FourCc::SVG => RenditionType::Svg,
            f if f.is_bitmap() || f.is_stored_image() => {
                if key.get(Attribute::Part) == Some(PART_ICON) {
                    RenditionType::Icon
                } else if layout::is_multi_part(header.layout) {
                    RenditionType::ImageSet
                } else {
                    RenditionType::Image
                }
            }
            _ => RenditionType::Other,
        }
    }
}

impl fmt::Display for RenditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RenditionType::Image => "Image",
            RenditionType::Icon => "Icon",
            RenditionType::ImageSet => "Image Set",
            RenditionType::Color => "Color",
            RenditionType::Svg => "SVG",
            RenditionType::Pdf => "PDF",
            RenditionType::Other => "Other",
        })
    }
}

// ── Rendition ────────────────────────────────────────────────────────────────

/// One named, typed entry of an archive.
///
/// `payload` is a byte range into the archive buffer the rendition was
/// enumerated from; a rendition is only meaningful together with that
/// archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub name:         String,
    pub kind:         RenditionType,
    pub key:          RenditionKey,
    pub file_name:    String,
    pub scale:        u32,
    pub idiom:        Idiom,
    pub width:        u32,
    pub height:       u32,
    pub layout:       u16,
    pub pixel_format: FourCc,
    /// Position in `RENDITIONS` traversal order.
    pub position:     usize,
    pub key_block:    u32,
    pub value_block:  u32,
    pub payload:      Range<usize>,
}

impl Rendition {
    pub fn identifier(&self) -> Option<u16> {
        self.key.get(Attribute::Identifier)
    }
}

// ── Collection ───────────────────────────────────────────────────────────────

/// Renditions grouped by type.
///
/// An ordered multimap: groups appear in the order their type was first
/// met, and each group keeps its renditions in traversal order.  Pushing
/// never reorders existing entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenditionCollection {
    groups: Vec<(RenditionType, Vec<Rendition>)>,
}

impl RenditionCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rendition: Rendition) {
        match self.groups.iter_mut().find(|(kind, _)| *kind == rendition.kind) {
            Some((_, group)) => group.push(rendition),
            None => self.groups.push((rendition.kind, vec![rendition])),
        }
    }

    pub fn groups(&self) -> &[(RenditionType, Vec<Rendition>)] {
        &self.groups
    }

    pub fn types(&self) -> impl Iterator<Item = RenditionType> + '_ {
        self.groups.iter().map(|(kind, _)| *kind)
    }

    pub fn get(&self, kind: RenditionType) -> &[Rendition] {
        self.groups
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(&[][..], |(_, group)| group.as_slice())
    }

    /// Every rendition, group by group.
    pub fn iter(&self) -> impl Iterator<Item = &Rendition> {
        self.groups.iter().flat_map(|(_, group)| group.iter())
    }

    /// Every rendition in archive traversal order.
    pub fn in_traversal_order(&self) -> Vec<&Rendition> {
        let mut all: Vec<&Rendition> = self.iter().collect();
        all.sort_by_key(|r| r.position);
        all
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, group)| group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// First rendition named `name` in traversal order.
    pub fn find(&self, name: &str) -> Result<&Rendition> {
        self.iter()
            .filter(|r| r.name == name)
            .min_by_key(|r| r.position)
            .ok_or_else(|| Error::NotFound { name: name.to_owned() })
    }
}

impl<'a> IntoIterator for &'a RenditionCollection {
    type Item = &'a (RenditionType, Vec<Rendition>);
    type IntoIter = std::slice::Iter<'a, (RenditionType, Vec<Rendition>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

// ── Enumeration ──────────────────────────────────────────────────────────────

/// Facet names keyed by identifier; the first facet for an identifier wins.
pub fn facet_names(archive: &Archive) -> HashMap<u16, String> {
    let mut names = HashMap::new();
    for entry in archive.facet_entries() {
        let name = match archive.block(entry.key_block) {
            Ok(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Err(e) => {
                tracing::warn!(block = entry.key_block, error = %e, "unreadable facet name");
                continue;
            }
        };
        let token = match archive.block(entry.value_block).map(FacetToken::parse) {
            Ok(Ok(token)) => token,
            Ok(Err(e)) | Err(e) => {
                tracing::warn!(facet = %name, error = %e, "unreadable facet token");
                continue;
            }
        };
        if let Some(id) = token.identifier() {
            names.entry(id).or_insert(name);
        }
    }
    names
}

/// Build the collection of every rendition in `archive`.
pub fn enumerate(archive: &Archive) -> RenditionCollection {
    let names = facet_names(archive);
    let format = archive.key_format();
    let mut collection = RenditionCollection::new();

    for (position, entry) in archive.rendition_entries().iter().enumerate() {
        let key = match archive.block(entry.key_block).and_then(|b| RenditionKey::parse(b, format)) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(position, error = %e, "unreadable rendition key");
                RenditionKey::default()
            }
        };
        let payload = archive.block_range(entry.value_block).unwrap_or(0..0);
        let header = match archive.block(entry.value_block).and_then(CsiHeader::read) {
            Ok(header) => Some(header),
            Err(e) => {
                tracing::warn!(position, error = %e, "unreadable rendition header");
                None
            }
        };

        let name = key
            .get(Attribute::Identifier)
            .and_then(|id| names.get(&id).cloned())
            .or_else(|| header.as_ref().map(|h| h.name.clone()).filter(|n| !n.is_empty()))
            .unwrap_or_else(|| format!("rendition-{position}"));

        let rendition = match header {
            Some(h) => Rendition {
                kind:         RenditionType::classify(&h, &key),
                scale:        h.scale(),
                idiom:        Idiom::from_u16(key.get(Attribute::Idiom).unwrap_or(0)),
                width:        h.width,
                height:       h.height,
                layout:       h.layout,
                pixel_format: h.pixel_format,
                file_name:    h.name,
                name,
                key,
                position,
                key_block:    entry.key_block,
                value_block:  entry.value_block,
                payload,
            },
            None => Rendition {
                kind:         RenditionType::Other,
                scale:        0,
                idiom:        Idiom::from_u16(key.get(Attribute::Idiom).unwrap_or(0)),
                width:        0,
                height:       0,
                layout:       0,
                pixel_format: FourCc::NONE,
                file_name:    String::new(),
                name,
                key,
                position,
                key_block:    entry.key_block,
                value_block:  entry.value_block,
                payload,
            },
        };
        collection.push(rendition);
    }

    tracing::debug!(
        renditions = collection.len(),
        groups = collection.groups().len(),
        "enumerated catalog"
    );
    collection
}
