//! Rendition keys and facet key tokens.
//!
//! A rendition key is a fixed-length array of little-endian `u16` values,
//! one per attribute listed in `KEYFORMAT`.  A facet key token is a sparse
//! `(attribute, value)` list that names a group of renditions; the link
//! between the two is the [`Attribute::Identifier`] value.

use std::fmt;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

use super::header::KeyFormat;
use crate::bom::truncated;
use crate::error::Corruption;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Attribute {
    ThemeLook           = 0,
    Element             = 1,
    Part                = 2,
    Size                = 3,
    Direction           = 4,
    Placeholder         = 5,
    Value               = 6,
    Appearance          = 7,
    Dimension1          = 8,
    Dimension2          = 9,
    State               = 10,
    Layer               = 11,
    Scale               = 12,
    Localization        = 13,
    PresentationState   = 14,
    Idiom               = 15,
    Subtype             = 16,
    Identifier          = 17,
    PreviousValue       = 18,
    PreviousState       = 19,
    HorizontalSizeClass = 20,
    VerticalSizeClass   = 21,
    MemoryClass         = 22,
    GraphicsClass       = 23,
    DisplayGamut        = 24,
    DeploymentTarget    = 25,
}

impl Attribute {
    pub fn id(self) -> u16 {
        self as u16
    }
}

/// Element value used for every rendition produced by this crate.
pub const ELEMENT_IMAGE: u16 = 85;
/// Part value of ordinary images.
pub const PART_IMAGE: u16 = 181;
/// Part value that marks an icon.
pub const PART_ICON: u16 = 220;

// ── Idiom ────────────────────────────────────────────────────────────────────

/// Device family a rendition targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Idiom {
    #[default]
    Universal,
    Phone,
    Pad,
    Tv,
    CarPlay,
    Watch,
    Marketing,
    Other(u16),
}

impl Idiom {
    pub fn from_u16(v: u16) -> Self {
        match v {
            0 => Idiom::Universal,
            1 => Idiom::Phone,
            2 => Idiom::Pad,
            3 => Idiom::Tv,
            4 => Idiom::CarPlay,
            5 => Idiom::Watch,
            6 => Idiom::Marketing,
            other => Idiom::Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Idiom::Universal => 0,
            Idiom::Phone => 1,
            Idiom::Pad => 2,
            Idiom::Tv => 3,
            Idiom::CarPlay => 4,
            Idiom::Watch => 5,
            Idiom::Marketing => 6,
            Idiom::Other(v) => v,
        }
    }
}

impl fmt::Display for Idiom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Idiom::Universal => f.write_str("universal"),
            Idiom::Phone => f.write_str("iphone"),
            Idiom::Pad => f.write_str("ipad"),
            Idiom::Tv => f.write_str("tv"),
            Idiom::CarPlay => f.write_str("carplay"),
            Idiom::Watch => f.write_str("watch"),
            Idiom::Marketing => f.write_str("marketing"),
            Idiom::Other(v) => write!(f, "idiom{v}"),
        }
    }
}

// ── Rendition key ────────────────────────────────────────────────────────────

/// Decoded rendition key: `(attribute id, value)` in key-format order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenditionKey {
    values: Vec<(u16, u16)>,
}

impl RenditionKey {
    pub fn parse(buf: &[u8], format: &KeyFormat) -> Result<Self, Corruption> {
        let needed = format.len() * 2;
        if buf.len() < needed {
            return Err(truncated("rendition key", needed, buf.len()));
        }
        let mut r = buf;
        let mut values = Vec::with_capacity(format.len());
        for &attr in &format.attributes {
            let value = r
                .read_u16::<LittleEndian>()
                .map_err(|_| truncated("rendition key", needed, buf.len()))?;
            values.push((attr, value));
        }
        Ok(Self { values })
    }

    /// Build a key for `format`; attributes not listed in `values` are zero.
    pub fn from_attributes(format: &KeyFormat, values: &[(Attribute, u16)]) -> Self {
        let values = format
            .attributes
            .iter()
            .map(|&attr| {
                let value = values
                    .iter()
                    .find(|(a, _)| a.id() == attr)
                    .map_or(0, |&(_, v)| v);
                (attr, value)
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, attribute: Attribute) -> Option<u16> {
        self.values
            .iter()
            .find(|(a, _)| *a == attribute.id())
            .map(|&(_, v)| v)
    }

    pub fn values(&self) -> &[(u16, u16)] {
        &self.values
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|&(_, v)| v.to_le_bytes()).collect()
    }
}

// ── Facet key token ──────────────────────────────────────────────────────────

/// Value of a `FACETKEYS` entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FacetToken {
    pub hot_spot:   (u16, u16),
    pub attributes: Vec<(u16, u16)>,
}

impl FacetToken {
    pub fn new(attributes: &[(Attribute, u16)]) -> Self {
        Self {
            hot_spot:   (0, 0),
            attributes: attributes.iter().map(|&(a, v)| (a.id(), v)).collect(),
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, Corruption> {
        let mut r = buf;
        let eof = |_| truncated("facet token", 6, buf.len());
        let x = r.read_u16::<LittleEndian>().map_err(eof)?;
        let y = r.read_u16::<LittleEndian>().map_err(eof)?;
        let count = r.read_u16::<LittleEndian>().map_err(eof)? as usize;
        if r.len() < count * 4 {
            return Err(truncated("facet token", 6 + count * 4, buf.len()));
        }
        let mut attributes = Vec::with_capacity(count);
        for _ in 0..count {
            let attr = r.read_u16::<LittleEndian>().map_err(eof)?;
            let value = r.read_u16::<LittleEndian>().map_err(eof)?;
            attributes.push((attr, value));
        }
        Ok(Self { hot_spot: (x, y), attributes })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.attributes.len() * 4);
        out.extend_from_slice(&self.hot_spot.0.to_le_bytes());
        out.extend_from_slice(&self.hot_spot.1.to_le_bytes());
        out.extend_from_slice(&(self.attributes.len() as u16).to_le_bytes());
        for &(attr, value) in &self.attributes {
            out.extend_from_slice(&attr.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn get(&self, attribute: Attribute) -> Option<u16> {
        self.attributes
            .iter()
            .find(|(a, _)| *a == attribute.id())
            .map(|&(_, v)| v)
    }

    pub fn identifier(&self) -> Option<u16> {
        self.get(Attribute::Identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_lookup_follows_format_order() {
        let format = KeyFormat::new(vec![Attribute::Scale.id(), Attribute::Identifier.id()]);
        let key = RenditionKey::from_attributes(&format, &[(Attribute::Identifier, 7), (Attribute::Scale, 2)]);
        assert_eq!(key.to_bytes(), vec![2, 0, 7, 0]);
        let parsed = RenditionKey::parse(&key.to_bytes(), &format).unwrap();
        assert_eq!(parsed.get(Attribute::Identifier), Some(7));
        assert_eq!(parsed.get(Attribute::Scale), Some(2));
        assert_eq!(parsed.get(Attribute::Idiom), None);
    }

    #[test]
    fn short_key_is_rejected() {
        let format = KeyFormat::new(vec![1, 2, 3]);
        assert!(RenditionKey::parse(&[0, 0, 0, 0], &format).is_err());
    }

    #[test]
    fn facet_token_roundtrip() {
        let token = FacetToken::new(&[(Attribute::Element, ELEMENT_IMAGE), (Attribute::Identifier, 3)]);
        let parsed = FacetToken::parse(&token.to_bytes()).unwrap();
        assert_eq!(parsed, token);
        assert_eq!(parsed.identifier(), Some(3));
    }
}
