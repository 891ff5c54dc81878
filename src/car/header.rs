//! `CARHEADER` and `KEYFORMAT` variables.

use std::io::{self, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::bom::truncated;
use crate::error::Corruption;

pub const CAR_HEADER_TAG: &[u8; 4] = b"RATC";
pub const CAR_HEADER_SIZE: usize = 436;
pub const KEY_FORMAT_TAG: &[u8; 4] = b"tmfk";

const MAIN_VERSION_LEN: usize = 128;
const VERSION_LEN: usize = 256;

/// Catalog-wide metadata stored in the `CARHEADER` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarHeader {
    pub core_ui_version:     u32,
    pub storage_version:     u32,
    pub storage_timestamp:   u32,
    pub rendition_count:     u32,
    pub main_version:        String,
    pub version:             String,
    pub uuid:                Uuid,
    pub associated_checksum: u32,
    pub schema_version:      u32,
    pub color_space_id:      u32,
    pub key_semantics:       u32,
}

impl CarHeader {
    pub fn new() -> Self {
        Self {
            core_ui_version:     498,
            storage_version:     15,
            storage_timestamp:   chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32,
            rendition_count:     0,
            main_version:        format!("assetcar-{}", env!("CARGO_PKG_VERSION")),
            version:             String::new(),
            uuid:                Uuid::new_v4(),
            associated_checksum: 0,
            schema_version:      2,
            color_space_id:      1,
            key_semantics:       2,
        }
    }

    pub fn read(buf: &[u8]) -> Result<Self, Corruption> {
        if buf.len() < CAR_HEADER_SIZE {
            return Err(truncated("CARHEADER", CAR_HEADER_SIZE, buf.len()));
        }
        let tag = tag_of(buf);
        if &tag != CAR_HEADER_TAG {
            return Err(Corruption::BadTag { what: "CARHEADER", expected: *CAR_HEADER_TAG, found: tag });
        }
        let mut r = &buf[4..CAR_HEADER_SIZE];
        let eof = |_| truncated("CARHEADER", CAR_HEADER_SIZE, buf.len());
        let core_ui_version = r.read_u32::<LittleEndian>().map_err(eof)?;
        let storage_version = r.read_u32::<LittleEndian>().map_err(eof)?;
        let storage_timestamp = r.read_u32::<LittleEndian>().map_err(eof)?;
        let rendition_count = r.read_u32::<LittleEndian>().map_err(eof)?;
        let main_version = fixed_str(&r[..MAIN_VERSION_LEN]);
        r = &r[MAIN_VERSION_LEN..];
        let version = fixed_str(&r[..VERSION_LEN]);
        r = &r[VERSION_LEN..];
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&r[..16]);
        r = &r[16..];
        Ok(Self {
            core_ui_version,
            storage_version,
            storage_timestamp,
            rendition_count,
            main_version,
            version,
            uuid: Uuid::from_bytes(uuid),
            associated_checksum: r.read_u32::<LittleEndian>().map_err(eof)?,
            schema_version:      r.read_u32::<LittleEndian>().map_err(eof)?,
            color_space_id:      r.read_u32::<LittleEndian>().map_err(eof)?,
            key_semantics:       r.read_u32::<LittleEndian>().map_err(eof)?,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(CAR_HEADER_TAG)?;
        writer.write_u32::<LittleEndian>(self.core_ui_version)?;
        writer.write_u32::<LittleEndian>(self.storage_version)?;
        writer.write_u32::<LittleEndian>(self.storage_timestamp)?;
        writer.write_u32::<LittleEndian>(self.rendition_count)?;
        write_fixed_str(&mut writer, &self.main_version, MAIN_VERSION_LEN)?;
        write_fixed_str(&mut writer, &self.version, VERSION_LEN)?;
        writer.write_all(self.uuid.as_bytes())?;
        writer.write_u32::<LittleEndian>(self.associated_checksum)?;
        writer.write_u32::<LittleEndian>(self.schema_version)?;
        writer.write_u32::<LittleEndian>(self.color_space_id)?;
        writer.write_u32::<LittleEndian>(self.key_semantics)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CAR_HEADER_SIZE);
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut out);
        out
    }
}

impl Default for CarHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered list of attribute ids that gives rendition keys their meaning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyFormat {
    pub version:    u32,
    pub attributes: Vec<u16>,
}

impl KeyFormat {
    pub fn new(attributes: Vec<u16>) -> Self {
        Self { version: 0, attributes }
    }

    pub fn read(buf: &[u8]) -> Result<Self, Corruption> {
        if buf.len() < 12 {
            return Err(truncated("KEYFORMAT", 12, buf.len()));
        }
        let tag = tag_of(buf);
        if &tag != KEY_FORMAT_TAG {
            return Err(Corruption::BadTag { what: "KEYFORMAT", expected: *KEY_FORMAT_TAG, found: tag });
        }
        let mut r = &buf[4..];
        let eof = |_| truncated("KEYFORMAT", 12, buf.len());
        let version = r.read_u32::<LittleEndian>().map_err(eof)?;
        let count = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
        if r.len() < count * 4 {
            return Err(truncated("KEYFORMAT", 12 + count * 4, buf.len()));
        }
        let attributes = (0..count)
            .map(|_| r.read_u32::<LittleEndian>().map(|a| a as u16))
            .collect::<io::Result<Vec<_>>>()
            .map_err(eof)?;
        Ok(Self { version, attributes })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.attributes.len() * 4);
        out.extend_from_slice(KEY_FORMAT_TAG);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&(self.attributes.len() as u32).to_le_bytes());
        for &attr in &self.attributes {
            out.extend_from_slice(&(attr as u32).to_le_bytes());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn position(&self, attribute: u16) -> Option<usize> {
        self.attributes.iter().position(|&a| a == attribute)
    }
}

pub(crate) fn tag_of(buf: &[u8]) -> [u8; 4] {
    let mut tag = [0u8; 4];
    let n = buf.len().min(4);
    tag[..n].copy_from_slice(&buf[..n]);
    tag
}

pub(crate) fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Write `s` into a NUL-padded field of `len` bytes, truncating on a char
/// boundary so at least one terminator remains.
pub(crate) fn write_fixed_str<W: Write>(writer: &mut W, s: &str, len: usize) -> io::Result<()> {
    let mut end = s.len().min(len - 1);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    writer.write_all(&s.as_bytes()[..end])?;
    writer.write_all(&vec![0u8; len - end])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn car_header_roundtrip() {
        let mut header = CarHeader::new();
        header.rendition_count = 42;
        header.version = "IBCocoaTouchImageCatalogTool-10.0".into();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), CAR_HEADER_SIZE);
        assert_eq!(&bytes[..4], CAR_HEADER_TAG);
        assert_eq!(CarHeader::read(&bytes).unwrap(), header);
    }

    #[test]
    fn long_strings_are_truncated() {
        let mut header = CarHeader::new();
        header.main_version = "é".repeat(100);
        let parsed = CarHeader::read(&header.to_bytes()).unwrap();
        assert_eq!(parsed.main_version, "é".repeat(63));
    }

    #[test]
    fn key_format_roundtrip() {
        let format = KeyFormat::new(vec![1, 2, 12, 15, 17]);
        let parsed = KeyFormat::read(&format.to_bytes()).unwrap();
        assert_eq!(parsed, format);
        assert_eq!(parsed.position(12), Some(2));
    }

    #[test]
    fn key_format_rejects_short_attribute_list() {
        let mut bytes = KeyFormat::new(vec![1, 2]).to_bytes();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(KeyFormat::read(&bytes), Err(Corruption::Truncated { .. })));
    }
}
