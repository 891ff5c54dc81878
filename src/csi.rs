//! CSI rendition blocks, the value side of the `RENDITIONS` tree.
//!
//! ```text
//! 0    tag "ISTC"             4    u32 version
//! 8    u32 flags              12   u32 width          16  u32 height
//! 20   u32 scale × 100        24   u32 pixel format   28  u32 colour model
//! 32   u32 modtime            36   u16 layout         38  u16 zero
//! 40   [u8; 128] file name
//! 168  u32 tlv length         172  u32 bitmap count
//! 176  u32 reserved           180  u32 payload size
//! 184  tlv bytes, then payload bytes
//! ```
//!
//! All fields are little-endian.  Payload tags (`CELM`, `RLOC`, `RAWD`) are
//! documented in `decode.rs`.

use std::fmt;
use std::io::{self, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::bom::truncated;
use crate::car::header::{fixed_str, tag_of, write_fixed_str};
use crate::error::{Corruption, DecodeFailure};

pub const CSI_TAG: &[u8; 4] = b"ISTC";
pub const CSI_HEADER_SIZE: usize = 184;
pub const CSI_VERSION: u32 = 1;

const NAME_LEN: usize = 128;

/// Four-character code as stored in the pixel-format field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const NONE: FourCc = FourCc(0);
    pub const ARGB: FourCc = FourCc::new(*b"ARGB");
    pub const GA8:  FourCc = FourCc::new(*b"GA8 ");
    pub const DATA: FourCc = FourCc::new(*b"DATA");
    pub const PDF:  FourCc = FourCc::new(*b"PDF ");
    pub const SVG:  FourCc = FourCc::new(*b"SVG ");
    pub const JPEG: FourCc = FourCc::new(*b"JPEG");
    pub const HEIF: FourCc = FourCc::new(*b"HEIF");

    pub const fn new(code: [u8; 4]) -> Self {
        FourCc(u32::from_be_bytes(code))
    }

    pub fn is_bitmap(self) -> bool {
        self == FourCc::ARGB || self == FourCc::GA8
    }

    /// Photos kept in their original encoding inside a RAWD payload.
    pub fn is_stored_image(self) -> bool {
        self == FourCc::JPEG || self == FourCc::HEIF
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("none");
        }
        let bytes = self.0.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            f.write_str(String::from_utf8_lossy(&bytes).trim_end())
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// CoreUI layout values this crate distinguishes.
pub mod layout {
    pub const VECTOR:           u16 = 9;
    pub const ONE_PART_FIXED:   u16 = 10;
    pub const ONE_PART_TILE:    u16 = 11;
    pub const ONE_PART_SCALE:   u16 = 12;
    pub const THREE_PART_H:     u16 = 20;
    pub const THREE_PART_V:     u16 = 23;
    pub const NINE_PART:        u16 = 30;
    pub const MANY_PART:        u16 = 40;
    pub const FILMSTRIP:        u16 = 50;
    pub const DATA:             u16 = 1000;
    pub const COLOR:            u16 = 1009;

    /// Layouts whose bitmap holds several slices or frames.
    pub fn is_multi_part(layout: u16) -> bool {
        (THREE_PART_H..=FILMSTRIP).contains(&layout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiHeader {
    pub version:       u32,
    pub flags:         u32,
    pub width:         u32,
    pub height:        u32,
    pub scale_factor:  u32,
    pub pixel_format:  FourCc,
    pub color_model:   u32,
    pub modtime:       u32,
    pub layout:        u16,
    pub name:          String,
    pub tlv_length:    u32,
    pub bitmap_count:  u32,
    pub reserved:      u32,
    pub payload_size:  u32,
}

impl CsiHeader {
    pub fn new(name: &str, layout: u16, pixel_format: FourCc, scale: u32) -> Self {
        Self {
            version: CSI_VERSION,
            flags: 0,
            width: 0,
            height: 0,
            scale_factor: scale.saturating_mul(100),
            pixel_format,
            color_model: 0,
            modtime: 0,
            layout,
            name: name.to_owned(),
            tlv_length: 0,
            bitmap_count: 0,
            reserved: 0,
            payload_size: 0,
        }
    }

    pub fn read(buf: &[u8]) -> Result<Self, Corruption> {
        if buf.len() < CSI_HEADER_SIZE {
            return Err(truncated("rendition header", CSI_HEADER_SIZE, buf.len()));
        }
        let tag = tag_of(buf);
        if &tag != CSI_TAG {
            return Err(Corruption::BadTag { what: "rendition", expected: *CSI_TAG, found: tag });
        }
        let eof = |_| truncated("rendition header", CSI_HEADER_SIZE, buf.len());
        let mut r = &buf[4..40];
        let version = r.read_u32::<LittleEndian>().map_err(eof)?;
        let flags = r.read_u32::<LittleEndian>().map_err(eof)?;
        let width = r.read_u32::<LittleEndian>().map_err(eof)?;
        let height = r.read_u32::<LittleEndian>().map_err(eof)?;
        let scale_factor = r.read_u32::<LittleEndian>().map_err(eof)?;
        let pixel_format = FourCc(r.read_u32::<LittleEndian>().map_err(eof)?);
        let color_model = r.read_u32::<LittleEndian>().map_err(eof)?;
        let modtime = r.read_u32::<LittleEndian>().map_err(eof)?;
        let layout = r.read_u16::<LittleEndian>().map_err(eof)?;
        let name = fixed_str(&buf[40..40 + NAME_LEN]);
        let mut r = &buf[40 + NAME_LEN..CSI_HEADER_SIZE];
        Ok(Self {
            version,
            flags,
            width,
            height,
            scale_factor,
            pixel_format,
            color_model,
            modtime,
            layout,
            name,
            tlv_length:   r.read_u32::<LittleEndian>().map_err(eof)?,
            bitmap_count: r.read_u32::<LittleEndian>().map_err(eof)?,
            reserved:     r.read_u32::<LittleEndian>().map_err(eof)?,
            payload_size: r.read_u32::<LittleEndian>().map_err(eof)?,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(CSI_TAG)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u32::<LittleEndian>(self.width)?;
        writer.write_u32::<LittleEndian>(self.height)?;
        writer.write_u32::<LittleEndian>(self.scale_factor)?;
        writer.write_u32::<LittleEndian>(self.pixel_format.0)?;
        writer.write_u32::<LittleEndian>(self.color_model)?;
        writer.write_u32::<LittleEndian>(self.modtime)?;
        writer.write_u16::<LittleEndian>(self.layout)?;
        writer.write_u16::<LittleEndian>(0)?;
        write_fixed_str(&mut writer, &self.name, NAME_LEN)?;
        writer.write_u32::<LittleEndian>(self.tlv_length)?;
        writer.write_u32::<LittleEndian>(self.bitmap_count)?;
        writer.write_u32::<LittleEndian>(self.reserved)?;
        writer.write_u32::<LittleEndian>(self.payload_size)?;
        Ok(())
    }

    /// Integer scale (1, 2, 3); 0 when the factor is not set.
    pub fn scale(&self) -> u32 {
        (self.scale_factor + 50) / 100
    }
}

/// A CSI block split into its three regions.
#[derive(Debug, Clone)]
pub struct CsiBlock<'a> {
    pub header:  CsiHeader,
    pub tlv:     &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> CsiBlock<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, DecodeFailure> {
        let header = CsiHeader::read(buf).map_err(DecodeFailure::Header)?;
        let tlv_end = CSI_HEADER_SIZE + header.tlv_length as usize;
        let payload_end = tlv_end + header.payload_size as usize;
        if payload_end > buf.len() {
            return Err(DecodeFailure::Truncated { needed: payload_end, available: buf.len() });
        }
        Ok(Self {
            tlv: &buf[CSI_HEADER_SIZE..tlv_end],
            payload: &buf[tlv_end..payload_end],
            header,
        })
    }

    /// Reassemble a block from a header and its regions, fixing up lengths.
    pub fn assemble(header: &CsiHeader, tlv: &[u8], payload: &[u8]) -> io::Result<Vec<u8>> {
        let mut header = header.clone();
        header.tlv_length = len_u32(tlv.len())?;
        header.payload_size = len_u32(payload.len())?;
        let mut out = Vec::with_capacity(CSI_HEADER_SIZE + tlv.len() + payload.len());
        header.write(&mut out)?;
        out.extend_from_slice(tlv);
        out.extend_from_slice(payload);
        Ok(out)
    }
}

fn len_u32(n: usize) -> io::Result<u32> {
    u32::try_from(n).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "rendition payload exceeds 4 GiB"))
}
