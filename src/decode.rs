//! Representation decoder.
//!
//! Rendition data follows the 184-byte CSI header and its TLVs.  Three
//! payload layouts exist; their tags are four-character codes stored
//! little-endian, so they read byte-reversed on disk:
//!
//! ```text
//! CELM  "MLEC"  u32 flags, u32 compression, u32 length, cell bytes
//! COLR  "RLOC"  u32 version, u32 colour space, u32 count, count × f64
//! RAWD  "DWAR"  u32 version, u32 length, bytes
//! ```
//!
//! Photos (`JPEG`, `HEIF`) sit in a RAWD payload in their own encoding.
//! Bitmap cells hold premultiplied pixels (`ARGB` as B,G,R,A bytes; `GA8 `
//! as gray, alpha), rows possibly padded.  Decoding is a pure function of
//! the rendition's bytes; it holds no state and can run on many threads
//! against one shared [`Archive`].

use byteorder::{LittleEndian, ReadBytesExt};

use crate::archive::Archive;
use crate::car::header::tag_of;
use crate::catalog::{Rendition, RenditionType};
use crate::codec::{get_codec, CodecError, Compression};
use crate::csi::{CsiBlock, FourCc};
use crate::error::{DecodeFailure, Error, Result};
use crate::representation::{Channels, Color, ColorSpace, PixelBuffer, Representation};

pub const CELM_TAG: &[u8; 4] = b"MLEC";
pub const COLOR_TAG: &[u8; 4] = b"RLOC";
pub const RAWD_TAG: &[u8; 4] = b"DWAR";

const CELM_HEADER_SIZE: usize = 16;
const COLOR_HEADER_SIZE: usize = 16;
const RAWD_HEADER_SIZE: usize = 12;

/// Decode `rendition`, whose payload range points into `archive`.
pub fn decode(archive: &Archive, rendition: &Rendition) -> Result<Representation> {
    let block = archive
        .slice(rendition.payload.clone())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::decode(&rendition.name, DecodeFailure::NoPayload))?;
    decode_block(rendition.kind, block).map_err(|reason| Error::decode(&rendition.name, reason))
}

/// Decode a complete CSI block as `kind`.
pub fn decode_block(kind: RenditionType, block: &[u8]) -> std::result::Result<Representation, DecodeFailure> {
    let csi = CsiBlock::parse(block)?;
    match kind {
        RenditionType::Image | RenditionType::Icon | RenditionType::ImageSet => match csi.header.pixel_format {
            FourCc::JPEG => decode_jpeg(csi.payload).map(Representation::Image),
            _ => decode_bitmap(&csi).map(Representation::Image),
        },
        RenditionType::Color => decode_color(csi.payload).map(Representation::Color),
        RenditionType::Pdf => {
            let data = decode_raw(csi.payload)?;
            check_signature(RenditionType::Pdf, data)?;
            Ok(Representation::Pdf(data.to_vec()))
        }
        RenditionType::Svg => {
            let data = decode_raw(csi.payload)?;
            check_signature(RenditionType::Svg, data)?;
            Ok(Representation::Svg(data.to_vec()))
        }
        RenditionType::Other => {
            if tag_of(csi.payload) == *RAWD_TAG {
                decode_raw(csi.payload).map(|d| Representation::Data(d.to_vec()))
            } else {
                Err(DecodeFailure::NoPayload)
            }
        }
    }
}

// ── Signatures ───────────────────────────────────────────────────────────────

pub(crate) fn has_signature(kind: RenditionType, data: &[u8]) -> bool {
    match kind {
        RenditionType::Pdf => data.starts_with(b"%PDF"),
        RenditionType::Svg => {
            let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
            let start = data.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(data.len());
            let data = &data[start..];
            data.starts_with(b"<?xml") || data.starts_with(b"<svg")
        }
        _ => true,
    }
}

fn check_signature(kind: RenditionType, data: &[u8]) -> std::result::Result<(), DecodeFailure> {
    if has_signature(kind, data) {
        Ok(())
    } else {
        Err(DecodeFailure::BadSignature(kind))
    }
}

// ── Payloads ─────────────────────────────────────────────────────────────────

fn expect_tag(payload: &[u8], expected: &[u8; 4]) -> std::result::Result<(), DecodeFailure> {
    if payload.len() < 4 {
        return Err(DecodeFailure::Truncated { needed: 4, available: payload.len() });
    }
    let found = tag_of(payload);
    if found != *expected {
        return Err(DecodeFailure::BadTag { expected: *expected, found });
    }
    Ok(())
}

fn short(needed: usize, payload: &[u8]) -> DecodeFailure {
    DecodeFailure::Truncated { needed, available: payload.len() }
}

fn decode_raw(payload: &[u8]) -> std::result::Result<&[u8], DecodeFailure> {
    expect_tag(payload, RAWD_TAG)?;
    if payload.len() < RAWD_HEADER_SIZE {
        return Err(short(RAWD_HEADER_SIZE, payload));
    }
    let mut r = &payload[4..RAWD_HEADER_SIZE];
    let _version = r.read_u32::<LittleEndian>().map_err(|_| short(RAWD_HEADER_SIZE, payload))?;
    let length = r.read_u32::<LittleEndian>().map_err(|_| short(RAWD_HEADER_SIZE, payload))? as usize;
    let end = RAWD_HEADER_SIZE
        .checked_add(length)
        .ok_or(DecodeFailure::Truncated { needed: usize::MAX, available: payload.len() })?;
    payload.get(RAWD_HEADER_SIZE..end).ok_or_else(|| short(end, payload))
}

/// The encoded bytes of a stored photo rendition.
pub(crate) fn stored_image(block: &[u8]) -> std::result::Result<&[u8], DecodeFailure> {
    let csi = CsiBlock::parse(block)?;
    if !csi.header.pixel_format.is_stored_image() {
        return Err(DecodeFailure::UnsupportedPixelFormat(csi.header.pixel_format));
    }
    decode_raw(csi.payload)
}

fn decode_jpeg(payload: &[u8]) -> std::result::Result<PixelBuffer, DecodeFailure> {
    let data = decode_raw(payload)?;
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| DecodeFailure::Jpeg(e.to_string()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    PixelBuffer::new(width, height, Channels::Rgba8, image.into_raw())
}

fn decode_color(payload: &[u8]) -> std::result::Result<Color, DecodeFailure> {
    expect_tag(payload, COLOR_TAG)?;
    if payload.len() < COLOR_HEADER_SIZE {
        return Err(short(COLOR_HEADER_SIZE, payload));
    }
    let mut r = &payload[4..];
    let eof = |_| short(COLOR_HEADER_SIZE, payload);
    let _version = r.read_u32::<LittleEndian>().map_err(eof)?;
    let space = ColorSpace::from_u32(r.read_u32::<LittleEndian>().map_err(eof)?);
    let count = r.read_u32::<LittleEndian>().map_err(eof)?;
    if !(1..=4).contains(&count) {
        return Err(DecodeFailure::ColorComponents(count));
    }
    let needed = COLOR_HEADER_SIZE + count as usize * 8;
    let mut values = [0f64; 4];
    for value in values.iter_mut().take(count as usize) {
        *value = r.read_f64::<LittleEndian>().map_err(|_| short(needed, payload))?;
    }
    let components = match count {
        1 => [values[0], values[0], values[0], 1.0],
        2 => [values[0], values[0], values[0], values[1]],
        3 => [values[0], values[1], values[2], 1.0],
        _ => values,
    };
    Ok(Color { space, components })
}

fn decode_bitmap(csi: &CsiBlock<'_>) -> std::result::Result<PixelBuffer, DecodeFailure> {
    let header = &csi.header;
    let channels = match header.pixel_format {
        FourCc::ARGB => Channels::Rgba8,
        FourCc::GA8 => Channels::GrayAlpha8,
        other => return Err(DecodeFailure::UnsupportedPixelFormat(other)),
    };
    let (width, height) = (header.width, header.height);
    if width == 0 || height == 0 {
        return Err(DecodeFailure::EmptyImage);
    }
    let packed = crate::representation::expected_len(width, height, channels)?;

    let payload = csi.payload;
    expect_tag(payload, CELM_TAG)?;
    if payload.len() < CELM_HEADER_SIZE {
        return Err(short(CELM_HEADER_SIZE, payload));
    }
    let mut r = &payload[4..CELM_HEADER_SIZE];
    let eof = |_| short(CELM_HEADER_SIZE, payload);
    let _flags = r.read_u32::<LittleEndian>().map_err(eof)?;
    let compression_id = r.read_u32::<LittleEndian>().map_err(eof)?;
    let length = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
    let end = CELM_HEADER_SIZE.saturating_add(length);
    let cell = payload.get(CELM_HEADER_SIZE..end).ok_or_else(|| short(end, payload))?;

    let compression =
        Compression::from_u32(compression_id).ok_or(DecodeFailure::UnknownCompression(compression_id))?;
    let codec = get_codec(compression).map_err(|e| match e {
        CodecError::UnavailableCodec { compression } => DecodeFailure::UnsupportedCompression(compression),
        other => DecodeFailure::Decompression(other.to_string()),
    })?;
    // Rows may be padded, but never beyond double width.
    let limit = packed.saturating_mul(2).saturating_add(64);
    let raw = codec
        .decompress(cell, limit)
        .map_err(|e| DecodeFailure::Decompression(e.to_string()))?;

    let size_error = DecodeFailure::PixelDataSize { width, height, expected: packed, actual: raw.len() };
    let h = height as usize;
    if raw.len() % h != 0 {
        return Err(size_error);
    }
    let stride = raw.len() / h;
    let row = packed / h;
    if stride < row {
        return Err(size_error);
    }

    let mut pixels = Vec::with_capacity(packed);
    for line in raw.chunks_exact(stride) {
        let line = &line[..row];
        match channels {
            Channels::Rgba8 => {
                for px in line.chunks_exact(4) {
                    let (b, g, r, a) = (px[0], px[1], px[2], px[3]);
                    pixels.extend_from_slice(&[unpremultiply(r, a), unpremultiply(g, a), unpremultiply(b, a), a]);
                }
            }
            Channels::GrayAlpha8 => {
                for px in line.chunks_exact(2) {
                    pixels.extend_from_slice(&[unpremultiply(px[0], px[1]), px[1]]);
                }
            }
        }
    }
    PixelBuffer::new(width, height, channels, pixels)
}

/// Straight-alpha channel value; fully transparent pixels keep what was stored.
pub(crate) fn unpremultiply(c: u8, a: u8) -> u8 {
    if a == 0 || a == 255 {
        return c;
    }
    let v = (c as u32 * 255 + a as u32 / 2) / a as u32;
    v.min(255) as u8
}
