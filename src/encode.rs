//! Representation encoder, the inverse of [`crate::decode`].
//!
//! Encoding takes a CSI header as a template (name, scale, flags, layout for
//! bitmaps) and produces a complete CSI block carrying the new payload.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use thiserror::Error;

use crate::bom::BomError;
use crate::catalog::RenditionType;
use crate::codec::{get_codec, CodecError};
use crate::csi::{layout, CsiBlock, CsiHeader, FourCc};
use crate::decode::{has_signature, CELM_TAG, COLOR_TAG, RAWD_TAG};
use crate::representation::{expected_len, Channels, Color, PixelBuffer, Representation};
use crate::writer::WriteOptions;

const COLOR_VERSION: u32 = 1;
const RAWD_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("{width}x{height} image holds {actual} bytes of pixel data")]
    ImageSize { width: u32, height: u32, actual: usize },
    #[error("payload does not carry a {0} signature")]
    Signature(RenditionType),
    #[error("payload of {0} bytes is too large")]
    TooLarge(usize),
    #[error("rendition names must not be empty")]
    EmptyName,
    #[error("more than {} distinct names", u16::MAX)]
    TooManyNames,
    #[error("JPEG: {0}")]
    Jpeg(String),
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("store: {0}")]
    Store(#[from] BomError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Build a CSI block for `repr`, keeping what `template` says about the
/// rendition's identity.
pub fn encode_rendition(
    template: &CsiHeader,
    tlv:      &[u8],
    repr:     &Representation,
    options:  &WriteOptions,
) -> Result<Vec<u8>, EncodeError> {
    let mut header = template.clone();
    header.modtime = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;

    let payload = match repr {
        Representation::Image(image) => {
            header.width = image.width;
            header.height = image.height;
            header.pixel_format = match image.channels {
                Channels::Rgba8 => FourCc::ARGB,
                Channels::GrayAlpha8 => FourCc::GA8,
            };
            if !is_bitmap_layout(header.layout) {
                header.layout = layout::ONE_PART_SCALE;
            }
            header.bitmap_count = 1;
            encode_bitmap(image, options)?
        }
        Representation::Color(color) => {
            header.width = 0;
            header.height = 0;
            header.pixel_format = FourCc::NONE;
            header.layout = layout::COLOR;
            header.bitmap_count = 0;
            encode_color(color)?
        }
        Representation::Pdf(data) => vector(&mut header, FourCc::PDF, RenditionType::Pdf, data)?,
        Representation::Svg(data) => vector(&mut header, FourCc::SVG, RenditionType::Svg, data)?,
        Representation::Data(data) => {
            header.width = 0;
            header.height = 0;
            header.pixel_format = FourCc::DATA;
            header.layout = layout::DATA;
            header.bitmap_count = 0;
            encode_raw(data)?
        }
    };
    Ok(CsiBlock::assemble(&header, tlv, &payload)?)
}

/// Build a CSI block that keeps an encoded photo (`JPEG`, `HEIF`) verbatim.
pub fn encode_stored_image(
    template: &CsiHeader,
    format:   FourCc,
    width:    u32,
    height:   u32,
    data:     &[u8],
) -> Result<Vec<u8>, EncodeError> {
    let mut header = template.clone();
    header.modtime = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
    header.pixel_format = format;
    header.width = width;
    header.height = height;
    if !is_bitmap_layout(header.layout) {
        header.layout = layout::ONE_PART_SCALE;
    }
    header.bitmap_count = 1;
    Ok(CsiBlock::assemble(&header, &[], &encode_raw(data)?)?)
}

fn is_bitmap_layout(l: u16) -> bool {
    (layout::ONE_PART_FIXED..=layout::ONE_PART_SCALE).contains(&l) || layout::is_multi_part(l)
}

fn vector(
    header: &mut CsiHeader,
    format: FourCc,
    kind:   RenditionType,
    data:   &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if !has_signature(kind, data) {
        return Err(EncodeError::Signature(kind));
    }
    header.width = 0;
    header.height = 0;
    header.pixel_format = format;
    header.layout = layout::VECTOR;
    header.bitmap_count = 0;
    encode_raw(data)
}

fn len_u32(n: usize) -> Result<u32, EncodeError> {
    u32::try_from(n).map_err(|_| EncodeError::TooLarge(n))
}

// ── Payloads ─────────────────────────────────────────────────────────────────

fn encode_raw(data: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(12 + data.len());
    out.write_all(RAWD_TAG)?;
    out.write_u32::<LittleEndian>(RAWD_VERSION)?;
    out.write_u32::<LittleEndian>(len_u32(data.len())?)?;
    out.write_all(data)?;
    Ok(out)
}

fn encode_color(color: &Color) -> Result<Vec<u8>, EncodeError> {
    let components: &[f64] = if color.space.is_gray() {
        &[color.components[0], color.components[3]]
    } else {
        &color.components
    };
    let mut out = Vec::with_capacity(16 + components.len() * 8);
    out.write_all(COLOR_TAG)?;
    out.write_u32::<LittleEndian>(COLOR_VERSION)?;
    out.write_u32::<LittleEndian>(color.space.to_u32())?;
    out.write_u32::<LittleEndian>(components.len() as u32)?;
    for &c in components {
        out.write_f64::<LittleEndian>(c)?;
    }
    Ok(out)
}

fn encode_bitmap(image: &PixelBuffer, options: &WriteOptions) -> Result<Vec<u8>, EncodeError> {
    let size_error = || EncodeError::ImageSize {
        width:  image.width,
        height: image.height,
        actual: image.pixels.len(),
    };
    if image.width == 0 || image.height == 0 {
        return Err(size_error());
    }
    let expected = expected_len(image.width, image.height, image.channels).map_err(|_| size_error())?;
    if image.pixels.len() != expected {
        return Err(size_error());
    }

    let mut raw = Vec::with_capacity(expected);
    match image.channels {
        Channels::Rgba8 => {
            for px in image.pixels.chunks_exact(4) {
                let a = px[3];
                raw.extend_from_slice(&[premultiply(px[2], a), premultiply(px[1], a), premultiply(px[0], a), a]);
            }
        }
        Channels::GrayAlpha8 => {
            for px in image.pixels.chunks_exact(2) {
                raw.extend_from_slice(&[premultiply(px[0], px[1]), px[1]]);
            }
        }
    }

    let codec = get_codec(options.compression)?;
    let cell = codec.compress(&raw, options.level)?;
    let mut out = Vec::with_capacity(16 + cell.len());
    out.write_all(CELM_TAG)?;
    out.write_u32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(codec.compression() as u32)?;
    out.write_u32::<LittleEndian>(len_u32(cell.len())?)?;
    out.write_all(&cell)?;
    Ok(out)
}

pub(crate) fn premultiply(c: u8, a: u8) -> u8 {
    ((c as u32 * a as u32 + 127) / 255) as u8
}
