//! Decoded, archive-independent forms of rendition payloads.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::RenditionType;
use crate::error::{DecodeFailure, Error, Result};

// ── Pixel buffers ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Channels {
    /// Red, green, blue, alpha; 8 bits each.
    Rgba8,
    /// Gray, alpha; 8 bits each.
    GrayAlpha8,
}

impl Channels {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Channels::Rgba8 => 4,
            Channels::GrayAlpha8 => 2,
        }
    }
}

/// Raster image with straight (non-premultiplied) alpha, rows packed
/// without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width:    u32,
    pub height:   u32,
    pub channels: Channels,
    pub pixels:   Vec<u8>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, channels: Channels, pixels: Vec<u8>) -> std::result::Result<Self, DecodeFailure> {
        if width == 0 || height == 0 {
            return Err(DecodeFailure::EmptyImage);
        }
        let expected = expected_len(width, height, channels)?;
        if pixels.len() != expected {
            return Err(DecodeFailure::PixelDataSize { width, height, expected, actual: pixels.len() });
        }
        Ok(Self { width, height, channels, pixels })
    }

    /// An image filled with one RGBA colour.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat(width as usize * height as usize);
        Self { width, height, channels: Channels::Rgba8, pixels }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.channels.bytes_per_pixel()
    }

    pub fn from_png(bytes: &[u8]) -> std::result::Result<Self, DecodeFailure> {
        let mut decoder = png::Decoder::new(bytes);
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder.read_info().map_err(|e| DecodeFailure::Png(e.to_string()))?;
        let mut buf = vec![0u8; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).map_err(|e| DecodeFailure::Png(e.to_string()))?;
        buf.truncate(info.buffer_size());

        let (channels, pixels) = match info.color_type {
            png::ColorType::Rgba => (Channels::Rgba8, buf),
            png::ColorType::GrayscaleAlpha => (Channels::GrayAlpha8, buf),
            png::ColorType::Rgb => (
                Channels::Rgba8,
                buf.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 0xFF]).collect(),
            ),
            png::ColorType::Grayscale => (
                Channels::GrayAlpha8,
                buf.iter().flat_map(|&g| [g, 0xFF]).collect(),
            ),
            png::ColorType::Indexed => {
                return Err(DecodeFailure::Png("palette image was not expanded".into()));
            }
        };
        Self::new(info.width, info.height, channels, pixels)
    }

    /// Load a PNG file, reporting failures against its path.
    pub fn read_png(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::from_png(&bytes).map_err(|reason| Error::decode(&path.display().to_string(), reason))
    }

    pub fn to_png(&self) -> std::result::Result<Vec<u8>, png::EncodingError> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(match self.channels {
                Channels::Rgba8 => png::ColorType::Rgba,
                Channels::GrayAlpha8 => png::ColorType::GrayscaleAlpha,
            });
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
            writer.finish()?;
        }
        Ok(out)
    }
}

pub(crate) fn expected_len(width: u32, height: u32, channels: Channels) -> std::result::Result<usize, DecodeFailure> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels.bytes_per_pixel()))
        .ok_or(DecodeFailure::PixelDataSize { width, height, expected: usize::MAX, actual: 0 })
}

// ── Colours ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorSpace {
    Srgb,
    GrayGamma22,
    DisplayP3,
    ExtendedSrgb,
    ExtendedLinearSrgb,
    ExtendedGray,
    Unknown(u32),
}

impl ColorSpace {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => ColorSpace::Srgb,
            1 => ColorSpace::GrayGamma22,
            2 => ColorSpace::DisplayP3,
            3 => ColorSpace::ExtendedSrgb,
            4 => ColorSpace::ExtendedLinearSrgb,
            5 => ColorSpace::ExtendedGray,
            other => ColorSpace::Unknown(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            ColorSpace::Srgb => 0,
            ColorSpace::GrayGamma22 => 1,
            ColorSpace::DisplayP3 => 2,
            ColorSpace::ExtendedSrgb => 3,
            ColorSpace::ExtendedLinearSrgb => 4,
            ColorSpace::ExtendedGray => 5,
            ColorSpace::Unknown(v) => v,
        }
    }

    pub fn is_gray(self) -> bool {
        matches!(self, ColorSpace::GrayGamma22 | ColorSpace::ExtendedGray)
    }
}

/// Flat colour value; gray spaces repeat the gray level in the first three
/// components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Color {
    pub space:      ColorSpace,
    pub components: [f64; 4],
}

impl Color {
    pub fn srgb(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self { space: ColorSpace::Srgb, components: [red, green, blue, alpha] }
    }

    pub fn gray(level: f64, alpha: f64) -> Self {
        Self { space: ColorSpace::GrayGamma22, components: [level, level, level, alpha] }
    }

    pub fn alpha(&self) -> f64 {
        self.components[3]
    }
}

// ── Representation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    Image(PixelBuffer),
    Svg(Vec<u8>),
    Pdf(Vec<u8>),
    Color(Color),
    Data(Vec<u8>),
}

impl Representation {
    /// The rendition type this representation is naturally stored as.
    pub fn rendition_type(&self) -> RenditionType {
        match self {
            Representation::Image(_) => RenditionType::Image,
            Representation::Svg(_) => RenditionType::Svg,
            Representation::Pdf(_) => RenditionType::Pdf,
            Representation::Color(_) => RenditionType::Color,
            Representation::Data(_) => RenditionType::Other,
        }
    }

    /// Whether a rendition of type `target` can hold this representation.
    pub fn fits(&self, target: RenditionType) -> bool {
        match self {
            Representation::Image(_) => target.is_bitmap(),
            _ => self.rendition_type() == target,
        }
    }
}
