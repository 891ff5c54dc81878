//! Building catalogs from scratch.
//!
//! [`CatalogWriter`] collects renditions in memory and serialises a complete
//! store on [`CatalogWriter::finish`]: `CARHEADER`, `KEYFORMAT`, a
//! `RENDITIONS` tree in insertion order and a `FACETKEYS` tree with one
//! facet per distinct name.  All variants of one name share an identifier.

use std::collections::HashMap;
use std::path::Path;

use crate::bom::tree::{write_tree, TreeEntry};
use crate::bom::BomWriter;
use crate::car::key::{ELEMENT_IMAGE, PART_ICON, PART_IMAGE};
use crate::car::{
    Attribute, CarHeader, FacetToken, Idiom, KeyFormat, RenditionKey, VAR_CAR_HEADER,
    VAR_FACET_KEYS, VAR_KEY_FORMAT, VAR_RENDITIONS,
};
use crate::codec::{Compression, DEFAULT_COMPRESSION_LEVEL};
use crate::csi::{layout, CsiHeader, FourCc};
use crate::encode::{encode_rendition, encode_stored_image, EncodeError};
use crate::error::{Error, Result};
use crate::representation::{Color, PixelBuffer, Representation};

// ── Options ──────────────────────────────────────────────────────────────────

/// Settings shared by the writer and the mutation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Cell compression for bitmaps written from now on.
    pub compression: Compression,
    pub level:       u32,
    /// Re-open rewritten bytes and compare untouched renditions before
    /// anything reaches disk.
    pub verify:      bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Zip,
            level:       DEFAULT_COMPRESSION_LEVEL,
            verify:      true,
        }
    }
}

/// Device variant of a named asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    pub scale: u32,
    pub idiom: Idiom,
}

impl Default for Variant {
    fn default() -> Self {
        Self { scale: 1, idiom: Idiom::Universal }
    }
}

impl Variant {
    pub fn scaled(scale: u32) -> Self {
        Self { scale, ..Self::default() }
    }
}

/// Key format of catalogs this crate creates.
pub fn default_key_format() -> KeyFormat {
    KeyFormat::new(
        [
            Attribute::Element,
            Attribute::Part,
            Attribute::Size,
            Attribute::Direction,
            Attribute::Value,
            Attribute::Appearance,
            Attribute::Dimension1,
            Attribute::Dimension2,
            Attribute::State,
            Attribute::Layer,
            Attribute::Scale,
            Attribute::Idiom,
            Attribute::Subtype,
            Attribute::Identifier,
            Attribute::DisplayGamut,
            Attribute::DeploymentTarget,
        ]
        .iter()
        .map(|a| a.id())
        .collect(),
    )
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct CatalogWriter {
    pub header: CarHeader,
    key_format: KeyFormat,
    options:    WriteOptions,
    /// (facet name, identifier) in first-use order.
    facets:     Vec<(String, u16)>,
    facet_ids:  HashMap<String, u16>,
    renditions: Vec<(RenditionKey, Vec<u8>)>,
    variables:  Vec<(String, Vec<u8>)>,
}

impl Default for CatalogWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogWriter {
    pub fn new() -> Self {
        Self::with_options(WriteOptions::default())
    }

    pub fn with_options(options: WriteOptions) -> Self {
        Self {
            header: CarHeader::new(),
            key_format: default_key_format(),
            options,
            facets: Vec::new(),
            facet_ids: HashMap::new(),
            renditions: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.renditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renditions.is_empty()
    }

    fn identifier(&mut self, name: &str) -> std::result::Result<u16, EncodeError> {
        if name.is_empty() {
            return Err(EncodeError::EmptyName);
        }
        if let Some(&id) = self.facet_ids.get(name) {
            return Ok(id);
        }
        let id = u16::try_from(self.facets.len() + 1).map_err(|_| EncodeError::TooManyNames)?;
        self.facets.push((name.to_owned(), id));
        self.facet_ids.insert(name.to_owned(), id);
        Ok(id)
    }

    fn key(
        &mut self,
        name:    &str,
        part:    u16,
        variant: Variant,
        extra:   &[(Attribute, u16)],
    ) -> std::result::Result<RenditionKey, EncodeError> {
        let id = self.identifier(name)?;
        let mut values = vec![
            (Attribute::Element, ELEMENT_IMAGE),
            (Attribute::Part, part),
            (Attribute::Scale, variant.scale as u16),
            (Attribute::Idiom, variant.idiom.to_u16()),
            (Attribute::Identifier, id),
        ];
        values.extend_from_slice(extra);
        Ok(RenditionKey::from_attributes(&self.key_format, &values))
    }

    fn push(
        &mut self,
        name:     &str,
        part:     u16,
        variant:  Variant,
        template: CsiHeader,
        repr:     &Representation,
    ) -> std::result::Result<(), EncodeError> {
        let key = self.key(name, part, variant, &[])?;
        let block = encode_rendition(&template, &[], repr, &self.options)?;
        tracing::trace!(name, kind = %repr.rendition_type(), bytes = block.len(), "added rendition");
        self.renditions.push((key, block));
        Ok(())
    }

    // ── Adding renditions ────────────────────────────────────────────────────

    pub fn add_image(&mut self, name: &str, variant: Variant, image: PixelBuffer) -> std::result::Result<(), EncodeError> {
        let template = CsiHeader::new(&bitmap_file_name(name, variant, "png"), layout::ONE_PART_SCALE, FourCc::ARGB, variant.scale);
        self.push(name, PART_IMAGE, variant, template, &Representation::Image(image))
    }

    pub fn add_icon(&mut self, name: &str, variant: Variant, image: PixelBuffer) -> std::result::Result<(), EncodeError> {
        let template = CsiHeader::new(&bitmap_file_name(name, variant, "png"), layout::ONE_PART_SCALE, FourCc::ARGB, variant.scale);
        self.push(name, PART_ICON, variant, template, &Representation::Image(image))
    }

    /// A sliced or multi-frame bitmap; `slices` is one of the multi-part
    /// layouts (three-part, nine-part, many-part, filmstrip).
    pub fn add_image_set(
        &mut self,
        name:    &str,
        variant: Variant,
        slices:  u16,
        image:   PixelBuffer,
    ) -> std::result::Result<(), EncodeError> {
        let slices = if layout::is_multi_part(slices) { slices } else { layout::NINE_PART };
        let template = CsiHeader::new(&bitmap_file_name(name, variant, "png"), slices, FourCc::ARGB, variant.scale);
        self.push(name, PART_IMAGE, variant, template, &Representation::Image(image))
    }

    /// A photo kept in its JPEG encoding; the data must decode.
    pub fn add_jpeg(&mut self, name: &str, variant: Variant, data: Vec<u8>) -> std::result::Result<(), EncodeError> {
        let image = image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg)
            .map_err(|e| EncodeError::Jpeg(e.to_string()))?;
        let file_name = bitmap_file_name(name, variant, "jpg");
        let template = CsiHeader::new(&file_name, layout::ONE_PART_SCALE, FourCc::JPEG, variant.scale);
        let block = encode_stored_image(&template, FourCc::JPEG, image.width(), image.height(), &data)?;
        let key = self.key(name, PART_IMAGE, variant, &[])?;
        self.renditions.push((key, block));
        Ok(())
    }

    pub fn add_color(&mut self, name: &str, color: Color) -> std::result::Result<(), EncodeError> {
        let template = CsiHeader::new(name, layout::COLOR, FourCc::NONE, 1);
        self.push(name, PART_IMAGE, Variant::default(), template, &Representation::Color(color))
    }

    pub fn add_pdf(&mut self, name: &str, data: Vec<u8>) -> std::result::Result<(), EncodeError> {
        let template = CsiHeader::new(&format!("{name}.pdf"), layout::VECTOR, FourCc::PDF, 1);
        self.push(name, PART_IMAGE, Variant::default(), template, &Representation::Pdf(data))
    }

    pub fn add_svg(&mut self, name: &str, data: Vec<u8>) -> std::result::Result<(), EncodeError> {
        let template = CsiHeader::new(&format!("{name}.svg"), layout::VECTOR, FourCc::SVG, 1);
        self.push(name, PART_IMAGE, Variant::default(), template, &Representation::Svg(data))
    }

    pub fn add_data(&mut self, name: &str, data: Vec<u8>) -> std::result::Result<(), EncodeError> {
        let template = CsiHeader::new(name, layout::DATA, FourCc::DATA, 1);
        self.push(name, PART_IMAGE, Variant::default(), template, &Representation::Data(data))
    }

    /// Store `block` verbatim as the value of a new entry.  The block is not
    /// checked; this is how foreign or damaged renditions get into a catalog.
    pub fn add_raw(
        &mut self,
        name:       &str,
        attributes: &[(Attribute, u16)],
        block:      Vec<u8>,
    ) -> std::result::Result<(), EncodeError> {
        let key = self.key(name, PART_IMAGE, Variant::default(), attributes)?;
        self.renditions.push((key, block));
        Ok(())
    }

    /// Add an opaque variable that is carried alongside the catalog ones.
    pub fn add_variable(&mut self, name: &str, data: Vec<u8>) {
        self.variables.push((name.to_owned(), data));
    }

    // ── Output ───────────────────────────────────────────────────────────────

    pub fn finish(mut self) -> std::result::Result<Vec<u8>, EncodeError> {
        let mut bom = BomWriter::new();

        self.header.rendition_count = self.renditions.len() as u32;
        let header_block = bom.push_block(self.header.to_bytes());
        let format_block = bom.push_block(self.key_format.to_bytes());

        let mut entries = Vec::with_capacity(self.renditions.len());
        for (key, block) in self.renditions {
            let key_block = bom.push_block(key.to_bytes());
            let value_block = bom.push_block(block);
            entries.push(TreeEntry { key_block, value_block });
        }
        let renditions = write_tree(&mut bom, None, &entries)?;

        let mut facets = Vec::with_capacity(self.facets.len());
        for (name, id) in &self.facets {
            let token = FacetToken::new(&[
                (Attribute::Element, ELEMENT_IMAGE),
                (Attribute::Part, PART_IMAGE),
                (Attribute::Identifier, *id),
            ]);
            let key_block = bom.push_block(name.clone().into_bytes());
            let value_block = bom.push_block(token.to_bytes());
            facets.push(TreeEntry { key_block, value_block });
        }
        let facet_keys = write_tree(&mut bom, None, &facets)?;

        bom.set_variable(VAR_CAR_HEADER, header_block);
        bom.set_variable(VAR_RENDITIONS, renditions);
        bom.set_variable(VAR_FACET_KEYS, facet_keys);
        bom.set_variable(VAR_KEY_FORMAT, format_block);
        for (name, data) in self.variables {
            let block = bom.push_block(data);
            bom.set_variable(&name, block);
        }

        let bytes = bom.finish()?;
        tracing::debug!(renditions = entries.len(), facets = facets.len(), bytes = bytes.len(), "wrote catalog");
        Ok(bytes)
    }

    /// Finish and commit the catalog to `path` atomically.
    pub fn write_to<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self
            .finish()
            .map_err(|e| Error::mutation(&path.display().to_string(), e))?;
        crate::mutate::commit(path, &bytes)
    }
}

fn bitmap_file_name(name: &str, variant: Variant, ext: &str) -> String {
    if variant.scale > 1 {
        format!("{name}@{}x.{ext}", variant.scale)
    } else {
        format!("{name}.{ext}")
    }
}
