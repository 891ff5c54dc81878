pub mod bom;
pub mod car;
pub mod csi;
pub mod codec;
pub mod error;
pub mod archive;
pub mod catalog;
pub mod representation;
pub mod decode;
pub mod encode;
pub mod writer;
pub mod mutate;
pub mod extract;

pub use archive::Archive;
pub use catalog::{enumerate, Rendition, RenditionCollection, RenditionType};
pub use codec::Compression;
pub use decode::decode;
pub use error::{Corruption, DecodeFailure, Error, MutationFailure, Result};
pub use extract::{extract_all, extract_one};
pub use mutate::{commit, remove, replace, Editor};
pub use representation::{Channels, Color, ColorSpace, PixelBuffer, Representation};
pub use writer::{CatalogWriter, Variant, WriteOptions};
