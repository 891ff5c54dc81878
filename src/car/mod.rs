//! CoreUI variables carried inside the BOM store.
//!
//! All integers at this layer are little-endian.

pub mod header;
pub mod key;

pub use header::{CarHeader, KeyFormat};
pub use key::{Attribute, FacetToken, Idiom, RenditionKey};

/// Variable holding the [`CarHeader`].
pub const VAR_CAR_HEADER: &str = "CARHEADER";
/// Variable holding the [`KeyFormat`].
pub const VAR_KEY_FORMAT: &str = "KEYFORMAT";
/// Tree of rendition key → CSI block.
pub const VAR_RENDITIONS: &str = "RENDITIONS";
/// Tree of facet name → key token.
pub const VAR_FACET_KEYS: &str = "FACETKEYS";
