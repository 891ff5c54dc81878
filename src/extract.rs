//! Writing renditions out as standalone files.
//!
//! File names are `<name>[~idiom][@Nx].<ext>` with the name sanitised for
//! the filesystem.  Every rendition is rendered first, then names are
//! planned for the whole run, then files are written.  A name already taken
//! (compared case-insensitively) gets the rendition type appended, then a
//! counter.  Planning is sequential, so the result is the same whether or
//! not rendering and writing run in parallel.
//!
//! A rendition that cannot be decoded is still written: its raw payload
//! goes to a `.bin` file and a warning is logged.  Stored photos are
//! written in their own encoding.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::archive::Archive;
use crate::car::Idiom;
use crate::catalog::{Rendition, RenditionCollection, RenditionType};
use crate::csi::FourCc;
use crate::decode::{decode, stored_image};
use crate::error::{DecodeFailure, Error, Result};
use crate::representation::{ColorSpace, Representation};

const RAW_EXTENSION: &str = "bin";

pub fn extension(kind: RenditionType) -> &'static str {
    match kind {
        RenditionType::Image | RenditionType::Icon | RenditionType::ImageSet => "png",
        RenditionType::Pdf => "pdf",
        RenditionType::Svg => "svg",
        RenditionType::Color => "json",
        RenditionType::Other => RAW_EXTENSION,
    }
}

fn stored_extension(format: FourCc) -> Option<&'static str> {
    match format {
        FourCc::JPEG => Some("jpg"),
        FourCc::HEIF => Some("heic"),
        _ => None,
    }
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if out.starts_with('.') {
        out.replace_range(..1, "_");
    }
    if out.trim().is_empty() {
        out = "unnamed".to_owned();
    }
    out
}

/// File name stem for `r`, without any disambiguation.
pub fn base_name(r: &Rendition) -> String {
    let mut stem = sanitize(&r.name);
    if r.idiom != Idiom::Universal {
        stem.push('~');
        stem.push_str(&r.idiom.to_string());
    }
    if r.scale > 1 {
        stem.push_str(&format!("@{}x", r.scale));
    }
    stem
}

/// Plan one collision-free file name per `(rendition, extension)`, in order.
pub fn plan_names(renditions: &[(&Rendition, &str)]) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut names = Vec::with_capacity(renditions.len());
    for &(r, ext) in renditions {
        let base = base_name(r);
        let typed = format!("{base}-{}", r.kind.slug());
        let mut candidates = [format!("{base}.{ext}"), format!("{typed}.{ext}")]
            .into_iter()
            .chain((2u32..).map(|n| format!("{typed}-{n}.{ext}")));
        // The counter chain never ends, so a free name is always found.
        let name = candidates.find(|c| taken.insert(c.to_lowercase())).unwrap_or(base);
        names.push(name);
    }
    names
}

// ── Rendering ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ColorDocument<'a> {
    name:        &'a str,
    color_space: ColorSpace,
    red:         f64,
    green:       f64,
    blue:        f64,
    alpha:       f64,
}

/// RAWD data when the payload has it, else the whole CSI block.
fn raw_payload(archive: &Archive, r: &Rendition) -> Vec<u8> {
    match decode(archive, r) {
        Ok(Representation::Data(data)) => data,
        _ => archive.slice(r.payload.clone()).unwrap_or_default().to_vec(),
    }
}

/// Bytes of the file `r` extracts to, in the format [`extension`] names.
pub fn render(archive: &Archive, r: &Rendition) -> Result<Vec<u8>> {
    if r.kind == RenditionType::Other {
        return Ok(raw_payload(archive, r));
    }
    match decode(archive, r)? {
        Representation::Image(image) => image
            .to_png()
            .map_err(|e| Error::decode(&r.name, DecodeFailure::Png(e.to_string()))),
        Representation::Pdf(data) | Representation::Svg(data) | Representation::Data(data) => Ok(data),
        Representation::Color(color) => {
            let [red, green, blue, alpha] = color.components;
            let doc = ColorDocument { name: &r.name, color_space: color.space, red, green, blue, alpha };
            let mut json = serde_json::to_vec_pretty(&doc)
                .map_err(|e| Error::io(format!("{}.json", r.name), e.into()))?;
            json.push(b'\n');
            Ok(json)
        }
    }
}

/// Bytes and extension of the file `r` is written to.  Never fails: a
/// rendition that does not decode falls back to its raw payload.
pub fn render_or_raw(archive: &Archive, r: &Rendition) -> (Vec<u8>, &'static str) {
    if let Some(ext) = stored_extension(r.pixel_format).filter(|_| r.kind.is_bitmap()) {
        if let Some(data) = archive.slice(r.payload.clone()).and_then(|b| stored_image(b).ok()) {
            return (data.to_vec(), ext);
        }
    }
    match render(archive, r) {
        Ok(bytes) => (bytes, extension(r.kind)),
        Err(e) => {
            tracing::warn!(name = %r.name, kind = %r.kind, error = %e, "writing raw payload of undecodable rendition");
            (raw_payload(archive, r), RAW_EXTENSION)
        }
    }
}

fn write_file(r: &Rendition, path: PathBuf, bytes: &[u8]) -> Result<PathBuf> {
    fs::write(&path, bytes).map_err(|e| Error::io(&path, e))?;
    tracing::debug!(name = %r.name, path = %path.display(), "extracted rendition");
    Ok(path)
}

/// Run `f` over `items`, in parallel with the `parallel` feature.  Output
/// order follows input order either way.
fn map_all<T, U, F>(items: Vec<T>, f: F) -> Vec<U>
where
    T: Send,
    U: Send,
    F: Fn(T) -> U + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        items.into_par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.into_iter().map(f).collect()
    }
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Extract a single rendition into `dir`, creating it if needed.
pub fn extract_one(archive: &Archive, r: &Rendition, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let (bytes, ext) = render_or_raw(archive, r);
    let name = plan_names(&[(r, ext)]).pop().unwrap_or_else(|| base_name(r));
    write_file(r, dir.join(name), &bytes)
}

/// Extract every rendition of `collection` into `dir`.
///
/// Writes exactly one file per rendition and returns the paths in archive
/// traversal order.  Only filesystem errors stop the run; files already
/// written stay in place.
pub fn extract_all(archive: &Archive, collection: &RenditionCollection, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let renditions = collection.in_traversal_order();
    let rendered = map_all(renditions.clone(), |r| render_or_raw(archive, r));

    let planned: Vec<(&Rendition, &str)> = renditions
        .iter()
        .copied()
        .zip(rendered.iter().map(|(_, ext)| *ext))
        .collect();
    let jobs: Vec<(&Rendition, PathBuf, Vec<u8>)> = renditions
        .iter()
        .copied()
        .zip(plan_names(&planned))
        .zip(rendered)
        .map(|((r, name), (bytes, _))| (r, dir.join(name), bytes))
        .collect();

    let paths = map_all(jobs, |(r, path, bytes)| write_file(r, path, &bytes))
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(count = paths.len(), dir = %dir.display(), "extracted catalog");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::RenditionKey;
    use crate::csi::FourCc;

    fn rendition(name: &str, kind: RenditionType, scale: u32, idiom: Idiom) -> Rendition {
        Rendition {
            name: name.to_owned(),
            kind,
            key: RenditionKey::default(),
            file_name: String::new(),
            scale,
            idiom,
            width: 0,
            height: 0,
            layout: 0,
            pixel_format: FourCc::NONE,
            position: 0,
            key_block: 0,
            value_block: 0,
            payload: 0..0,
        }
    }

    #[test]
    fn names_carry_idiom_and_scale() {
        let r = rendition("AppIcon", RenditionType::Icon, 2, Idiom::Phone);
        assert_eq!(plan_names(&[(&r, "png")]), vec!["AppIcon~iphone@2x.png"]);
    }

    #[test]
    fn collisions_get_type_then_counter() {
        let a = rendition("x", RenditionType::Image, 1, Idiom::Universal);
        let b = rendition("X", RenditionType::Image, 1, Idiom::Universal);
        let c = rendition("x", RenditionType::Image, 1, Idiom::Universal);
        let d = rendition("x", RenditionType::Color, 1, Idiom::Universal);
        assert_eq!(
            plan_names(&[(&a, "png"), (&b, "png"), (&c, "png"), (&d, "json")]),
            vec!["x.png", "X-image.png", "x-image-2.png", "x.json"]
        );
    }

    #[test]
    fn hostile_names_are_sanitised() {
        let r = rendition("../etc/passwd", RenditionType::Other, 1, Idiom::Universal);
        assert_eq!(plan_names(&[(&r, extension(r.kind))]), vec!["_._etc_passwd.bin"]);
        let r = rendition("", RenditionType::Pdf, 1, Idiom::Universal);
        assert_eq!(plan_names(&[(&r, extension(r.kind))]), vec!["unnamed.pdf"]);
    }

    #[test]
    fn map_all_keeps_input_order() {
        let items: Vec<u32> = (0..10_000).collect();
        let doubled = map_all(items.clone(), |i| i * 2);
        assert_eq!(doubled, items.iter().map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn fallback_extension_takes_part_in_collisions() {
        let a = rendition("x", RenditionType::Other, 1, Idiom::Universal);
        let b = rendition("x", RenditionType::Image, 1, Idiom::Universal);
        assert_eq!(plan_names(&[(&a, "bin"), (&b, RAW_EXTENSION)]), vec!["x.bin", "x-image.bin"]);
    }
}
