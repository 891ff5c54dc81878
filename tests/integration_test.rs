use assetcar::catalog::{enumerate, RenditionType};
use assetcar::car::{Attribute, Idiom};
use assetcar::decode::decode;
use assetcar::extract::{extract_all, extract_one};
use assetcar::mutate::{commit, remove, replace, Editor};
use assetcar::{
    Archive, CatalogWriter, Color, Error, PixelBuffer, Representation, Variant, WriteOptions,
};
use tempfile::{tempdir, NamedTempFile};

const PDF: &[u8] = b"%PDF-1.4\n1 0 obj << >> endobj\n%%EOF\n";
const SVG: &[u8] = b"<?xml version=\"1.0\"?><svg xmlns=\"http://www.w3.org/2000/svg\"/>";

fn gradient(width: u32, height: u32) -> PixelBuffer {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[(x * 40) as u8, (y * 40) as u8, 128, 255]);
        }
    }
    PixelBuffer::new(width, height, assetcar::Channels::Rgba8, pixels).unwrap()
}

fn sample_catalog() -> Vec<u8> {
    let mut w = CatalogWriter::new();
    w.add_image("Logo", Variant::scaled(1), gradient(4, 3)).unwrap();
    w.add_icon("AppIcon", Variant { scale: 2, idiom: Idiom::Phone }, gradient(8, 8)).unwrap();
    w.add_color("AccentColor", Color::srgb(0.2, 0.4, 0.6, 1.0)).unwrap();
    w.add_image("Logo", Variant::scaled(2), gradient(8, 6)).unwrap();
    w.add_pdf("Document", PDF.to_vec()).unwrap();
    w.add_svg("Vector", SVG.to_vec()).unwrap();
    w.add_image_set("Button", Variant::default(), 30, gradient(9, 9)).unwrap();
    w.add_data("Payload", b"{\"k\":1}".to_vec()).unwrap();
    w.add_variable("APPEARANCEKEYS", b"opaque appearance data".to_vec());
    w.finish().unwrap()
}

fn write_sample() -> NamedTempFile {
    let file = tempfile::Builder::new().suffix(".car").tempfile().unwrap();
    std::fs::write(file.path(), sample_catalog()).unwrap();
    file
}

fn summary(archive: &Archive) -> Vec<(RenditionType, Vec<String>)> {
    enumerate(archive)
        .groups()
        .iter()
        .map(|(kind, group)| (*kind, group.iter().map(|r| r.name.clone()).collect()))
        .collect()
}

#[test]
fn test_open_and_enumerate() {
    let file = write_sample();
    let archive = Archive::open(file.path()).unwrap();
    let renditions = enumerate(&archive);

    assert_eq!(renditions.len(), 8);
    let types: Vec<_> = renditions.types().collect();
    assert_eq!(
        types,
        vec![
            RenditionType::Image,
            RenditionType::Icon,
            RenditionType::Color,
            RenditionType::Pdf,
            RenditionType::Svg,
            RenditionType::ImageSet,
            RenditionType::Other,
        ]
    );
    let icon = renditions.find("AppIcon").unwrap();
    assert_eq!(icon.kind, RenditionType::Icon);
    assert_eq!(icon.scale, 2);
    assert_eq!(icon.idiom, Idiom::Phone);
    assert_eq!((icon.width, icon.height), (8, 8));
}

#[test]
fn test_decode_every_type() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    let renditions = enumerate(&archive);

    let logo = renditions.find("Logo").unwrap();
    assert_eq!(decode(&archive, logo).unwrap(), Representation::Image(gradient(4, 3)));
    let accent = renditions.find("AccentColor").unwrap();
    assert_eq!(
        decode(&archive, accent).unwrap(),
        Representation::Color(Color::srgb(0.2, 0.4, 0.6, 1.0))
    );
    let pdf = renditions.find("Document").unwrap();
    assert_eq!(decode(&archive, pdf).unwrap(), Representation::Pdf(PDF.to_vec()));
    let svg = renditions.find("Vector").unwrap();
    assert_eq!(decode(&archive, svg).unwrap(), Representation::Svg(SVG.to_vec()));
    let data = renditions.find("Payload").unwrap();
    assert_eq!(decode(&archive, data).unwrap(), Representation::Data(b"{\"k\":1}".to_vec()));
}

#[test]
fn test_noop_save_roundtrip() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    let reopened = Archive::from_bytes(archive.to_bytes().unwrap()).unwrap();
    assert_eq!(summary(&archive), summary(&reopened));

    let before = enumerate(&archive);
    let after = enumerate(&reopened);
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(decode(&archive, a).ok(), decode(&reopened, b).ok(), "{}", a.name);
    }
    assert_eq!(
        reopened.store().variable("APPEARANCEKEYS").map(|id| reopened.block(id).unwrap().to_vec()),
        Some(b"opaque appearance data".to_vec())
    );
}

#[test]
fn test_enumerate_is_idempotent() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    assert_eq!(enumerate(&archive), enumerate(&archive));
}

#[test]
fn test_find_semantics() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    let renditions = enumerate(&archive);

    assert!(matches!(renditions.find("Missing"), Err(Error::NotFound { name }) if name == "Missing"));
    assert_eq!(renditions.find("Document").unwrap().kind, RenditionType::Pdf);

    // "Logo" exists at 1x and 2x; the 1x variant comes first.
    let first = renditions.find("Logo").unwrap();
    assert_eq!(first.scale, 1);
    for _ in 0..3 {
        assert_eq!(renditions.find("Logo").unwrap(), first);
    }
}

#[test]
fn test_remove_rendition() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    let before = enumerate(&archive);
    let target = before.find("AccentColor").unwrap();

    let after_archive = Archive::from_bytes(remove(&archive, target).unwrap()).unwrap();
    let after = enumerate(&after_archive);

    assert_eq!(after.len(), before.len() - 1);
    assert!(after.get(RenditionType::Color).is_empty());
    assert!(matches!(after.find("AccentColor"), Err(Error::NotFound { .. })));
    assert_eq!(after_archive.header().rendition_count, 7);

    let survivors: Vec<_> = before.in_traversal_order().into_iter().filter(|r| r.name != "AccentColor").collect();
    for (old, new) in survivors.iter().zip(after.in_traversal_order()) {
        assert_eq!(old.name, new.name);
        assert_eq!(old.kind, new.kind);
        assert_eq!(
            archive.slice(old.payload.clone()).unwrap(),
            after_archive.slice(new.payload.clone()).unwrap()
        );
    }
    assert!(after_archive.store().variable("APPEARANCEKEYS").is_some());
}

#[test]
fn test_replace_image() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    let before = enumerate(&archive);
    let target = before.find("Logo").unwrap();
    let new_image = Representation::Image(gradient(5, 5));

    let bytes = replace(&archive, target, &new_image, &WriteOptions::default()).unwrap();
    let after_archive = Archive::from_bytes(bytes).unwrap();
    let after = enumerate(&after_archive);

    let replaced = after.find("Logo").unwrap();
    assert_eq!(decode(&after_archive, replaced).unwrap(), new_image);
    assert_eq!((replaced.width, replaced.height), (5, 5));
    assert_eq!(replaced.kind, RenditionType::Image);

    for (old, new) in before.in_traversal_order().into_iter().zip(after.in_traversal_order()) {
        if old.position == target.position {
            continue;
        }
        assert_eq!(
            archive.slice(old.payload.clone()).unwrap(),
            after_archive.slice(new.payload.clone()).unwrap(),
            "{} changed",
            old.name
        );
    }
}

#[test]
fn test_replace_type_mismatch() {
    let file = write_sample();
    let mut editor = Editor::open(file.path(), WriteOptions::default()).unwrap();
    let original = std::fs::read(file.path()).unwrap();

    let err = editor
        .replace_named("Document", &Representation::Image(gradient(2, 2)))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::TypeMismatch { expected: RenditionType::Pdf, found: RenditionType::Image, .. }
    ));
    assert_eq!(std::fs::read(file.path()).unwrap(), original);
}

#[test]
fn test_editor_commits_atomically() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Assets.car");
    std::fs::write(&path, sample_catalog()).unwrap();

    let mut editor = Editor::open(&path, WriteOptions::default()).unwrap();
    editor.remove_named("Vector").unwrap();
    editor.replace_named("AccentColor", &Representation::Color(Color::gray(0.5, 1.0))).unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1, "temporary files left behind");

    let archive = Archive::open(&path).unwrap();
    let renditions = enumerate(&archive);
    assert!(renditions.get(RenditionType::Svg).is_empty());
    let accent = renditions.find("AccentColor").unwrap();
    assert_eq!(decode(&archive, accent).unwrap(), Representation::Color(Color::gray(0.5, 1.0)));
}

#[test]
fn test_commit_into_missing_directory_fails_cleanly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope").join("Assets.car");
    assert!(matches!(commit(&path, b"bytes"), Err(Error::Io { .. })));
    assert!(!path.exists());
}

#[test]
fn test_truncation_is_corruption() {
    let bytes = sample_catalog();
    for len in [0, 10, 511, 512, 600, bytes.len() / 2, bytes.len() - 1] {
        let result = Archive::from_bytes(bytes[..len].to_vec());
        assert!(matches!(result, Err(Error::CorruptArchive { .. })), "len {len}");
    }
}

#[test]
fn test_bad_magic_is_corruption() {
    let mut bytes = sample_catalog();
    bytes[0] = b'X';
    assert!(matches!(Archive::from_bytes(bytes), Err(Error::CorruptArchive { .. })));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    assert!(matches!(Archive::open(dir.path().join("absent.car")), Err(Error::Io { .. })));
}

#[test]
fn test_malformed_entry_degrades_to_other() {
    let mut w = CatalogWriter::new();
    w.add_image("Good", Variant::default(), gradient(2, 2)).unwrap();
    w.add_raw("Broken", &[(Attribute::Part, 181)], b"garbage, not a rendition".to_vec()).unwrap();
    w.add_color("AlsoGood", Color::srgb(1.0, 0.0, 0.0, 1.0)).unwrap();
    let archive = Archive::from_bytes(w.finish().unwrap()).unwrap();

    let renditions = enumerate(&archive);
    assert_eq!(renditions.len(), 3);
    let broken = renditions.find("Broken").unwrap();
    assert_eq!(broken.kind, RenditionType::Other);
    assert!(matches!(decode(&archive, broken), Err(Error::Decode { .. })));
    assert_eq!(renditions.find("AlsoGood").unwrap().kind, RenditionType::Color);

    let dir = tempdir().unwrap();
    let path = extract_one(&archive, broken, dir.path()).unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"garbage, not a rendition");
}

#[test]
fn test_extract_all() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    let renditions = enumerate(&archive);
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("unrelated.txt"), b"keep me").unwrap();

    let paths = extract_all(&archive, &renditions, &out).unwrap();
    assert_eq!(paths.len(), renditions.len());
    let mut names: Vec<_> = paths.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), paths.len(), "file name collision");
    assert!(out.join("unrelated.txt").exists());

    for (r, path) in renditions.in_traversal_order().into_iter().zip(&paths) {
        if r.kind.is_bitmap() {
            let png = PixelBuffer::from_png(&std::fs::read(path).unwrap()).unwrap();
            let Representation::Image(original) = decode(&archive, r).unwrap() else {
                panic!("{} is not an image", r.name);
            };
            assert_eq!(png, original);
        }
    }
    assert!(out.join("Logo.png").exists());
    assert!(out.join("Logo@2x.png").exists());
    assert!(out.join("AppIcon~iphone@2x.png").exists());
    assert!(out.join("Document.pdf").exists());
    assert!(out.join("Payload.bin").exists());

    let color: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join("AccentColor.json")).unwrap()).unwrap();
    assert_eq!(color["red"], 0.2);
    assert_eq!(color["colorSpace"], "srgb");
}

#[test]
fn test_extract_creates_directory() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    let renditions = enumerate(&archive);
    let dir = tempdir().unwrap();
    let out = dir.path().join("a").join("b");
    let path = extract_one(&archive, renditions.find("Document").unwrap(), &out).unwrap();
    assert_eq!(path, out.join("Document.pdf"));
    assert_eq!(std::fs::read(path).unwrap(), PDF);
}

fn undecodable_image_block() -> Vec<u8> {
    use assetcar::csi::{layout, CsiHeader, FourCc};
    let template = CsiHeader::new("Astc.png", layout::ONE_PART_SCALE, FourCc::ARGB, 1);
    let image = Representation::Image(gradient(2, 2));
    let mut block = assetcar::encode::encode_rendition(&template, &[], &image, &WriteOptions::default()).unwrap();
    // CELM compression id sits 8 bytes into the payload; 7 is ASTC.
    block[184 + 8..184 + 12].copy_from_slice(&7u32.to_le_bytes());
    block
}

#[test]
fn test_extract_all_survives_undecodable_rendition() {
    let mut w = CatalogWriter::new();
    w.add_image("Good", Variant::default(), gradient(2, 2)).unwrap();
    w.add_raw("Astc", &[], undecodable_image_block()).unwrap();
    w.add_color("AlsoGood", Color::srgb(1.0, 0.0, 0.0, 1.0)).unwrap();
    let archive = Archive::from_bytes(w.finish().unwrap()).unwrap();
    let renditions = enumerate(&archive);
    let astc = renditions.find("Astc").unwrap();
    assert_eq!(astc.kind, RenditionType::Image);
    assert!(decode(&archive, astc).is_err());

    let dir = tempdir().unwrap();
    let paths = extract_all(&archive, &renditions, dir.path()).unwrap();
    assert_eq!(paths.len(), 3);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    assert!(dir.path().join("Good.png").exists());
    assert!(dir.path().join("AlsoGood.json").exists());
    assert_eq!(
        std::fs::read(dir.path().join("Astc.bin")).unwrap(),
        archive.slice(astc.payload.clone()).unwrap()
    );
}

#[test]
fn test_jpeg_photos_extract_verbatim() {
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut jpeg)
        .encode(&[40u8; 4 * 4 * 3], 4, 4, image::ExtendedColorType::Rgb8)
        .unwrap();
    let mut w = CatalogWriter::new();
    w.add_jpeg("Photo", Variant::default(), jpeg.clone()).unwrap();
    let archive = Archive::from_bytes(w.finish().unwrap()).unwrap();
    let renditions = enumerate(&archive);
    let photo = renditions.find("Photo").unwrap();
    assert_eq!(photo.kind, RenditionType::Image);

    let dir = tempdir().unwrap();
    let paths = extract_all(&archive, &renditions, dir.path()).unwrap();
    assert_eq!(paths, vec![dir.path().join("Photo.jpg")]);
    assert_eq!(std::fs::read(&paths[0]).unwrap(), jpeg);
}

#[test]
fn test_concurrent_decode_of_one_archive() {
    let archive = Archive::from_bytes(sample_catalog()).unwrap();
    let renditions = enumerate(&archive);
    let expected: Vec<_> = renditions.iter().map(|r| decode(&archive, r).ok()).collect();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| renditions.iter().map(|r| decode(&archive, r).ok()).collect::<Vec<_>>()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}
