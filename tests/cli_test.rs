use std::process::{Command, Output};

use assetcar::{CatalogWriter, Color, PixelBuffer, Variant};
use tempfile::tempdir;

fn assetcar(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_assetcar"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8(out.stdout.clone()).unwrap()
}

fn assert_one_line_error(out: &Output) {
    assert_eq!(out.status.code(), Some(1));
    let text = stdout(out);
    assert!(text.starts_with("Error: "), "stdout was {text:?}");
    assert_eq!(text.trim_end().lines().count(), 1, "stdout was {text:?}");
}

#[test]
fn test_usage_errors_exit_with_one() {
    let out = assetcar(&["delete", "-i", "x.car"]);
    assert_one_line_error(&out);
    assert!(stdout(&out).contains("--rendition"));

    assert_one_line_error(&assetcar(&[]));
    assert_one_line_error(&assetcar(&["list", "-i", "x.car", "--frobnicate"]));
    assert_one_line_error(&assetcar(&["explode"]));
}

#[test]
fn test_help_and_version_exit_with_zero() {
    let out = assetcar(&["--help"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("extract"));

    let out = assetcar(&["-v"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_runtime_errors_exit_with_one() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.car");
    assert_one_line_error(&assetcar(&["list", "-i", missing.to_str().unwrap()]));
    assert_one_line_error(&assetcar(&["list", "-i", "catalog.zip"]));
    assert_one_line_error(&assetcar(&["edit", "-i", "x.car", "-r", "no-equals-sign"]));
}

#[test]
fn test_list_and_add() {
    let mut w = CatalogWriter::new();
    w.add_image("Logo", Variant::default(), PixelBuffer::filled(2, 2, [1, 2, 3, 255])).unwrap();
    w.add_color("Tint", Color::srgb(0.0, 0.5, 1.0, 1.0)).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("Assets.car");
    w.write_to(&path).unwrap();

    let out = assetcar(&["list", "-i", path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0));
    let text = stdout(&out);
    assert!(text.contains("Images"));
    assert!(text.contains("  Logo"));
    assert!(text.contains("Colors"));

    let out = assetcar(&["add"]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "Add command not implemented yet.\n");
}
