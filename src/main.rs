use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use assetcar::car::Idiom;
use assetcar::codec::Compression;
use assetcar::{
    catalog, extract, Archive, Color, ColorSpace, Editor, PixelBuffer, Rendition, RenditionType,
    Representation, WriteOptions,
};

#[derive(Parser)]
#[command(
    name = "assetcar",
    version,
    about = "Inspect and edit compiled asset catalogs (.car)",
    disable_version_flag = true
)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all renditions, grouped by type
    List {
        #[arg(short, long)]
        input: PathBuf,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Delete a rendition
    Delete {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        rendition: String,
        /// Compression for rewritten bitmaps: none, zip, lzfse
        #[arg(long, default_value = "zip")]
        compression: String,
        /// Skip re-reading the rewritten archive before it is saved
        #[arg(long)]
        no_verify: bool,
    },
    /// Add a new rendition (not implemented yet)
    Add {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        rendition: Option<String>,
    },
    /// Replace a rendition's content: -r name=path
    Edit {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        rendition: String,
        #[arg(long, default_value = "zip")]
        compression: String,
        #[arg(long)]
        no_verify: bool,
    },
    /// Extract one rendition, or all of them without -r
    Extract {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        rendition: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show catalog metadata
    Info {
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error("unrecognised input {}: expected a .car file or an .app bundle", .0.display())]
    UnrecognizedExtension(PathBuf),
    #[error("no asset catalog at {}", .0.display())]
    MissingAssetsFile(PathBuf),
    #[error("expected -r name=path, got '{0}'")]
    InvalidRenditionArg(String),
    #[error("unknown compression '{0}' (expected none, zip or lzfse)")]
    UnknownCompression(String),
    #[error("cannot read replacement {}: {reason}", path.display())]
    Replacement { path: PathBuf, reason: String },
    #[error(transparent)]
    Catalog(#[from] assetcar::Error),
    #[error("output: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            println!("Error: {}", usage_message(&e));
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let archive = Archive::open(resolve_input(&input)?)?;
            let renditions = catalog::enumerate(&archive);
            if json {
                let rows: Vec<ListRow<'_>> = renditions.iter().map(ListRow::from).collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            for (kind, group) in &renditions {
                println!("\x1b[1m{kind}s\x1b[0m");
                for r in group {
                    println!("  {}", r.name);
                }
                println!();
            }
        }

        // ── Delete ───────────────────────────────────────────────────────────
        Commands::Delete { input, rendition, compression, no_verify } => {
            let path = resolve_input(&input)?;
            let mut editor = Editor::open(&path, write_options(&compression, no_verify)?)?;
            let target = editor.renditions().find(&rendition)?.clone();
            println!("Found rendition '{}' of type '{}'.", target.name, target.kind);
            println!("Removing rendition...");
            editor.remove(&target)?;
            println!("Successfully removed rendition '{}'.", target.name);
            println!("Modified asset catalog saved to: {}", path.display());
        }

        // ── Add ──────────────────────────────────────────────────────────────
        Commands::Add { .. } => {
            println!("Add command not implemented yet.");
        }

        // ── Edit ─────────────────────────────────────────────────────────────
        Commands::Edit { input, rendition, compression, no_verify } => {
            let (name, value) = rendition
                .split_once('=')
                .filter(|(n, v)| !n.is_empty() && !v.is_empty())
                .ok_or_else(|| CliError::InvalidRenditionArg(rendition.clone()))?;
            let value = PathBuf::from(value);
            let path = resolve_input(&input)?;

            println!("Loading asset catalog from: {}", path.display());
            let mut editor = Editor::open(&path, write_options(&compression, no_verify)?)?;
            let target = editor.renditions().find(name)?.clone();
            println!("Found rendition '{}' of type '{}'.", target.name, target.kind);
            println!("Updating rendition with new content from: {}", value.display());

            let repr = load_replacement(&target, &value)?;
            editor.replace(&target, &repr)?;
            println!("Successfully updated rendition '{}'.", target.name);
            println!("Modified asset catalog saved to: {}", path.display());
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, rendition, output } => {
            let path = resolve_input(&input)?;
            println!("Loading asset catalog from: {}", path.display());
            let archive = Archive::open(&path)?;
            let renditions = catalog::enumerate(&archive);
            match rendition {
                Some(name) => {
                    let target = renditions.find(&name)?;
                    println!("Extracting rendition: {name}");
                    let written = extract::extract_one(&archive, target, &output)?;
                    println!("Successfully extracted rendition to: {}", written.display());
                }
                None => {
                    println!("Extracting all renditions...");
                    let written = extract::extract_all(&archive, &renditions, &output)?;
                    println!(
                        "Successfully extracted {} renditions to: {}",
                        written.len(),
                        output.display()
                    );
                }
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let path = resolve_input(&input)?;
            let archive = Archive::open(&path)?;
            let header = archive.header();
            let renditions = catalog::enumerate(&archive);
            let stored = chrono::DateTime::<chrono::Utc>::from_timestamp(header.storage_timestamp as i64, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| header.storage_timestamp.to_string());

            println!("── Asset catalog ────────────────────────────────────────");
            println!("  Path             {}", path.display());
            println!("  Size             {} B", archive.len());
            println!("  BLAKE3           {}", hex::encode(blake3::hash(archive.as_bytes()).as_bytes()));
            println!("  CoreUI version   {}", header.core_ui_version);
            println!("  Storage version  {}", header.storage_version);
            println!("  Stored           {stored}");
            println!("  Main version     {}", header.main_version);
            println!("  UUID             {}", header.uuid);
            println!("  Schema version   {}", header.schema_version);
            println!("  Key attributes   {}", archive.key_format().len());
            println!("  Blocks           {}", archive.store().block_count());
            println!("  Facets           {}", archive.facet_entries().len());
            println!("  Renditions       {} (header says {})", renditions.len(), header.rendition_count);
            for (kind, group) in &renditions {
                println!("    {:<14} {}", kind.to_string(), group.len());
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// A clap error on one line: its first paragraph, without the `error:`
/// prefix, the usage block or the help hint.
fn usage_message(e: &clap::Error) -> String {
    let rendered = e.render().to_string();
    let text = rendered.trim_start().strip_prefix("error:").unwrap_or(&rendered);
    text.lines()
        .map(str::trim)
        .take_while(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `.car` files are used as given; `.app` bundles resolve to their
/// `Contents/Resources/Assets.car`.
fn resolve_input(path: &Path) -> Result<PathBuf, CliError> {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("car") => Ok(path.to_owned()),
        Some("app") => {
            let car = path.join("Contents").join("Resources").join("Assets.car");
            if car.is_file() {
                Ok(car)
            } else {
                Err(CliError::MissingAssetsFile(car))
            }
        }
        _ => Err(CliError::UnrecognizedExtension(path.to_owned())),
    }
}

fn write_options(compression: &str, no_verify: bool) -> Result<WriteOptions, CliError> {
    let compression =
        Compression::from_name(compression).ok_or_else(|| CliError::UnknownCompression(compression.to_owned()))?;
    Ok(WriteOptions { compression, verify: !no_verify, ..WriteOptions::default() })
}

/// Same shape as the JSON written by `extract` for colours.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColorFile {
    color_space: Option<ColorSpace>,
    red:         f64,
    green:       f64,
    blue:        f64,
    #[serde(default = "opaque")]
    alpha:       f64,
}

fn opaque() -> f64 {
    1.0
}

/// Read a replacement in the format `extract` produces for the target type.
fn load_replacement(target: &Rendition, path: &Path) -> Result<Representation, CliError> {
    let failed = |reason: String| CliError::Replacement { path: path.to_owned(), reason };
    if target.kind.is_bitmap() {
        return Ok(Representation::Image(PixelBuffer::read_png(path)?));
    }
    let bytes = std::fs::read(path).map_err(|e| failed(e.to_string()))?;
    Ok(match target.kind {
        RenditionType::Pdf => Representation::Pdf(bytes),
        RenditionType::Svg => Representation::Svg(bytes),
        RenditionType::Color => {
            let c: ColorFile = serde_json::from_slice(&bytes).map_err(|e| failed(e.to_string()))?;
            Representation::Color(Color {
                space:      c.color_space.unwrap_or(ColorSpace::Srgb),
                components: [c.red, c.green, c.blue, c.alpha],
            })
        }
        _ => Representation::Data(bytes),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRow<'a> {
    name:         &'a str,
    #[serde(rename = "type")]
    kind:         RenditionType,
    file_name:    &'a str,
    scale:        u32,
    idiom:        Idiom,
    width:        u32,
    height:       u32,
    pixel_format: String,
}

impl<'a> From<&'a Rendition> for ListRow<'a> {
    fn from(r: &'a Rendition) -> Self {
        Self {
            name:         &r.name,
            kind:         r.kind,
            file_name:    &r.file_name,
            scale:        r.scale,
            idiom:        r.idiom,
            width:        r.width,
            height:       r.height,
            pixel_format: r.pixel_format.to_string(),
        }
    }
}
