//! Pack an addon manifest into an `.amod` image
//!
//! Usage:
//!   addon-pack <manifest.toml> [--output <file>] [--seal]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use addon_host::module::cache::hash160;
use addon_host::module::image::{seal, MODULE_EXTENSION};
use addon_host::module::registry::ModuleManifest;
use addon_host::module::validation::{ManifestValidator, ValidationResult};
use addon_host::utils::init_logging;

#[derive(Parser, Debug)]
#[command(name = "addon-pack", about = "Build an addon image from a TOML manifest")]
struct Args {
    /// Manifest file
    manifest: PathBuf,

    /// Output file (default: <name>.amod next to the manifest)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Wrap the image in the sealed container
    #[arg(long)]
    seal: bool,
}

fn main() -> Result<()> {
    init_logging(Some("info"));
    let args = Args::parse();

    let manifest = ModuleManifest::from_file(&args.manifest)
        .with_context(|| format!("Failed to read manifest {:?}", args.manifest))?;

    if let ValidationResult::Invalid(errors) = ManifestValidator::new().validate(&manifest) {
        for error in &errors {
            tracing::error!("{}", error);
        }
        bail!("Manifest {:?} is invalid ({} errors)", args.manifest, errors.len());
    }

    let base_dir = args.manifest.parent().unwrap_or_else(|| Path::new("."));
    let mut bytes = manifest.to_image(base_dir)?.to_bytes()?;
    if args.seal {
        let key = hash160(&bytes);
        bytes = seal(&bytes, &key);
    }

    let output = args.output.unwrap_or_else(|| {
        base_dir.join(format!("{}.{}", manifest.name, MODULE_EXTENSION))
    });
    std::fs::write(&output, &bytes).with_context(|| format!("Failed to write {:?}", output))?;

    tracing::info!(
        "Packed {} {} into {:?} ({} bytes{})",
        manifest.name,
        manifest.version,
        output,
        bytes.len(),
        if args.seal { ", sealed" } else { "" }
    );
    Ok(())
}
