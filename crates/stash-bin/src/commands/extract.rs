use std::path::PathBuf;
use std::sync::Arc;

use miette::{Context, IntoDiagnostic};
use stash_archive::fs::is_gzip_archive_name;
use stash_archive::read::Extractor;

use crate::reporter::ProgressReporter;

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// Path to the archive (.tar, .tar.gz or .tgz)
    archive: PathBuf,

    /// Destination directory where the archive will be extracted.
    /// If not specified, extracts to a directory with the same name as the archive
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// The archive is gzip compressed. Implied by a `.tar.gz` or `.tgz` archive
    #[arg(short = 'z', long)]
    gzip: bool,
}

/// Strips archive extensions (.tar, .tar.gz or .tgz) from a filename
fn strip_archive_extension(filename: &str) -> &str {
    [".tar.gz", ".tgz", ".tar"]
        .iter()
        .find_map(|extension| filename.strip_suffix(extension))
        .unwrap_or(filename)
}

/// Determines the destination directory from the archive path
fn determine_destination(archive: &std::path::Path) -> miette::Result<PathBuf> {
    let filename = archive
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| miette::miette!("Invalid archive filename"))?;
    Ok(PathBuf::from(strip_archive_extension(filename)))
}

pub fn extract(opt: Opt) -> miette::Result<()> {
    let destination = opt
        .destination
        .map_or_else(|| determine_destination(&opt.archive), Ok)?;
    let gzip = opt.gzip || is_gzip_archive_name(&opt.archive);

    tracing::info!(
        "extracting {} to {}",
        opt.archive.display(),
        destination.display()
    );
    std::fs::create_dir_all(&destination)
        .into_diagnostic()
        .with_context(|| format!("failed to create {}", destination.display()))?;

    Extractor::new()
        .with_gzip(gzip)
        .with_reporter(Arc::new(ProgressReporter::new("extracting")))
        .extract_archive(&opt.archive, &destination)
        .into_diagnostic()
        .with_context(|| format!("failed to extract {}", opt.archive.display()))?;

    println!(
        "{} Successfully extracted archive",
        console::style("✓").green(),
    );
    println!("  Destination: {}", destination.display());

    Ok(())
}
