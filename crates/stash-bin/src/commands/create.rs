use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use miette::{Context, IntoDiagnostic};
use stash_archive::fs::is_gzip_archive_name;
use stash_archive::write::{Archiver, Compression, CompressionLevel};

use crate::reporter::ProgressReporter;

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// Path of the archive to create
    target: PathBuf,

    /// Files and directories to store in the archive, in this order
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Prefix removed from every path to form the entry names.
    /// Defaults to the common parent directory of all paths
    #[arg(long)]
    strip_prefix: Option<String>,

    /// Compress the archive with gzip. Implied by a `.tar.gz` or `.tgz` target
    #[arg(short = 'z', long)]
    gzip: bool,

    /// The gzip compression level (0-9), implies `--gzip`
    #[arg(long)]
    level: Option<u32>,

    /// Unix timestamp to use as modification time of every entry, for reproducible archives
    #[arg(long, env = "SOURCE_DATE_EPOCH")]
    timestamp: Option<i64>,
}

/// Returns the deepest directory that contains all of `paths`.
fn common_parent(paths: &[PathBuf]) -> Option<PathBuf> {
    let mut result: Option<PathBuf> = None;
    for path in paths {
        let parent = path.parent()?;
        result = Some(match result {
            None => parent.to_path_buf(),
            Some(current) => current
                .components()
                .zip(parent.components())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    result
}

/// Formats `dir` as a prefix that ends with a separator so it is stripped including the
/// separator that follows it.
fn prefix_for(dir: &Path) -> String {
    let prefix = dir.display().to_string();
    if prefix.ends_with(std::path::is_separator) {
        prefix
    } else {
        format!("{prefix}{MAIN_SEPARATOR}")
    }
}

pub fn create(opt: Opt) -> miette::Result<()> {
    let paths = opt
        .paths
        .iter()
        .map(std::path::absolute)
        .collect::<Result<Vec<_>, _>>()
        .into_diagnostic()
        .context("failed to determine absolute paths")?;

    let strip_prefix = match opt.strip_prefix {
        Some(prefix) => prefix,
        None => common_parent(&paths)
            .map(|dir| prefix_for(&dir))
            .unwrap_or_default(),
    };

    let compression = if opt.gzip || opt.level.is_some() || is_gzip_archive_name(&opt.target) {
        Compression::Gzip(opt.level.map_or(CompressionLevel::Default, CompressionLevel::Numeric))
    } else {
        Compression::None
    };

    let mut archiver = Archiver::new(strip_prefix)
        .with_compression(compression)
        .with_reporter(Arc::new(ProgressReporter::new("archiving")));
    if let Some(timestamp) = opt.timestamp {
        let timestamp = chrono::DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| miette::miette!("timestamp {timestamp} is out of range"))?;
        archiver = archiver.with_timestamp(timestamp);
    }

    let result = archiver
        .create_archive(&paths, &opt.target)
        .into_diagnostic()
        .with_context(|| format!("failed to create {}", opt.target.display()))?;

    eprintln!(
        "{} Wrote {} entries ({} bytes) to {}",
        console::style("✓").green(),
        result.entries,
        result.total_size,
        opt.target.display()
    );
    println!("{}", result.digest());

    Ok(())
}
