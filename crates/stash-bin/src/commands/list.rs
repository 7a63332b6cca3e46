use std::path::PathBuf;

use miette::{Context, IntoDiagnostic};
use stash_archive::fs::{is_gzip_archive_name, list_archive};

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// Path to the archive (.tar, .tar.gz or .tgz)
    archive: PathBuf,

    /// The archive is gzip compressed. Implied by a `.tar.gz` or `.tgz` archive
    #[arg(short = 'z', long)]
    gzip: bool,
}

pub fn list(opt: Opt) -> miette::Result<()> {
    let gzip = opt.gzip || is_gzip_archive_name(&opt.archive);
    let entries = list_archive(&opt.archive, gzip)
        .into_diagnostic()
        .with_context(|| format!("failed to read {}", opt.archive.display()))?;

    for entry in entries {
        println!(
            "{:<5} {:04o} {:>12} {}",
            entry.kind, entry.mode, entry.size, entry.name
        );
    }

    Ok(())
}
