use std::path::PathBuf;

use miette::{Context, IntoDiagnostic};
use stash_archive::fs::verify_archive;

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// Path to the archive
    archive: PathBuf,

    /// The base64 encoded SHA1 digest printed when the archive was created
    digest: String,
}

pub fn verify(opt: Opt) -> miette::Result<()> {
    let matches = verify_archive(&opt.archive, &opt.digest)
        .into_diagnostic()
        .with_context(|| format!("failed to verify {}", opt.archive.display()))?;

    if !matches {
        return Err(miette::miette!(
            "{} does not match digest {}",
            opt.archive.display(),
            opt.digest
        ));
    }

    println!("{} {} is intact", console::style("✓").green(), opt.archive.display());
    Ok(())
}
