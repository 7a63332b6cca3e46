//! Functions to create, extract, list or verify archives on disk.

use std::path::Path;

use crate::read::{self, Extractor};
use crate::write::Archiver;
use crate::{ArchiveDigest, ArchivedEntry, ExtractError, VerifyError, WriteError};

/// Creates a tar archive at `target` holding the files and directories listed in `paths`,
/// compressed with gzip if `compress` is true. `strip_prefix` is removed from every path to form
/// the names of the entries.
///
/// Returns the SHA1 hash of the archive file encoded as standard base64.
///
/// ```rust,no_run
/// # use std::path::{Path, PathBuf};
/// use stash_archive::fs::create_archive;
/// let digest = create_archive(
///     &[PathBuf::from("/srv/data/db")],
///     Path::new("/tmp/backup.tar.gz"),
///     "/srv/data/",
///     true,
/// )
/// .unwrap();
/// ```
pub fn create_archive(
    paths: &[impl AsRef<Path>],
    target: &Path,
    strip_prefix: &str,
    compress: bool,
) -> Result<String, WriteError> {
    let result = Archiver::new(strip_prefix)
        .with_compression(compress)
        .create_archive(paths, target)?;
    Ok(result.digest())
}

/// Extracts the archive at `archive` into the existing directory `destination`. If `compressed`
/// is true the archive is expected to be gzip compressed.
///
/// ```rust,no_run
/// # use std::path::Path;
/// use stash_archive::fs::extract_archive;
/// extract_archive(Path::new("/tmp/backup.tar.gz"), Path::new("/tmp/restore"), true).unwrap();
/// ```
pub fn extract_archive(
    archive: &Path,
    destination: &Path,
    compressed: bool,
) -> Result<(), ExtractError> {
    Extractor::new()
        .with_gzip(compressed)
        .extract_archive(archive, destination)
}

/// Returns the entries of the archive at `archive` in the order in which they are stored.
pub fn list_archive(archive: &Path, compressed: bool) -> Result<Vec<ArchivedEntry>, ExtractError> {
    read::list_entries(read::open_archive(archive, compressed)?)
}

/// Recomputes the hash of the archive file at `archive` and compares it with `expected`, a
/// standard base64 encoded SHA1 digest as returned by [`create_archive`].
pub fn verify_archive(archive: &Path, expected: &str) -> Result<bool, VerifyError> {
    let expected = stash_digest::parse_digest_from_base64::<ArchiveDigest>(expected)
        .ok_or_else(|| VerifyError::InvalidDigest(expected.to_owned()))?;
    let actual = stash_digest::compute_file_digest::<ArchiveDigest>(archive).map_err(|source| {
        VerifyError::ReadArchive {
            path: archive.to_path_buf(),
            source,
        }
    })?;
    if actual != expected {
        tracing::warn!(
            "digest mismatch for {}: expected {}, found {}",
            archive.display(),
            stash_digest::encode_base64::<ArchiveDigest>(&expected),
            stash_digest::encode_base64::<ArchiveDigest>(&actual)
        );
    }
    Ok(actual == expected)
}

/// Returns true if the file name of `path` indicates a gzip compressed tar archive
/// (`.tar.gz` or `.tgz`).
pub fn is_gzip_archive_name(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|name| name.ends_with(".tar.gz") || name.ends_with(".tgz"))
}
