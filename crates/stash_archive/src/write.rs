//! Functionality for writing backup archives.
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use stash_digest::HashingWriter;

use crate::{ArchiveDigest, ArchiveResult, EntryKind, Reporter, WriteError};

/// Select the compression level to use for gzip compressed archives
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Use the lowest compression level (1)
    Lowest,
    /// Use the highest compression level (9)
    Highest,
    /// Use the default compression level (6)
    #[default]
    Default,
    /// Use a numeric compression level (0-9, 0 stores the data without compressing it)
    Numeric(u32),
}

impl CompressionLevel {
    fn to_gzip_level(self) -> Result<flate2::Compression, WriteError> {
        match self {
            CompressionLevel::Lowest => Ok(flate2::Compression::new(1)),
            CompressionLevel::Highest => Ok(flate2::Compression::new(9)),
            CompressionLevel::Default => Ok(flate2::Compression::new(6)),
            CompressionLevel::Numeric(n) => {
                if n > 9 {
                    Err(WriteError::InvalidCompressionLevel(n))
                } else {
                    Ok(flate2::Compression::new(n))
                }
            }
        }
    }
}

/// How the tar stream is compressed before it is written.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Write a plain tar stream.
    #[default]
    None,
    /// Wrap the tar stream in gzip framing.
    Gzip(CompressionLevel),
}

impl From<bool> for Compression {
    fn from(compress: bool) -> Self {
        if compress {
            Compression::Gzip(CompressionLevel::Default)
        } else {
            Compression::None
        }
    }
}

/// Writes files and directories into a tar archive.
///
/// Every path handed to the archiver is written depth-first: a directory contributes its own
/// entry followed by the entries of all its children, in the order in which the filesystem lists
/// them. Entry names are the source paths with `strip_prefix` removed, always separated by
/// forward slashes.
#[derive(Clone, Default)]
pub struct Archiver {
    strip_prefix: String,
    compression: Compression,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    reporter: Option<Arc<dyn Reporter>>,
}

impl Archiver {
    /// Constructs a new archiver that removes `strip_prefix` from every path to form the entry
    /// names.
    pub fn new(strip_prefix: impl Into<String>) -> Self {
        Self {
            strip_prefix: strip_prefix.into(),
            ..Self::default()
        }
    }

    /// Sets the compression applied to the tar stream.
    pub fn with_compression(self, compression: impl Into<Compression>) -> Self {
        Self {
            compression: compression.into(),
            ..self
        }
    }

    /// Uses the given timestamp as modification time of every entry instead of the one recorded
    /// on disk. Useful for reproducible archives.
    pub fn with_timestamp(self, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..self
        }
    }

    /// Sets the reporter that is notified of every entry that is written.
    pub fn with_reporter(self, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            reporter: Some(reporter),
            ..self
        }
    }

    /// Writes an archive containing `paths` to a new file at `target` and returns the hash of the
    /// bytes written to that file.
    ///
    /// If compression is enabled the hash covers the compressed bytes, it always matches the
    /// contents of the file on disk. If an error occurs the partially written file is left
    /// behind.
    pub fn create_archive(
        &self,
        paths: &[impl AsRef<Path>],
        target: &Path,
    ) -> Result<ArchiveResult, WriteError> {
        // Validate the configuration before touching the filesystem.
        if let Compression::Gzip(level) = self.compression {
            level.to_gzip_level()?;
        }

        let file = File::create(target).map_err(|source| WriteError::CreateDestination {
            path: target.to_path_buf(),
            source,
        })?;

        // Everything that reaches the file also passes through the hasher.
        let sink = HashingWriter::<_, ArchiveDigest>::new(BufWriter::new(file));
        let (sink, entries) = self.write_archive(sink, paths)?;

        let total_size = sink.bytes_written();
        let (file, sha1) = sink.finalize();
        let file = file
            .into_inner()
            .map_err(|err| WriteError::Finish(err.into_error()))?;
        // Writeback errors otherwise only show up when the handle is dropped, where they are lost.
        // Devices and pipes cannot be synced.
        if file.metadata().map_err(WriteError::Finish)?.is_file() {
            file.sync_all().map_err(WriteError::Finish)?;
        }

        tracing::info!(
            "wrote {} entries ({} bytes) to {}",
            entries,
            total_size,
            target.display()
        );

        Ok(ArchiveResult {
            sha1,
            entries,
            total_size,
        })
    }

    /// Writes an archive containing `paths` to `writer`. Returns the writer and the number of
    /// entries that were written.
    ///
    /// The tar stream (and the gzip stream if enabled) is finished before the writer is
    /// returned, but the writer itself is not flushed.
    pub fn write_archive<W: Write>(
        &self,
        writer: W,
        paths: &[impl AsRef<Path>],
    ) -> Result<(W, usize), WriteError> {
        match self.compression {
            Compression::None => {
                let mut archive = tar::Builder::new(writer);
                let entries = self.append_paths(&mut archive, paths)?;
                let writer = archive.into_inner().map_err(WriteError::Finish)?;
                Ok((writer, entries))
            }
            Compression::Gzip(level) => {
                let mut archive =
                    tar::Builder::new(GzEncoder::new(writer, level.to_gzip_level()?));
                let entries = self.append_paths(&mut archive, paths)?;
                let writer = archive
                    .into_inner()
                    .and_then(GzEncoder::finish)
                    .map_err(WriteError::Finish)?;
                Ok((writer, entries))
            }
        }
    }

    fn append_paths(
        &self,
        archive: &mut tar::Builder<impl Write>,
        paths: &[impl AsRef<Path>],
    ) -> Result<usize, WriteError> {
        let mut entries = 0;
        for path in paths {
            append_path_to_archive(archive, path.as_ref(), &self.context(), &mut entries)?;
        }
        if let Some(reporter) = &self.reporter {
            reporter.on_complete(entries);
        }
        Ok(entries)
    }

    fn context(&self) -> WalkContext<'_> {
        WalkContext {
            strip_prefix: &self.strip_prefix,
            timestamp: self.timestamp.as_ref(),
            reporter: self.reporter.as_deref(),
        }
    }
}

/// The state shared by every step of the recursive walk.
struct WalkContext<'a> {
    strip_prefix: &'a str,
    timestamp: Option<&'a chrono::DateTime<chrono::Utc>>,
    reporter: Option<&'a dyn Reporter>,
}

/// Returns the name under which `path` is stored in an archive: the path with `strip_prefix`
/// removed, host separators replaced by `/` and leading slashes trimmed.
///
/// Returns `None` if nothing is left of the path.
pub fn entry_name(path: &Path, strip_prefix: &str) -> Option<String> {
    let path = path.to_string_lossy();
    let stripped = path.strip_prefix(strip_prefix).unwrap_or(&path);
    let name = stripped
        .chars()
        .map(|c| if std::path::is_separator(c) { '/' } else { c })
        .collect::<String>();
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        None
    } else {
        Some(name.to_owned())
    }
}

fn prepare_header(
    metadata: &fs::Metadata,
    timestamp: Option<&chrono::DateTime<chrono::Utc>>,
) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_metadata(metadata);

    // Only the permission bits, not the file type bits of `st_mode`.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        header.set_mode(metadata.permissions().mode() & 0o7777);
    }

    // erase some fields
    header.set_uid(0);
    header.set_gid(0);

    if metadata.is_dir() {
        header.set_size(0);
    }

    if let Some(timestamp) = timestamp {
        header.set_mtime(timestamp.timestamp().unsigned_abs());
    }

    header
}

/// Appends `path` to the archive, and if it is a directory, all of its children.
fn append_path_to_archive(
    archive: &mut tar::Builder<impl Write>,
    path: &Path,
    context: &WalkContext<'_>,
    entries: &mut usize,
) -> Result<(), WriteError> {
    let metadata = fs::symlink_metadata(path).map_err(|source| WriteError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    let file_type = metadata.file_type();
    if !file_type.is_file() && !file_type.is_dir() {
        return Err(WriteError::UnsupportedFileType {
            path: path.to_path_buf(),
        });
    }

    let Some(name) = entry_name(path, context.strip_prefix) else {
        // A directory that is the strip prefix itself has no entry of its own, only its children.
        if file_type.is_dir() {
            return append_children(archive, path, context, entries);
        }
        return Err(WriteError::EmptyEntryName {
            path: path.to_path_buf(),
            prefix: context.strip_prefix.to_owned(),
        });
    };
    let mut header = prepare_header(&metadata, context.timestamp);
    let write_error = |source| WriteError::WriteEntry {
        path: path.to_path_buf(),
        source,
    };

    if file_type.is_file() {
        let file = File::open(path).map_err(|source| WriteError::OpenSource {
            path: path.to_path_buf(),
            source,
        })?;
        // Never write more than the header announces, even if the file grows meanwhile.
        archive
            .append_data(&mut header, &name, file.take(metadata.len()))
            .map_err(write_error)?;
    } else {
        archive
            .append_data(&mut header, &name, std::io::empty())
            .map_err(write_error)?;
    }
    *entries += 1;

    let kind = if file_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    tracing::debug!("appended {} {} ({} bytes)", kind, name, header.size().unwrap_or(0));
    if let Some(reporter) = context.reporter {
        reporter.on_entry_written(&name, kind, header.size().unwrap_or(0));
    }

    if kind != EntryKind::Directory {
        return Ok(());
    }

    append_children(archive, path, context, entries)
}

/// Appends every child of the directory at `path` to the archive, in directory listing order.
fn append_children(
    archive: &mut tar::Builder<impl Write>,
    path: &Path,
    context: &WalkContext<'_>,
    entries: &mut usize,
) -> Result<(), WriteError> {
    let dir_path = with_trailing_separator(path);
    let read_dir = fs::read_dir(&dir_path).map_err(|source| WriteError::ReadDirectory {
        path: dir_path.clone(),
        source,
    })?;
    for child in read_dir {
        let child = child.map_err(|source| WriteError::ReadDirectory {
            path: dir_path.clone(),
            source,
        })?;
        append_path_to_archive(archive, &dir_path.join(child.file_name()), context, entries)?;
    }

    Ok(())
}

fn with_trailing_separator(path: &Path) -> PathBuf {
    let ends_with_separator = path
        .as_os_str()
        .as_encoded_bytes()
        .last()
        .is_some_and(|&b| std::path::is_separator(char::from(b)));
    if ends_with_separator {
        return path.to_path_buf();
    }
    let mut path = path.as_os_str().to_owned();
    path.push(std::path::MAIN_SEPARATOR_STR);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use std::path::MAIN_SEPARATOR;

    #[rstest]
    #[case("/backup/root/file", "/backup/root/", Some("file"))]
    #[case("/backup/root/dir/", "/backup/root/", Some("dir/"))]
    #[case("/backup/root/file", "/backup/root", Some("file"))]
    #[case("/backup/root/a/b/c", "/backup/", Some("root/a/b/c"))]
    #[case("/elsewhere/file", "/backup/root/", Some("elsewhere/file"))]
    #[case("/backup/root/", "/backup/root/", None)]
    fn test_entry_name(#[case] path: &str, #[case] prefix: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            entry_name(Path::new(path), prefix).as_deref(),
            expected
        );
    }

    #[test]
    fn test_entry_name_uses_forward_slashes() {
        let path = format!("root{MAIN_SEPARATOR}dir{MAIN_SEPARATOR}file");
        let prefix = format!("root{MAIN_SEPARATOR}");
        assert_eq!(
            entry_name(Path::new(&path), &prefix).as_deref(),
            Some("dir/file")
        );
    }

    #[test]
    fn test_with_trailing_separator() {
        let expected = format!("some{MAIN_SEPARATOR}dir{MAIN_SEPARATOR}");
        let with = with_trailing_separator(Path::new(&expected));
        assert_eq!(with.as_os_str(), expected.as_str());

        let without = format!("some{MAIN_SEPARATOR}dir");
        let with = with_trailing_separator(Path::new(&without));
        assert_eq!(with.as_os_str(), expected.as_str());
    }

    #[rstest]
    #[case(CompressionLevel::Lowest, 1)]
    #[case(CompressionLevel::Default, 6)]
    #[case(CompressionLevel::Highest, 9)]
    #[case(CompressionLevel::Numeric(0), 0)]
    fn test_gzip_levels(#[case] level: CompressionLevel, #[case] expected: u32) {
        assert_eq!(level.to_gzip_level().unwrap().level(), expected);
    }

    #[test]
    fn test_invalid_level_is_rejected_before_creating_the_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("out.tar.gz");
        let result = Archiver::new("")
            .with_compression(Compression::Gzip(CompressionLevel::Numeric(10)))
            .create_archive(&[temp_dir.path()], &target);
        assert_matches!(result, Err(WriteError::InvalidCompressionLevel(10)));
        assert!(!target.exists());
    }

    #[test]
    fn test_directory_headers_have_no_contents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("dir");
        fs::create_dir(&dir).unwrap();

        let (bytes, entries) = Archiver::new(format!("{}{MAIN_SEPARATOR}", temp_dir.path().display()))
            .write_archive(Vec::new(), &[&dir])
            .unwrap();
        assert_eq!(entries, 1);

        let mut archive = tar::Archive::new(bytes.as_slice());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert!(entry.header().entry_type().is_dir());
        assert_eq!(entry.header().size().unwrap(), 0);
        assert_eq!(entry.path().unwrap().to_string_lossy(), "dir");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("target");
        fs::write(&target, "contents").unwrap();
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let result = Archiver::new("").write_archive(Vec::new(), &[&link]);
        assert_matches!(result, Err(WriteError::UnsupportedFileType { path }) if path == link);
    }

    #[test]
    fn test_directory_equal_to_prefix_contributes_only_its_children() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("file"), "A").unwrap();
        let prefix = format!("{}{MAIN_SEPARATOR}", root.display());

        let (bytes, entries) = Archiver::new(prefix.as_str())
            .write_archive(Vec::new(), &[Path::new(&prefix)])
            .unwrap();
        assert_eq!(entries, 2);

        let mut archive = tar::Archive::new(bytes.as_slice());
        let names = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["sub", "sub/file"]);
    }

    #[test]
    fn test_file_equal_to_prefix_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, "A").unwrap();
        let prefix = file.display().to_string();

        let result = Archiver::new(prefix.as_str()).write_archive(Vec::new(), &[&file]);
        assert_matches!(result, Err(WriteError::EmptyEntryName { path, .. }) if path == file);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_errors_when_closing_the_destination_are_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, "A").unwrap();

        // Every write to /dev/full fails, but the small archive only reaches it when the
        // buffered file is flushed on close.
        let result = Archiver::new(format!("{}{MAIN_SEPARATOR}", temp_dir.path().display()))
            .create_archive(&[&file], Path::new("/dev/full"));
        assert_matches!(result, Err(WriteError::Finish(source)) if source.raw_os_error().is_some());
    }

    #[test]
    fn test_missing_source_names_the_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing");

        let result = Archiver::new("").write_archive(Vec::new(), &[&missing]);
        assert_matches!(result, Err(WriteError::Metadata { path, .. }) if path == missing);
    }
}
