//! Functions that enable extracting or listing an archive from objects that implement the
//! [`std::io::Read`] trait.

use std::fs::{DirBuilder, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;
use flate2::bufread::MultiGzDecoder;

use crate::{ArchivedEntry, EntryKind, ExtractError, Reporter};

/// The two magic bytes every gzip member starts with.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Recreates the files and directories stored in an archive.
///
/// Entries are processed in stream order. Directories are created together with any missing
/// ancestors, but the parent directory of a file must have been extracted before the file
/// itself, which is always the case for archives written by [`crate::write::Archiver`].
#[derive(Clone, Default)]
pub struct Extractor {
    gzip: bool,
    reporter: Option<Arc<dyn Reporter>>,
}

impl Extractor {
    /// Constructs a new extractor for plain tar archives.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the archive is gzip compressed.
    pub fn with_gzip(self, gzip: bool) -> Self {
        Self { gzip, ..self }
    }

    /// Sets the reporter that is notified of every extracted entry.
    pub fn with_reporter(self, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            reporter: Some(reporter),
            ..self
        }
    }

    /// Extracts the archive file at `archive` into `destination`.
    ///
    /// Files extracted before an error occurred are left on disk.
    pub fn extract_archive(&self, archive: &Path, destination: &Path) -> Result<(), ExtractError> {
        let reader = open_archive(archive, self.gzip)?;
        let entries = self.unpack(reader, destination)?;
        tracing::info!(
            "extracted {} entries from {} to {}",
            entries,
            archive.display(),
            destination.display()
        );
        Ok(())
    }

    /// Extracts an uncompressed tar stream into `destination`. Returns the number of entries
    /// that were extracted.
    pub fn unpack(&self, reader: impl Read, destination: &Path) -> Result<usize, ExtractError> {
        let mut archive = tar::Archive::new(reader);
        let mut extracted = 0;

        for entry in archive.entries().map_err(ExtractError::ReadHeader)? {
            let mut entry = entry.map_err(ExtractError::ReadHeader)?;
            let raw_path = entry.path().map_err(ExtractError::ReadHeader)?.into_owned();
            let Some(normalized_path) = normalize_archive_path(&raw_path)? else {
                continue; // Skip "." entries
            };
            let dest_path = destination.join(&normalized_path);

            let header = entry.header();
            let entry_type = header.entry_type();
            let mode = header.mode().map_err(ExtractError::ReadHeader)? & 0o7777;
            let mtime = header.mtime().map_err(ExtractError::ReadHeader)?;
            let size = entry.size();

            let kind = if entry_type.is_dir() {
                create_directory(&dest_path, mode)?;
                EntryKind::Directory
            } else if matches!(entry_type, tar::EntryType::Regular | tar::EntryType::Continuous) {
                write_file(&dest_path, &raw_path, &mut entry, mode, mtime)?;
                EntryKind::File
            } else {
                tracing::warn!(
                    "skipping unsupported {:?} entry in tar archive: {}",
                    entry_type,
                    raw_path.display()
                );
                if let Some(reporter) = &self.reporter {
                    reporter.on_entry_skipped(&raw_path.to_string_lossy(), entry_type);
                }
                continue;
            };

            extracted += 1;
            tracing::debug!("extracted {} {}", kind, dest_path.display());
            if let Some(reporter) = &self.reporter {
                reporter.on_entry_extracted(&dest_path, kind, size);
            }
        }

        if let Some(reporter) = &self.reporter {
            reporter.on_complete(extracted);
        }
        Ok(extracted)
    }
}

/// Opens an archive file for reading, wrapping it in a gzip decoder if `gzip` is true.
pub(crate) fn open_archive(archive: &Path, gzip: bool) -> Result<Box<dyn Read>, ExtractError> {
    let file = File::open(archive).map_err(|source| ExtractError::OpenArchive {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    if !gzip {
        return Ok(Box::new(reader));
    }

    let header = reader.fill_buf().map_err(|source| ExtractError::OpenArchive {
        path: archive.to_path_buf(),
        source,
    })?;
    if !header.starts_with(&GZIP_MAGIC) {
        return Err(ExtractError::NotGzip {
            path: archive.to_path_buf(),
        });
    }
    Ok(Box::new(MultiGzDecoder::new(reader)))
}

/// Returns the headers of all entries in an uncompressed tar stream, in stream order.
pub fn list_entries(reader: impl Read) -> Result<Vec<ArchivedEntry>, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut result = Vec::new();
    for entry in archive.entries().map_err(ExtractError::ReadHeader)? {
        let entry = entry.map_err(ExtractError::ReadHeader)?;
        let header = entry.header();
        let entry_type = header.entry_type();
        let kind = if entry_type.is_dir() {
            EntryKind::Directory
        } else if matches!(entry_type, tar::EntryType::Regular | tar::EntryType::Continuous) {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        result.push(ArchivedEntry {
            name: entry
                .path()
                .map_err(ExtractError::ReadHeader)?
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/"),
            kind,
            size: entry.size(),
            mode: header.mode().map_err(ExtractError::ReadHeader)? & 0o7777,
            mtime: header.mtime().map_err(ExtractError::ReadHeader)?,
        });
    }
    Ok(result)
}

/// Normalizes a path from an archive so it can safely be joined with the destination.
///
/// Leading `/` and `.` components are dropped. Any `..` component is rejected to prevent path
/// traversal. Returns `None` if nothing is left.
fn normalize_archive_path(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut result = PathBuf::with_capacity(path.as_os_str().len());
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Err(ExtractError::PathTraversal(path.to_path_buf())),
            Component::Normal(part) => result.push(part),
        }
    }

    if result.as_os_str().is_empty() {
        return Ok(None);
    }

    Ok(Some(result))
}

fn create_directory(path: &Path, mode: u32) -> Result<(), ExtractError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    builder
        .create(path)
        .map_err(|source| ExtractError::CreateDirectory {
            path: path.to_path_buf(),
            source,
        })
}

/// Streams `contents` into a new file at `path` and applies the mode and modification time from
/// the header. The parent directory must already exist.
///
/// Nothing is buffered up front, the size announced by the header is not trusted.
fn write_file(
    path: &Path,
    entry_path: &Path,
    contents: &mut impl Read,
    mode: u32,
    mtime: u64,
) -> Result<(), ExtractError> {
    let mut file = File::create(path).map_err(|source| ExtractError::CreateFile {
        path: path.to_path_buf(),
        source,
    })?;

    let mut contents = BufReader::new(contents);
    loop {
        let chunk = contents
            .fill_buf()
            .map_err(|source| ExtractError::ReadContents {
                path: entry_path.to_path_buf(),
                source,
            })?;
        if chunk.is_empty() {
            break;
        }
        file.write_all(chunk)
            .map_err(|source| ExtractError::WriteFile {
                path: path.to_path_buf(),
                source,
            })?;
        let len = chunk.len();
        contents.consume(len);
    }

    if mtime > 0 {
        let mtime = FileTime::from_unix_time(i64::try_from(mtime).unwrap_or(i64::MAX), 0);
        filetime::set_file_handle_times(&file, None, Some(mtime)).map_err(|source| {
            ExtractError::SetModificationTime {
                path: path.to_path_buf(),
                source,
            }
        })?;
    }

    let permissions = set_mode(&file, mode);
    drop(file);
    permissions.map_err(|source| ExtractError::SetPermissions {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(file: &File, mode: u32) -> std::io::Result<()> {
    let mut permissions = file.metadata()?.permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    file.set_permissions(permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;

    /// Helper to build tar archives with arbitrary paths (including ones that
    /// `tar::Builder` rejects).
    fn raw_tar_archive(path: &[u8], type_flag: u8, content: &[u8]) -> Vec<u8> {
        let mut size = [0u8; 12];
        size[..11].copy_from_slice(format!("{:011o}", content.len()).as_bytes());
        raw_tar_archive_with_size(path, type_flag, size, content)
    }

    /// Like [`raw_tar_archive`] but with the raw bytes of the size field, which may disagree
    /// with the actual length of `content`.
    fn raw_tar_archive_with_size(
        path: &[u8],
        type_flag: u8,
        size: [u8; 12],
        content: &[u8],
    ) -> Vec<u8> {
        let mut header = [0u8; 512];

        let path_len = path.len().min(100);
        header[..path_len].copy_from_slice(&path[..path_len]);
        header[100..107].copy_from_slice(b"0000644");
        header[108..115].copy_from_slice(b"0000000");
        header[116..123].copy_from_slice(b"0000000");
        header[124..136].copy_from_slice(&size);
        header[136..147].copy_from_slice(b"00000000000");
        header[156] = type_flag;
        header[257..262].copy_from_slice(b"ustar");
        header[263..265].copy_from_slice(b"00");

        header[148..156].copy_from_slice(b"        ");
        let checksum: u32 = header.iter().map(|&b| u32::from(b)).sum();
        let checksum_str = format!("{checksum:06o}\0 ");
        header[148..156].copy_from_slice(checksum_str.as_bytes());

        let mut archive_data = header.to_vec();
        archive_data.extend_from_slice(content);
        let padding = (512 - (content.len() % 512)) % 512;
        archive_data.extend(std::iter::repeat_n(0u8, padding));
        archive_data.extend_from_slice(&[0u8; 1024]);
        archive_data
    }

    #[test]
    fn test_normalize_archive_path() {
        assert_eq!(
            normalize_archive_path(Path::new("/abs/file")).unwrap(),
            Some(PathBuf::from("abs/file"))
        );
        assert_eq!(
            normalize_archive_path(Path::new("./dir/./file")).unwrap(),
            Some(PathBuf::from("dir/file"))
        );
        assert_eq!(normalize_archive_path(Path::new(".")).unwrap(), None);
        assert_matches!(
            normalize_archive_path(Path::new("dir/../../etc/passwd")),
            Err(ExtractError::PathTraversal(_))
        );
    }

    #[test]
    fn test_path_traversal_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let destination = temp_dir.path().join("out");
        std::fs::create_dir(&destination).unwrap();

        let archive = raw_tar_archive(b"../escaped", b'0', b"evil");
        let result = Extractor::new().unpack(Cursor::new(archive), &destination);

        assert_matches!(result, Err(ExtractError::PathTraversal(_)));
        assert!(!temp_dir.path().join("escaped").exists());
    }

    #[test]
    fn test_absolute_paths_stay_inside_the_destination() {
        let temp_dir = tempfile::tempdir().unwrap();

        let archive = raw_tar_archive(b"/top", b'0', b"B");
        let extracted = Extractor::new()
            .unpack(Cursor::new(archive), temp_dir.path())
            .unwrap();

        assert_eq!(extracted, 1);
        assert_eq!(std::fs::read(temp_dir.path().join("top")).unwrap(), b"B");
    }

    #[test]
    fn test_old_style_regular_file_flag() {
        let temp_dir = tempfile::tempdir().unwrap();

        // Pre-POSIX archives mark regular files with a NUL type flag.
        let archive = raw_tar_archive(b"legacy", 0, b"v7");
        Extractor::new()
            .unpack(Cursor::new(archive), temp_dir.path())
            .unwrap();

        assert_eq!(std::fs::read(temp_dir.path().join("legacy")).unwrap(), b"v7");
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_fifo_entries_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();

        let archive = raw_tar_archive(b"pipe", b'6', b"");
        let extracted = Extractor::new()
            .unpack(Cursor::new(archive), temp_dir.path())
            .unwrap();

        assert_eq!(extracted, 0);
        assert!(!temp_dir.path().join("pipe").exists());
        assert!(logs_contain("skipping unsupported"));
    }

    #[test]
    fn test_huge_declared_size_is_a_read_error() {
        let temp_dir = tempfile::tempdir().unwrap();

        // GNU base-256 encoding of 2^61 bytes, followed by only five bytes of contents.
        let mut size = [0u8; 12];
        size[0] = 0x80;
        size[4] = 0x20;
        let archive = raw_tar_archive_with_size(b"file", b'0', size, b"short");
        let result = Extractor::new().unpack(Cursor::new(archive), temp_dir.path());

        assert_matches!(
            result,
            Err(ExtractError::ReadHeader(_) | ExtractError::ReadContents { .. })
        );
    }

    #[test]
    fn test_not_gzip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let archive = temp_dir.path().join("plain.tar");
        std::fs::write(&archive, raw_tar_archive(b"file", b'0', b"A")).unwrap();

        let result = Extractor::new()
            .with_gzip(true)
            .extract_archive(&archive, temp_dir.path());
        assert_matches!(result, Err(ExtractError::NotGzip { path }) if path == archive);
    }

    #[test]
    fn test_missing_archive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let archive = temp_dir.path().join("missing.tar");

        let result = Extractor::new().extract_archive(&archive, temp_dir.path());
        assert_matches!(result, Err(ExtractError::OpenArchive { path, .. }) if path == archive);
    }

    #[test]
    fn test_list_entries() {
        let archive = raw_tar_archive(b"dir/file", b'0', b"hello");
        let entries = list_entries(Cursor::new(archive)).unwrap();
        assert_eq!(
            entries,
            vec![ArchivedEntry {
                name: String::from("dir/file"),
                kind: EntryKind::File,
                size: 5,
                mode: 0o644,
                mtime: 0,
            }]
        );
    }
}
