#![deny(missing_docs)]

//! This crate provides the ability to create tar backup archives, optionally gzip compressed,
//! from a list of files and directories, and to extract them again.
//!
//! While an archive is written, the bytes that end up on disk are hashed on the fly. The
//! resulting SHA1 digest, encoded as standard base64, identifies the archive and can later be
//! checked with [`fs::verify_archive`].
//!
//! ```rust,no_run
//! # use std::path::{Path, PathBuf};
//! let paths = vec![PathBuf::from("/srv/data/db"), PathBuf::from("/srv/data/config.toml")];
//! let digest = stash_archive::fs::create_archive(
//!     &paths,
//!     Path::new("/backups/data.tar.gz"),
//!     "/srv/data/",
//!     true,
//! )
//! .unwrap();
//! println!("{digest}");
//!
//! stash_archive::fs::extract_archive(
//!     Path::new("/backups/data.tar.gz"),
//!     Path::new("/srv/restored"),
//!     true,
//! )
//! .unwrap();
//! ```

use std::path::PathBuf;

use stash_digest::{Sha1, Sha1Hash};

pub mod fs;
pub mod read;
mod reporter;
pub mod write;

pub use reporter::Reporter;

/// An error that can occur when writing an archive.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum WriteError {
    #[error("gzip compression level must be between 0 and 9, got {0}")]
    InvalidCompressionLevel(u32),

    #[error("cannot create archive file {}", .path.display())]
    CreateDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read metadata of {}", .path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open {}", .path.display())]
    OpenSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error reading directory {}", .path.display())]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a regular file or a directory", .path.display())]
    UnsupportedFileType { path: PathBuf },

    #[error("{} is empty after stripping the prefix {prefix:?}", .path.display())]
    EmptyEntryName { path: PathBuf, prefix: String },

    #[error("cannot write {} to the archive", .path.display())]
    WriteEntry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error closing the archive")]
    Finish(#[source] std::io::Error),
}

/// An error that can occur when extracting or listing an archive.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum ExtractError {
    #[error("cannot open archive file {}", .path.display())]
    OpenArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot uncompress {}: not a gzip stream", .path.display())]
    NotGzip { path: PathBuf },

    #[error("failed while reading tar header")]
    ReadHeader(#[source] std::io::Error),

    #[error("failed while reading tar contents of {}", .path.display())]
    ReadContents {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path traversal attempt in archive: {}", .0.display())]
    PathTraversal(PathBuf),

    #[error("cannot extract directory {}", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create file {}", .path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("some of the tar contents cannot be written to {}", .path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot set proper mode on file {}", .path.display())]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot set modification time on file {}", .path.display())]
    SetModificationTime {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An error that can occur when verifying the digest of an archive.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum VerifyError {
    #[error("{0:?} is not a base64 encoded SHA1 digest")]
    InvalidDigest(String),

    #[error("cannot read archive file {}", .path.display())]
    ReadArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The hash algorithm used to identify archives. SHA1 rendered as base64 is what RFC 3230
/// `Digest` headers carry.
pub type ArchiveDigest = Sha1;

/// The kind of an entry in an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A regular file, its contents follow the header.
    File,
    /// A directory, never has any contents.
    Directory,
    /// Any other tar entry type (links, devices, fifos, ...). Never written by [`write::Archiver`].
    Other,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntryKind::File => "file",
            EntryKind::Directory => "dir",
            EntryKind::Other => "other",
        };
        f.pad(name)
    }
}

/// Result struct returned when an archive has been written to disk.
#[derive(Debug)]
pub struct ArchiveResult {
    /// The SHA1 hash of the bytes written to the archive file.
    pub sha1: Sha1Hash,

    /// The number of entries in the archive.
    pub entries: usize,

    /// The size of the archive file in bytes.
    pub total_size: u64,
}

impl ArchiveResult {
    /// Returns the digest of the archive as a standard base64 string.
    pub fn digest(&self) -> String {
        stash_digest::encode_base64::<ArchiveDigest>(&self.sha1)
    }
}

/// A single entry as recorded in the header of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedEntry {
    /// The name of the entry, always separated by forward slashes.
    pub name: String,
    /// The type of the entry.
    pub kind: EntryKind,
    /// The size of the contents in bytes.
    pub size: u64,
    /// The permission bits.
    pub mode: u32,
    /// The modification time in seconds since the unix epoch.
    pub mtime: u64,
}
