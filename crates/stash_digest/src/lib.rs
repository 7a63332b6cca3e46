#![deny(missing_docs)]

//! Utility functions for computing hashes of archives while they are being written, using the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) library.
//!
//! Any hashing algorithm that implements the [`Digest`] trait can be used with the functions and
//! adapters in this crate. Archives produced by `stash` are identified by the SHA1 hash of their
//! bytes, rendered as standard base64 (the form used by RFC 3230 `Digest` headers).
//!
//! # Examples
//!
//! ```no_run
//! use stash_digest::{compute_file_digest, encode_base64, Sha1};
//!
//! let hash = compute_file_digest::<Sha1>("backup.tar.gz").unwrap();
//! println!("SHA1 hash: {}", encode_base64::<Sha1>(&hash));
//! ```
//!
//! # Available functions
//!
//! - [`compute_file_digest`]: Computes the hash of a file on disk.
//! - [`encode_base64`] and [`parse_digest_from_base64`]: Convert digests to and from their
//!   base64 representation.
//! - [`HashingWriter`]: An object that wraps a writable object and implements [`Write`]. It
//!   forwards the data to the wrapped object but also computes the hash of the content on the
//!   fly.

pub use digest;

use base64::{engine::general_purpose::STANDARD, Engine};
use digest::{Digest, Output};
use std::{fs::File, io::Write, path::Path};

pub use sha1::Sha1;

/// A type alias for the output of a SHA1 hash.
pub type Sha1Hash = sha1::digest::Output<Sha1>;

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;

    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;

    Ok(hasher.finalize())
}

/// Encodes a digest as a standard (padded) base64 string.
pub fn encode_base64<D: Digest>(hash: &Output<D>) -> String {
    STANDARD.encode(hash)
}

/// Parses a standard base64 string to a digest. Returns `None` if the string is not valid base64
/// or does not decode to the output size of `D`.
pub fn parse_digest_from_base64<D: Digest>(str: &str) -> Option<Output<D>> {
    let bytes = STANDARD.decode(str.trim()).ok()?;
    if bytes.len() != <D as Digest>::output_size() {
        return None;
    }
    let mut hash = <Output<D>>::default();
    hash.copy_from_slice(&bytes);
    Some(hash)
}

/// A simple object that provides a [`Write`] implementation that also immediately hashes the bytes
/// written to it. Call [`HashingWriter::finalize`] to retrieve both the original `impl Write`
/// object as well as the hash.
///
/// Only the bytes accepted by the wrapped writer are hashed, so the hash always matches what
/// actually reached the underlying sink.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
    bytes_written: u64,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Constructs a new instance from a writer and a new (empty) hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Default::default(),
            bytes_written: 0,
        }
    }
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Returns the number of bytes that have been written through this instance so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Consumes this instance and returns the original writer and the hash of all bytes written to
    /// this instance.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        self.bytes_written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
