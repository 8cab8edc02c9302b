#![deny(missing_docs)]

//! Checksum primitives used throughout the krait package manager.
//!
//! This crate wraps the algorithms of the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) family behind a
//! couple of convenience functions and adapters. Package archives are verified
//! by SHA256 (or MD5 for older repodata that lacks a SHA256 field), and linked
//! files record their SHA256 in the prefix metadata.
//!
//! The central pieces are:
//!
//! - [`compute_file_digest`] / [`compute_bytes_digest`] for one-shot hashing,
//! - [`HashingWriter`] and [`HashingReader`] to compute a digest while data is
//!   streamed to or from somewhere else,
//! - [`serde`] helper modules for (de)serializing optional hashes as hex
//!   strings in JSON documents such as `repodata.json` and prefix records.

pub use digest;
use digest::{Digest, Output};
use std::io::{Read, Write};
use std::{fs::File, path::Path};

pub use md5::Md5;
pub use sha2::Sha256;

pub mod serde;

/// The output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// The output of an MD5 hash.
pub type Md5Hash = md5::digest::Output<Md5>;

/// Computes the digest of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Computes the digest of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hex encoded digest. Returns `None` if the string is not valid hex
/// or has the wrong length for the algorithm.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// Formats a digest as a lowercase hex string.
pub fn format_digest<D: Digest>(hash: &Output<D>) -> String
where
    <D as digest::OutputSizeUser>::OutputSize: std::ops::Add,
    <<D as digest::OutputSizeUser>::OutputSize as std::ops::Add>::Output:
        digest::generic_array::ArrayLength<u8>,
{
    format!("{hash:x}")
}

/// A [`Write`] adapter that hashes everything written through it. Call
/// [`HashingWriter::finalize`] to get back the inner writer together with the
/// digest of all bytes that passed through.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Wraps a writer with a fresh hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: D::default(),
        }
    }
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Consumes this instance and returns the inner writer and the digest of
    /// all bytes written to it.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// The [`Read`] counterpart of [`HashingWriter`].
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
}

impl<R, D: Digest + Default> HashingReader<R, D> {
    /// Wraps a reader with a fresh hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: D::default(),
        }
    }
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Consumes this instance and returns the inner reader and the digest of
    /// all bytes read from it.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: Read, D: Digest> Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes_read]);
        Ok(bytes_read)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    #[case(
        "1234567890",
        "c775e7b757ede630cd0aa1113bd102661ab38829ca52a6422ab782862f268646"
    )]
    #[case(
        "Hello, world!",
        "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
    )]
    fn test_file_digest(#[case] input: &str, #[case] expected: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("data");
        std::fs::write(&file_path, input).unwrap();
        let hash = compute_file_digest::<Sha256>(&file_path).unwrap();
        assert_eq!(format_digest::<Sha256>(&hash), expected);
    }

    #[test]
    fn test_hashing_writer_matches_bytes_digest() {
        let mut writer = HashingWriter::<_, Sha256>::new(Vec::new());
        writer.write_all(b"some package bytes").unwrap();
        let (bytes, hash) = writer.finalize();
        assert_eq!(bytes, b"some package bytes");
        assert_eq!(hash, compute_bytes_digest::<Sha256>(b"some package bytes"));
    }

    #[test]
    fn test_parse_digest_rejects_wrong_length() {
        assert!(parse_digest_from_hex::<Sha256>("abcd").is_none());
        assert!(parse_digest_from_hex::<Md5>("zz").is_none());
    }
}
