//! The `fsverity_formatted_digest` record that the kernel's builtin signature support verifies.
//!
//! Layout, all integers little-endian, no padding:
//! - `[0..8]`: `"FSVerity"`
//! - `[8..10]`: hash algorithm id
//! - `[10..12]`: digest size in bytes
//! - `[12..]`: the digest
//!
//! See <https://www.kernel.org/doc/html/latest/filesystems/fsverity.html#built-in-signature-verification>

use thiserror::Error;

use crate::config::*;
use crate::digest::FileDigest;

pub const SIGNED_DIGEST_MAGIC: &[u8; 8] = b"FSVerity";

/// Size of everything before the digest bytes.
pub const SIGNED_DIGEST_HEADER_SIZE: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignedDigestError {
    #[error("record is {0} bytes, shorter than the header")]
    TooShort(usize),
    #[error("bad magic")]
    BadMagic,
    #[error("header says {declared} digest bytes, record has {actual}")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("unknown hash algorithm id {0}")]
    UnknownAlgorithm(u16),
}

/// Serializes `digest` into the record a builtin-signature signer expects.
pub fn signed_digest(digest: &FileDigest) -> Vec<u8> {
    let algorithm = u16::from(u8::from(digest.algorithm));
    let size = digest.size() as u16;

    let mut buf = Vec::with_capacity(SIGNED_DIGEST_HEADER_SIZE + digest.size());
    buf.extend_from_slice(SIGNED_DIGEST_MAGIC);
    buf.extend_from_slice(&algorithm.to_le_bytes());
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&digest.bytes);
    buf
}

/// Reads a record produced by [`signed_digest`] back into a [`FileDigest`].
pub fn parse_signed_digest(record: &[u8]) -> Result<FileDigest, SignedDigestError> {
    if record.len() < SIGNED_DIGEST_HEADER_SIZE {
        return Err(SignedDigestError::TooShort(record.len()));
    }
    let (header, bytes) = record.split_at(SIGNED_DIGEST_HEADER_SIZE);
    if &header[..8] != SIGNED_DIGEST_MAGIC {
        return Err(SignedDigestError::BadMagic);
    }
    let algorithm = u16::from_le_bytes([header[8], header[9]]);
    let declared = u16::from_le_bytes([header[10], header[11]]) as usize;
    if declared != bytes.len() {
        return Err(SignedDigestError::SizeMismatch { declared, actual: bytes.len() });
    }
    let algorithm = u8::try_from(algorithm)
        .ok()
        .and_then(|id| InnerHashAlgorithm::try_from(id).ok())
        .ok_or(SignedDigestError::UnknownAlgorithm(algorithm))?;

    Ok(FileDigest { algorithm, bytes: bytes.into() })
}
