//! Tiger Tree Hash (TTH) hash-tree blobs.
//!
//! Computing a TTH digest is out of scope here (the background hasher
//! produces it); this module only validates the shape of a stored
//! hash-tree blob and answers the questions the rest of the crate needs
//! about it: how many leaves a file of a given size has, and whether a
//! blob that claims to cover it has a sane length.

use crate::base32::DIGEST_LEN;
use thiserror::Error;

/// Size in bytes of a single TTH leaf.
pub const LEAF_SIZE: u64 = 1024;

/// Errors validating a hash-tree blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TthError {
    /// Blob length is not a multiple of the digest size.
    #[error("hash-tree blob length {0} is not a multiple of {DIGEST_LEN}")]
    Misaligned(usize),

    /// Blob is empty.
    #[error("hash-tree blob is empty")]
    Empty,

    /// Blob's leaf count does not match the file size it claims to cover.
    #[error("hash-tree blob has {actual} leaves, expected {expected} for a {size}-byte file")]
    LeafCountMismatch {
        /// Number of leaves found in the blob.
        actual: u64,
        /// Number of leaves expected for `size`.
        expected: u64,
        /// The file size the blob claims to cover.
        size: u64,
    },
}

/// Number of 1 KiB leaves a file of `size` bytes has (minimum one, even for
/// an empty file).
#[must_use]
pub fn leaf_count(size: u64) -> u64 {
    size.div_ceil(LEAF_SIZE).max(1)
}

/// Split a hash-tree blob into its leaf digests.
///
/// # Errors
///
/// Returns [`TthError::Empty`] for an empty blob, or
/// [`TthError::Misaligned`] if `blob.len()` is not a multiple of
/// [`DIGEST_LEN`].
pub fn parse_leaves(blob: &[u8]) -> Result<Vec<[u8; DIGEST_LEN]>, TthError> {
    if blob.is_empty() {
        return Err(TthError::Empty);
    }
    if blob.len() % DIGEST_LEN != 0 {
        return Err(TthError::Misaligned(blob.len()));
    }

    Ok(blob
        .chunks_exact(DIGEST_LEN)
        .map(|c| c.try_into().expect("chunk is exactly DIGEST_LEN"))
        .collect())
}

/// Validate that a hash-tree blob's leaf count matches the file size it is
/// supposed to cover.
///
/// # Errors
///
/// Propagates [`parse_leaves`] errors, or returns
/// [`TthError::LeafCountMismatch`] if the blob's leaf count is wrong for
/// `file_size`.
pub fn verify_blob(blob: &[u8], file_size: u64) -> Result<(), TthError> {
    let leaves = parse_leaves(blob)?;
    let expected = leaf_count(file_size);
    let actual = leaves.len() as u64;
    if actual != expected {
        return Err(TthError::LeafCountMismatch {
            actual,
            expected,
            size: file_size,
        });
    }
    Ok(())
}
