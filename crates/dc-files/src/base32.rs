//! Base32 encoding for 24-byte content hashes (TTH digests).
//!
//! The wire format is RFC 4648 base32 without padding, uppercase, giving a
//! fixed 39-character string for every 24-byte digest. This is the only hash
//! string form accepted anywhere on the wire (`TTH:xxx`, `TTH/xxx`, `ID` in
//! `BINF`).

use data_encoding::BASE32_NOPAD;
use thiserror::Error;

/// Length in bytes of a decoded digest (Tiger Tree Hash root).
pub const DIGEST_LEN: usize = 24;

/// Length in characters of an encoded digest.
pub const ENCODED_LEN: usize = 39;

/// Errors from base32 encode/decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Base32Error {
    /// Input length does not match `ENCODED_LEN`.
    #[error("base32 string has wrong length: expected {ENCODED_LEN}, got {0}")]
    WrongLength(usize),

    /// Input contains a byte outside `A-Z2-7`.
    #[error("base32 string contains a character outside A-Z2-7")]
    InvalidSymbol,
}

/// Encode a 24-byte digest as an uppercase, unpadded 39-character string.
#[must_use]
pub fn encode(digest: &[u8; DIGEST_LEN]) -> String {
    BASE32_NOPAD.encode(digest)
}

/// Decode a 39-character base32 string into a 24-byte digest.
///
/// # Errors
///
/// Returns [`Base32Error::WrongLength`] if `s` is not 39 characters, or
/// [`Base32Error::InvalidSymbol`] if `s` contains a character outside
/// `A-Z2-7`.
pub fn decode(s: &str) -> Result<[u8; DIGEST_LEN], Base32Error> {
    if s.len() != ENCODED_LEN {
        return Err(Base32Error::WrongLength(s.len()));
    }

    let bytes = BASE32_NOPAD
        .decode(s.as_bytes())
        .map_err(|_| Base32Error::InvalidSymbol)?;

    bytes
        .try_into()
        .map_err(|v: Vec<u8>| Base32Error::WrongLength(v.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_known_digest() {
        let digest = [0x42u8; DIGEST_LEN];
        let encoded = encode(&digest);
        assert_eq!(encoded.len(), ENCODED_LEN);
        assert_eq!(decode(&encoded).unwrap(), digest);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(decode("AAAA"), Err(Base32Error::WrongLength(4)));
    }

    #[test]
    fn rejects_invalid_symbol() {
        // '0' and '1' are not in the RFC 4648 base32 alphabet.
        let s = "0".repeat(ENCODED_LEN);
        assert_eq!(decode(&s), Err(Base32Error::InvalidSymbol));
    }

    #[test]
    fn encode_is_uppercase() {
        let digest = [0xFFu8; DIGEST_LEN];
        let encoded = encode(&digest);
        assert!(encoded.chars().all(|c| !c.is_ascii_lowercase()));
    }
}
