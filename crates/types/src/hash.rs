//! 32-byte hash primitive and SHA-256 helpers.

use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte hash.
///
/// All protocol hashing is SHA-256; identifiers that must be bound to signed
/// payloads (transaction ids, hashes-to-sign) use double SHA-256.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The all-zero hash. Used as the genesis accumulator.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// SHA-256 of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        Hash(Sha256::digest(data).into())
    }

    /// Double SHA-256 of `data`.
    pub fn sha256_twice(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        Hash(Sha256::digest(first).into())
    }

    /// Access the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Copy out the raw bytes.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Parse from a hex string (64 characters).
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = hex::decode(s).map_err(|_| HexError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| HexError::InvalidLength)?;
        Ok(Hash(arr))
    }
}

/// Errors parsing a hash from hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("expected 32 bytes")]
    InvalidLength,
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncated form: enough to distinguish in logs without drowning them.
        write!(f, "{}..", &hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

/// Incremental SHA-256 over multiple slices.
///
/// Used where the hashed payload is a concatenation of fields and building an
/// intermediate buffer would be wasteful (accumulator chaining, vertex ids).
pub(crate) struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Hasher(Sha256::new())
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.0.update(data.as_ref());
        self
    }

    pub fn finalize(self) -> Hash {
        Hash(self.0.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_sha256_matches_two_rounds() {
        let data = b"cascade";
        let once = Hash::sha256(data);
        assert_eq!(Hash::sha256_twice(data), Hash::sha256(once.as_bytes()));
    }

    #[test]
    fn hex_round_trip() {
        let h = Hash::sha256(b"round trip");
        let parsed = Hash::from_hex(&h.to_string()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn rejects_short_hex() {
        assert_eq!(Hash::from_hex("abcd"), Err(HexError::InvalidLength));
    }
}
