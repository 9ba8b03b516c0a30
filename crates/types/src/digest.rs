//! The 512-bit opaque identifier used for every hash and long id.

use crate::error::CodecError;
use pqledger_crypto::{hash, CryptoError};
use std::fmt;

/// Length of a digest in bytes.
pub const DIGEST_LEN: usize = 64;

/// A 512-bit opaque byte string: block ids, transaction ids, account ids,
/// Merkle roots. The all-zero digest doubles as the "unset" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// The all-zero digest.
    pub const ZERO: Digest = Digest([0u8; DIGEST_LEN]);

    pub fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// SHA-512 of arbitrary bytes.
    pub fn sha512_of(data: &[u8]) -> Result<Digest, CryptoError> {
        Ok(Digest(hash::sha512(data)?))
    }

    /// SHA-512 of the concatenation of two digests (Merkle interior node).
    pub fn hash_pair(first: &Digest, second: &Digest) -> Result<Digest, CryptoError> {
        Ok(Digest(hash::sha512_concat(&first.0, &second.0)?))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Digest, CodecError> {
        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidValue(format!("digest must be {DIGEST_LEN} bytes")))?;
        Ok(Digest(arr))
    }

    pub fn from_hex(s: &str) -> Result<Digest, CodecError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| CodecError::InvalidValue(format!("invalid hex digest: {e}")))?;
        Digest::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(8);
        s
    }
}

impl Default for Digest {
    fn default() -> Self {
        Digest::ZERO
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let d = Digest::sha512_of(b"roundtrip").unwrap();
        let again = Digest::from_hex(&d.to_hex()).unwrap();
        assert_eq!(d, again);
    }

    #[test]
    fn zero_sentinel() {
        assert!(Digest::ZERO.is_zero());
        assert!(!Digest::sha512_of(b"x").unwrap().is_zero());
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(Digest::from_hex("abcd").is_err());
    }
}
