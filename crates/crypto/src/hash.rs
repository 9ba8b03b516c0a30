//! SHA-512 via dcrypt.

use crate::error::CryptoError;
use dcrypt::algorithms::hash::sha2::Sha512 as DcryptSha512;
use dcrypt::algorithms::hash::HashFunction as DcryptHashFunction;
use dcrypt::algorithms::ByteSerializable;

/// Size of a SHA-512 digest in bytes.
pub const SHA512_SIZE: usize = 64;

/// SHA-512 of a byte string.
pub fn sha512<T: AsRef<[u8]>>(data: T) -> Result<[u8; SHA512_SIZE], CryptoError> {
    let digest = DcryptSha512::digest(data.as_ref()).map_err(dcrypt::Error::from)?;
    digest
        .to_bytes()
        .try_into()
        .map_err(|bytes: Vec<u8>| CryptoError::InvalidHashLength {
            expected: SHA512_SIZE,
            got: bytes.len(),
        })
}

/// SHA-512 of the concatenation of two byte strings. Used for Merkle
/// interior nodes so callers never materialize the joined buffer twice.
pub fn sha512_concat(first: &[u8], second: &[u8]) -> Result<[u8; SHA512_SIZE], CryptoError> {
    let mut joined = Vec::with_capacity(first.len() + second.len());
    joined.extend_from_slice(first);
    joined.extend_from_slice(second);
    sha512(&joined)
}
