//! The deterministic binary codec for all consensus-critical objects.
//!
//! Encoding is little-endian and densely packed: identical inputs always
//! yield identical bytes, because these bytes are hashed, signed, and
//! compared across nodes. Encoders refuse to run when a required field is
//! unset or the output would not fit; decoders refuse short buffers.

use crate::digest::{Digest, DIGEST_LEN};
use crate::error::CodecError;

/// An object with a canonical binary form.
pub trait Encodable: Sized {
    /// Exact size of the canonical form in bytes. Fails when the object is
    /// not yet serializable (e.g. the signature is missing).
    fn encoded_len(&self) -> Result<usize, CodecError>;

    /// Write the canonical form at `offset`, advancing it.
    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError>;

    /// Read the canonical form from `offset`, advancing it.
    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError>;

    /// Encode into a freshly allocated buffer.
    fn encode_to_vec(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; self.encoded_len()?];
        let mut offset = 0;
        self.encode_into(&mut buf, &mut offset)?;
        Ok(buf)
    }

    /// Decode a buffer that must contain exactly one object.
    fn decode_exact(buf: &[u8]) -> Result<Self, CodecError> {
        let mut offset = 0;
        let value = Self::decode_from(buf, &mut offset)?;
        if offset != buf.len() {
            return Err(CodecError::InvalidValue(format!(
                "trailing bytes after object: {} of {}",
                buf.len() - offset,
                buf.len()
            )));
        }
        Ok(value)
    }
}

pub fn write_u32(buf: &mut [u8], offset: &mut usize, value: u32) -> Result<(), CodecError> {
    let end = offset.checked_add(4).ok_or(CodecError::BufferTooSmall)?;
    buf.get_mut(*offset..end)
        .ok_or(CodecError::BufferTooSmall)?
        .copy_from_slice(&value.to_le_bytes());
    *offset = end;
    Ok(())
}

pub fn read_u32(buf: &[u8], offset: &mut usize) -> Result<u32, CodecError> {
    let end = offset.checked_add(4).ok_or(CodecError::UnexpectedEnd)?;
    let bytes = buf.get(*offset..end).ok_or(CodecError::UnexpectedEnd)?;
    let arr: [u8; 4] = bytes.try_into().map_err(|_| CodecError::UnexpectedEnd)?;
    *offset = end;
    Ok(u32::from_le_bytes(arr))
}

pub fn write_i64(buf: &mut [u8], offset: &mut usize, value: i64) -> Result<(), CodecError> {
    let end = offset.checked_add(8).ok_or(CodecError::BufferTooSmall)?;
    buf.get_mut(*offset..end)
        .ok_or(CodecError::BufferTooSmall)?
        .copy_from_slice(&value.to_le_bytes());
    *offset = end;
    Ok(())
}

pub fn read_i64(buf: &[u8], offset: &mut usize) -> Result<i64, CodecError> {
    let end = offset.checked_add(8).ok_or(CodecError::UnexpectedEnd)?;
    let bytes = buf.get(*offset..end).ok_or(CodecError::UnexpectedEnd)?;
    let arr: [u8; 8] = bytes.try_into().map_err(|_| CodecError::UnexpectedEnd)?;
    *offset = end;
    Ok(i64::from_le_bytes(arr))
}

pub fn write_bytes(buf: &mut [u8], offset: &mut usize, bytes: &[u8]) -> Result<(), CodecError> {
    let end = offset
        .checked_add(bytes.len())
        .ok_or(CodecError::BufferTooSmall)?;
    buf.get_mut(*offset..end)
        .ok_or(CodecError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

pub fn read_bytes(buf: &[u8], offset: &mut usize, len: usize) -> Result<Vec<u8>, CodecError> {
    let end = offset.checked_add(len).ok_or(CodecError::UnexpectedEnd)?;
    let bytes = buf.get(*offset..end).ok_or(CodecError::UnexpectedEnd)?;
    *offset = end;
    Ok(bytes.to_vec())
}

pub fn write_digest(buf: &mut [u8], offset: &mut usize, digest: &Digest) -> Result<(), CodecError> {
    write_bytes(buf, offset, digest.as_bytes())
}

pub fn read_digest(buf: &[u8], offset: &mut usize) -> Result<Digest, CodecError> {
    let end = offset.checked_add(DIGEST_LEN).ok_or(CodecError::UnexpectedEnd)?;
    let bytes = buf.get(*offset..end).ok_or(CodecError::UnexpectedEnd)?;
    let digest = Digest::from_slice(bytes)?;
    *offset = end;
    Ok(digest)
}
