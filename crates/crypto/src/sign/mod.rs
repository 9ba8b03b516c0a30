//! Pluggable digital signature schemes.
//!
//! Every scheme exposes the same capability surface: key generation, sign,
//! verify, and its fixed key/signature sizes. Callers hold a
//! [`SchemeHandle`] chosen once at startup; key and signature byte layouts
//! are scheme-specific and opaque to the rest of the system.

pub mod dilithium;
pub mod eddsa;
pub mod falcon;

use crate::error::CryptoError;
use crate::security::SecurityLevel;
use std::sync::Arc;

/// Shared handle to the process-wide signature scheme.
pub type SchemeHandle = Arc<dyn SignatureScheme>;

/// An object-safe digital signature scheme.
pub trait SignatureScheme: Send + Sync {
    /// Canonical lowercase name of the scheme (the configuration key).
    fn name(&self) -> &'static str;

    /// Generate a fresh key pair as `(secret key, public key)` bytes.
    fn generate_keypair(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError>;

    /// Sign `message` with the given secret key.
    fn sign(&self, secret_key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify `signature` over `message` against the given public key.
    fn verify(&self, public_key: &[u8], signature: &[u8], message: &[u8])
        -> Result<(), CryptoError>;

    /// Size of a secret key in bytes.
    fn secret_key_len(&self) -> usize;

    /// Size of a public key in bytes.
    fn public_key_len(&self) -> usize;

    /// Maximum size of a signature in bytes. Falcon signatures are
    /// variable-length; every other scheme always produces this many bytes.
    fn max_signature_len(&self) -> usize;
}

/// Resolve a scheme by its configuration name.
///
/// Known names: `ed25519`, `dilithium2`, `dilithium3`, `dilithium5`,
/// `falcon512`, `falcon1024`.
pub fn scheme_by_name(name: &str) -> Result<SchemeHandle, CryptoError> {
    match name {
        "ed25519" => Ok(Arc::new(eddsa::Ed25519Scheme)),
        "dilithium2" => Ok(Arc::new(dilithium::MldsaScheme::new(SecurityLevel::Level2))),
        "dilithium3" => Ok(Arc::new(dilithium::MldsaScheme::new(SecurityLevel::Level3))),
        "dilithium5" => Ok(Arc::new(dilithium::MldsaScheme::new(SecurityLevel::Level5))),
        "falcon512" => Ok(Arc::new(falcon::FalconScheme::new(SecurityLevel::Level1))),
        "falcon1024" => Ok(Arc::new(falcon::FalconScheme::new(SecurityLevel::Level5))),
        other => Err(CryptoError::Unsupported(format!(
            "unknown signature scheme: {other}"
        ))),
    }
}
