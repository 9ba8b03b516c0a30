//! Falcon (FN-DSA) via the PQClean bindings.
//!
//! Falcon signatures are variable length; `max_signature_len` reports the
//! parameter-set upper bound and actual signatures are usually shorter.

use crate::error::CryptoError;
use crate::security::SecurityLevel;
use crate::sign::SignatureScheme;
use pqcrypto_falcon::{falcon1024, falcon512};
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};

/// Falcon signature scheme: Level1 = Falcon-512, Level5 = Falcon-1024.
pub struct FalconScheme {
    level: SecurityLevel,
}

impl FalconScheme {
    pub fn new(level: SecurityLevel) -> Self {
        Self { level }
    }

    fn is_1024(&self) -> bool {
        matches!(self.level, SecurityLevel::Level5)
    }
}

impl SignatureScheme for FalconScheme {
    fn name(&self) -> &'static str {
        if self.is_1024() {
            "falcon1024"
        } else {
            "falcon512"
        }
    }

    fn generate_keypair(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        if self.is_1024() {
            let (pk, sk) = falcon1024::keypair();
            Ok((sk.as_bytes().to_vec(), pk.as_bytes().to_vec()))
        } else {
            let (pk, sk) = falcon512::keypair();
            Ok((sk.as_bytes().to_vec(), pk.as_bytes().to_vec()))
        }
    }

    fn sign(&self, secret_key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.is_1024() {
            let sk = falcon1024::SecretKey::from_bytes(secret_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            Ok(falcon1024::detached_sign(message, &sk).as_bytes().to_vec())
        } else {
            let sk = falcon512::SecretKey::from_bytes(secret_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            Ok(falcon512::detached_sign(message, &sk).as_bytes().to_vec())
        }
    }

    fn verify(
        &self,
        public_key: &[u8],
        signature: &[u8],
        message: &[u8],
    ) -> Result<(), CryptoError> {
        if self.is_1024() {
            let pk = falcon1024::PublicKey::from_bytes(public_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let sig = falcon1024::DetachedSignature::from_bytes(signature)
                .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
            falcon1024::verify_detached_signature(&sig, message, &pk)
                .map_err(|_| CryptoError::VerificationFailed)
        } else {
            let pk = falcon512::PublicKey::from_bytes(public_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let sig = falcon512::DetachedSignature::from_bytes(signature)
                .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
            falcon512::verify_detached_signature(&sig, message, &pk)
                .map_err(|_| CryptoError::VerificationFailed)
        }
    }

    fn secret_key_len(&self) -> usize {
        if self.is_1024() {
            falcon1024::secret_key_bytes()
        } else {
            falcon512::secret_key_bytes()
        }
    }

    fn public_key_len(&self) -> usize {
        if self.is_1024() {
            falcon1024::public_key_bytes()
        } else {
            falcon512::public_key_bytes()
        }
    }

    fn max_signature_len(&self) -> usize {
        if self.is_1024() {
            falcon1024::signature_bytes()
        } else {
            falcon512::signature_bytes()
        }
    }
}
