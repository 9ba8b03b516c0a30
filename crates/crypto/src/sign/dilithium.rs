//! ML-DSA (Module-Lattice-Based Digital Signature Algorithm), formerly
//! CRYSTALS-Dilithium, via dcrypt.
//!
//! Mappings to NIST FIPS 204:
//! - Level 2 -> ML-DSA-44
//! - Level 3 -> ML-DSA-65
//! - Level 5 -> ML-DSA-87

use crate::error::CryptoError;
use crate::security::SecurityLevel;
use crate::sign::SignatureScheme;
use dcrypt::api::Signature as SignatureTrait;
use dcrypt::sign::dilithium::{
    Dilithium2, Dilithium3, Dilithium5, DilithiumPublicKey as DcryptPublicKey,
    DilithiumSecretKey as DcryptSecretKey, DilithiumSignatureData as DcryptSignatureData,
};
use rand::rngs::OsRng;

/// ML-DSA signature scheme at a fixed security level.
pub struct MldsaScheme {
    level: SecurityLevel,
}

impl MldsaScheme {
    pub fn new(level: SecurityLevel) -> Self {
        Self { level }
    }
}

impl SignatureScheme for MldsaScheme {
    fn name(&self) -> &'static str {
        match self.level {
            SecurityLevel::Level3 => "dilithium3",
            SecurityLevel::Level5 => "dilithium5",
            _ => "dilithium2",
        }
    }

    fn generate_keypair(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let mut rng = OsRng;
        let (pk, sk) = match self.level {
            SecurityLevel::Level3 => Dilithium3::keypair(&mut rng)
                .map_err(|e| CryptoError::OperationFailed(e.to_string()))?,
            SecurityLevel::Level5 => Dilithium5::keypair(&mut rng)
                .map_err(|e| CryptoError::OperationFailed(e.to_string()))?,
            _ => Dilithium2::keypair(&mut rng)
                .map_err(|e| CryptoError::OperationFailed(e.to_string()))?,
        };
        Ok((sk.to_bytes().to_vec(), pk.to_bytes().to_vec()))
    }

    fn sign(&self, secret_key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if secret_key.len() != self.secret_key_len() {
            return Err(CryptoError::InvalidKey(format!(
                "invalid ML-DSA secret key size: {} bytes",
                secret_key.len()
            )));
        }
        let sk = DcryptSecretKey::from_bytes(secret_key)
            .map_err(|e| CryptoError::OperationFailed(e.to_string()))?;
        let signature = match self.level {
            SecurityLevel::Level3 => Dilithium3::sign(message, &sk)
                .map_err(|e| CryptoError::OperationFailed(e.to_string()))?,
            SecurityLevel::Level5 => Dilithium5::sign(message, &sk)
                .map_err(|e| CryptoError::OperationFailed(e.to_string()))?,
            _ => Dilithium2::sign(message, &sk)
                .map_err(|e| CryptoError::OperationFailed(e.to_string()))?,
        };
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &[u8],
        signature: &[u8],
        message: &[u8],
    ) -> Result<(), CryptoError> {
        if public_key.len() != self.public_key_len() {
            return Err(CryptoError::InvalidKey(format!(
                "invalid ML-DSA public key size: {} bytes",
                public_key.len()
            )));
        }
        let pk = DcryptPublicKey::from_bytes(public_key)
            .map_err(|e| CryptoError::OperationFailed(e.to_string()))?;
        let sig = DcryptSignatureData::from_bytes(signature)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let verified = match self.level {
            SecurityLevel::Level3 => Dilithium3::verify(message, &sig, &pk),
            SecurityLevel::Level5 => Dilithium5::verify(message, &sig, &pk),
            _ => Dilithium2::verify(message, &sig, &pk),
        };
        verified.map_err(|_| CryptoError::VerificationFailed)
    }

    fn secret_key_len(&self) -> usize {
        match self.level {
            SecurityLevel::Level3 => 4032, // ML-DSA-65
            SecurityLevel::Level5 => 4896, // ML-DSA-87
            _ => 2560,                     // ML-DSA-44
        }
    }

    fn public_key_len(&self) -> usize {
        match self.level {
            SecurityLevel::Level3 => 1952,
            SecurityLevel::Level5 => 2592,
            _ => 1312,
        }
    }

    fn max_signature_len(&self) -> usize {
        match self.level {
            SecurityLevel::Level3 => 3309,
            SecurityLevel::Level5 => 4627,
            _ => 2420,
        }
    }
}
