//! Ed25519, the classical scheme, via dcrypt.

use crate::error::CryptoError;
use crate::sign::SignatureScheme;
use dcrypt::api::Signature as SignatureTrait;
use dcrypt::sign::eddsa;
use rand::rngs::OsRng;

const SEED_LEN: usize = 32;
const PUBLIC_KEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;

/// Ed25519 signature scheme. Secret keys are serialized as the 32-byte seed.
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn name(&self) -> &'static str {
        "ed25519"
    }

    fn generate_keypair(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let mut rng = OsRng;
        let (public_key, secret_key) =
            eddsa::Ed25519::keypair(&mut rng).map_err(CryptoError::from)?;
        Ok((secret_key.seed().to_vec(), public_key.to_bytes().to_vec()))
    }

    fn sign(&self, secret_key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let sk = secret_key_from_seed(secret_key)?;
        let signature = eddsa::Ed25519::sign(message, &sk).map_err(CryptoError::from)?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &[u8],
        signature: &[u8],
        message: &[u8],
    ) -> Result<(), CryptoError> {
        let pk = eddsa::Ed25519PublicKey::from_bytes(public_key)
            .map_err(|e| CryptoError::InvalidKey(format!("failed to parse public key: {e:?}")))?;
        let sig = eddsa::Ed25519Signature::from_bytes(signature)
            .map_err(|e| CryptoError::InvalidSignature(format!("failed to parse signature: {e:?}")))?;
        eddsa::Ed25519::verify(message, &sig, &pk).map_err(|_| CryptoError::VerificationFailed)
    }

    fn secret_key_len(&self) -> usize {
        SEED_LEN
    }

    fn public_key_len(&self) -> usize {
        PUBLIC_KEY_LEN
    }

    fn max_signature_len(&self) -> usize {
        SIGNATURE_LEN
    }
}

fn secret_key_from_seed(bytes: &[u8]) -> Result<eddsa::Ed25519SecretKey, CryptoError> {
    let seed: [u8; SEED_LEN] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!(
            "invalid Ed25519 secret key length: expected {SEED_LEN}, got {}",
            bytes.len()
        ))
    })?;
    eddsa::Ed25519SecretKey::from_seed(&seed)
        .map_err(|e| CryptoError::InvalidKey(format!("failed to rebuild secret key: {e:?}")))
}
