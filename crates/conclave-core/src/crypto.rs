//! Thin capability over Ed25519 signing, verification and key generation.
//!
//! Key material and signatures cross the wire as lowercase hex: 32-byte seeds
//! for private keys, 32-byte public keys, 64-byte detached signatures. The
//! primitives themselves come from `ed25519-dalek` and are used as black
//! boxes.

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use rand::RngCore;

/// Errors from key handling and signature verification.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid private key: expected 32 hex-encoded bytes")]
    InvalidPrivateKey,
    #[error("invalid public key: expected 32 hex-encoded bytes on the curve")]
    InvalidPublicKey,
    #[error("invalid signature: expected 64 hex-encoded bytes")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// A long-lived Ed25519 identity that can sign canonical payloads.
///
/// Both the coordinator and every participant own exactly one.
#[derive(Debug)]
pub struct Signer {
    signing_key: SigningKey,
}

impl Signer {
    /// Generate a fresh keypair from OS entropy.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Restore a signer from a hex-encoded 32-byte seed.
    pub fn from_hex(private_key: &str) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = hex::decode(private_key)
            .map_err(|_| CryptoError::InvalidPrivateKey)?
            .try_into()
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// The hex-encoded public half, as advertised on the wire.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// The hex-encoded seed, for persisting an identity across restarts.
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Detached signature over `payload`, hex-encoded.
    ///
    /// Signing with a valid key is infallible in `ed25519-dalek`.
    pub fn sign(&self, payload: &str) -> String {
        let signature = self.signing_key.sign(payload.as_bytes());
        hex::encode(signature.to_bytes())
    }
}

/// Verify a hex-encoded detached signature over `payload`.
pub fn verify(public_key: &str, payload: &str, signature: &str) -> Result<(), CryptoError> {
    let key_bytes: [u8; 32] = hex::decode(public_key)
        .map_err(|_| CryptoError::InvalidPublicKey)?
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig_bytes: [u8; 64] = hex::decode(signature)
        .map_err(|_| CryptoError::InvalidSignature)?
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    key.verify_strict(payload.as_bytes(), &Signature::from_bytes(&sig_bytes))
        .map_err(|_| CryptoError::VerificationFailed)
}
