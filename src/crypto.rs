//! Cryptographic primitives for LoanLedger

use crate::error::LedgerError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::COMPACT_SIGNATURE_SIZE,
    ecdsa::Signature,
    All, Message, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use secp256k1::PublicKey;

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Content hash used for transaction ids.
pub type SecureHash = [u8; 32];

pub fn sha256(bytes: &[u8]) -> SecureHash {
    Sha256::digest(bytes).into()
}

/// SHA-256 of the compressed public key.
pub fn key_hash(key: &PublicKey) -> SecureHash {
    sha256(&key.serialize())
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self, LedgerError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Signs a message (which is first hashed using SHA-256) and returns the compact signature bytes.
    ///
    /// Signing is RFC6979-deterministic, so signing the same message twice yields the same bytes.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], LedgerError> {
        let digest = Sha256::digest(message);
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| LedgerError::CryptoError(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }
}

/// Verifies a compact ECDSA signature over `message` by `public_key`.
pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), LedgerError> {
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(LedgerError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let digest = Sha256::digest(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| LedgerError::CryptoError(format!("Failed to create message: {}", e)))?;

    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| LedgerError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, public_key)
        .map_err(|_| LedgerError::CryptoError("Signature verification failed".to_string()))
}

/// A signature over a transaction id, tagged with the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalSignature {
    pub by: PublicKey,
    pub bytes: Vec<u8>,
}

impl DigitalSignature {
    pub fn verify(&self, content: &[u8]) -> Result<(), LedgerError> {
        verify_signature(&self.by, content, &self.bytes)
    }
}
