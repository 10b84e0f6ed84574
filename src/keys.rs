//! Local key storage.
//!
//! Signing hardware is out of scope, so nodes talk to keys through the narrow
//! [`KeyManagement`] trait. [`InMemoryKeyStore`] keeps the pairs in process.

use crate::crypto::{DigitalSignature, KeyPair, PublicKey};
use crate::error::{LedgerError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait KeyManagement: Send + Sync {
    /// Generate and store a new key pair, returning its public half.
    fn fresh_key(&self) -> Result<PublicKey>;
    fn owns(&self, key: &PublicKey) -> bool;
    fn sign(&self, key: &PublicKey, content: &[u8]) -> Result<DigitalSignature>;
}

#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    pairs: RwLock<HashMap<PublicKey, KeyPair>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pair: KeyPair) -> PublicKey {
        let key = pair.public_key;
        self.pairs.write().insert(key, pair);
        key
    }
}

impl KeyManagement for InMemoryKeyStore {
    fn fresh_key(&self) -> Result<PublicKey> {
        Ok(self.insert(KeyPair::generate()?))
    }

    fn owns(&self, key: &PublicKey) -> bool {
        self.pairs.read().contains_key(key)
    }

    fn sign(&self, key: &PublicKey, content: &[u8]) -> Result<DigitalSignature> {
        let pairs = self.pairs.read();
        let pair = pairs.get(key).ok_or_else(|| {
            LedgerError::CryptoError(format!("No private key held for {}", key))
        })?;
        Ok(DigitalSignature {
            by: *key,
            bytes: pair.sign(content)?.to_vec(),
        })
    }
}
