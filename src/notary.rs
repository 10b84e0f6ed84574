//! Notary collaborator.
//!
//! The notary is treated as an opaque signer offering atomic check-and-set
//! over the set of consumed state refs. Its internal ordering algorithm is
//! not modelled; [`InMemoryNotary`] serialises submissions behind one lock.

use crate::crypto::{DigitalSignature, KeyPair, SecureHash};
use crate::error::{LedgerError, Result};
use crate::identity::Party;
use crate::transaction::{SignedTransaction, StateRef};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

#[async_trait]
pub trait NotaryService: Send + Sync {
    fn identity(&self) -> &Party;

    /// Consume the inputs of `tx` or report which were already consumed.
    /// Submitting an already-notarised transaction again returns the same signature.
    async fn submit(&self, tx: &SignedTransaction) -> Result<DigitalSignature>;
}

pub struct InMemoryNotary {
    identity: Party,
    keys: KeyPair,
    consumed: Mutex<HashMap<StateRef, SecureHash>>,
    offline: AtomicBool,
}

impl InMemoryNotary {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let keys = KeyPair::generate()?;
        Ok(InMemoryNotary {
            identity: Party::new(name, keys.public_key),
            keys,
            consumed: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        })
    }

    /// While offline every submission fails with a transient network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn consumed_by(&self, state_ref: &StateRef) -> Option<SecureHash> {
        self.consumed.lock().get(state_ref).copied()
    }

    fn commit(&self, tx: &SignedTransaction) -> Result<()> {
        let tx_id = tx.tx.id;
        let mut consumed = self.consumed.lock();

        let mut conflicts: Vec<(StateRef, SecureHash)> = tx
            .tx
            .inputs
            .iter()
            .filter_map(|input| {
                consumed
                    .get(&input.state_ref)
                    .filter(|by| **by != tx_id)
                    .map(|by| (input.state_ref, *by))
            })
            .collect();
        conflicts.extend(tx.tx.references.iter().filter_map(|reference| {
            consumed
                .get(&reference.state_ref)
                .map(|by| (reference.state_ref, *by))
        }));

        if !conflicts.is_empty() {
            info!(
                "Rejecting transaction {}: {} conflicting state(s)",
                hex::encode(tx_id),
                conflicts.len()
            );
            return Err(LedgerError::NotaryConflict { tx_id, conflicts });
        }

        for input in &tx.tx.inputs {
            consumed.insert(input.state_ref, tx_id);
        }
        Ok(())
    }
}

#[async_trait]
impl NotaryService for InMemoryNotary {
    fn identity(&self) -> &Party {
        &self.identity
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<DigitalSignature> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::NetworkError(format!(
                "Notary {} is unreachable",
                self.identity
            )));
        }
        if tx.tx.notary != self.identity {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction names notary {} but was sent to {}",
                tx.tx.notary, self.identity
            )));
        }
        tx.tx.check_id()?;
        tx.verify_required_signatures()?;

        self.commit(tx)?;
        debug!("Notarised transaction {}", hex::encode(tx.tx.id));

        let bytes = self.keys.sign(&tx.tx.id)?;
        Ok(DigitalSignature {
            by: self.identity.owning_key,
            bytes: bytes.to_vec(),
        })
    }
}
