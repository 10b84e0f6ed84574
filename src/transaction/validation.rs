/// Signature checks for transactions, separated from type definitions
use crate::crypto::{DigitalSignature, PublicKey};
use crate::error::{LedgerError, Result};
use crate::transaction::types::{FinalizedTransaction, LedgerTransaction, SignedTransaction};
use std::collections::BTreeSet;

impl SignedTransaction {
    pub fn new(tx: LedgerTransaction) -> Self {
        SignedTransaction { tx, sigs: Vec::new() }
    }

    /// Add a signature, ignoring one already present from the same key.
    pub fn add_signature(&mut self, sig: DigitalSignature) {
        if !self.sigs.iter().any(|s| s.by == sig.by) {
            self.sigs.push(sig);
        }
    }

    pub fn signers(&self) -> BTreeSet<PublicKey> {
        self.sigs.iter().map(|s| s.by).collect()
    }

    pub fn missing_signers(&self) -> BTreeSet<PublicKey> {
        let present = self.signers();
        self.tx
            .required_signers()
            .into_iter()
            .filter(|k| !present.contains(k))
            .collect()
    }

    /// Checks every attached signature is valid over the id, and every
    /// required signer outside `allowed_missing` has signed.
    pub fn verify_signatures_except(&self, allowed_missing: &BTreeSet<PublicKey>) -> Result<()> {
        for sig in &self.sigs {
            sig.verify(&self.tx.id)?;
        }

        let missing: Vec<PublicKey> = self
            .missing_signers()
            .into_iter()
            .filter(|k| !allowed_missing.contains(k))
            .collect();
        if !missing.is_empty() {
            return Err(LedgerError::MissingSignatures(missing));
        }
        Ok(())
    }

    pub fn verify_required_signatures(&self) -> Result<()> {
        self.verify_signatures_except(&BTreeSet::new())
    }
}

impl FinalizedTransaction {
    /// Full check of a finalized transaction received from elsewhere.
    pub fn verify(&self, notary_key: &PublicKey) -> Result<()> {
        self.signed.tx.check_id()?;
        self.signed.verify_required_signatures()?;
        if &self.notary_signature.by != notary_key {
            return Err(LedgerError::InvalidTransaction(
                "Notary signature is not from the transaction's notary".to_string(),
            ));
        }
        self.notary_signature.verify(&self.signed.tx.id)
    }
}
