//! Mutable accumulator for candidate transactions.
//!
//! The builder only enforces structure (one notary, call order preserved).
//! Whether the result is *allowed* is the contract's business.

use crate::crypto::PublicKey;
use crate::error::{LedgerError, Result};
use crate::identity::Party;
use crate::state::{LedgerState, StateAndRef};
use crate::transaction::types::{Command, CommandKind, LedgerTransaction};

#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    notary: Party,
    inputs: Vec<StateAndRef>,
    outputs: Vec<LedgerState>,
    references: Vec<StateAndRef>,
    commands: Vec<Command>,
    nonce: u64,
}

impl TransactionBuilder {
    pub fn new(notary: Party) -> Self {
        TransactionBuilder {
            notary,
            inputs: Vec::new(),
            outputs: Vec::new(),
            references: Vec::new(),
            commands: Vec::new(),
            nonce: rand::random(),
        }
    }

    /// Fix the salt, for callers that need a reproducible id.
    pub fn set_nonce(&mut self, nonce: u64) -> &mut Self {
        self.nonce = nonce;
        self
    }

    pub fn notary(&self) -> &Party {
        &self.notary
    }

    pub fn add_input_state(&mut self, state: StateAndRef) -> &mut Self {
        self.inputs.push(state);
        self
    }

    pub fn add_output_state(&mut self, state: impl Into<LedgerState>) -> &mut Self {
        self.outputs.push(state.into());
        self
    }

    pub fn add_reference_state(&mut self, state: impl Into<StateAndRef>) -> &mut Self {
        self.references.push(state.into());
        self
    }

    pub fn add_command(
        &mut self,
        kind: CommandKind,
        signers: impl IntoIterator<Item = PublicKey>,
    ) -> &mut Self {
        self.commands.push(Command::new(kind, signers));
        self
    }

    /// Snapshot the accumulated content as an immutable, resolved transaction.
    pub fn to_ledger_transaction(&self) -> Result<LedgerTransaction> {
        for input in &self.inputs {
            if input.notary != self.notary {
                return Err(LedgerError::InvalidTransaction(format!(
                    "State {} is governed by notary {} but the transaction uses {}",
                    input.state_ref, input.notary, self.notary
                )));
            }
        }
        LedgerTransaction::new(
            self.inputs.clone(),
            self.outputs.clone(),
            self.references.clone(),
            self.commands.clone(),
            self.notary.clone(),
            self.nonce,
        )
    }
}
