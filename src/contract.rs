//! Contract verification.
//!
//! Contracts are pure functions over a resolved [`LedgerTransaction`]: no I/O,
//! no clock, no randomness. Every node that runs them on the same transaction
//! must reach the same verdict.

use crate::crypto::PublicKey;
use crate::state::{AccountInfo, StateKind};
use crate::transaction::{Command, CommandKind, LedgerTransaction};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Expected exactly one loan command, found {0}")]
    AmbiguousCommand(usize),

    #[error("When mining there cannot be any inputs (found {0})")]
    NonEmptyInputs(usize),

    #[error("{command} requires {expected} {role} loan state(s), found {found}")]
    WrongStateCount {
        command: String,
        role: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("The account info state for the {role} owner must be attached to the transaction")]
    MissingAccountReference { role: &'static str },

    #[error("More than one attached account uses signing key {0}")]
    AmbiguousAccountReference(PublicKey),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Value of split loans ({outputs}) must be equal to original value ({input})")]
    ValueConservation { input: u64, outputs: u128 },

    #[error("Loans can only be split whilst maintaining original deal {expected} (found {found})")]
    DealIdentity { expected: Uuid, found: Uuid },

    #[error("Invalid command '{0}' for the loan book contract")]
    UnrecognizedCommand(String),

    #[error("No contract registered for {0} states")]
    NoContract(StateKind),
}

/// A per-state-type verification rule.
pub trait Contract: Send + Sync {
    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError>;
}

/// Rules for fungible loan states.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoanBookContract;

impl LoanBookContract {
    fn require_single_command(tx: &LedgerTransaction) -> Result<&Command, VerificationError> {
        match tx.commands.as_slice() {
            [command] => Ok(command),
            commands => Err(VerificationError::AmbiguousCommand(commands.len())),
        }
    }

    /// The single attached account whose signing key is `key`.
    fn attached_account<'a>(
        attached: &[&'a AccountInfo],
        key: Option<&PublicKey>,
        role: &'static str,
    ) -> Result<&'a AccountInfo, VerificationError> {
        let key = key.ok_or(VerificationError::MissingAccountReference { role })?;
        let mut matches = attached.iter().filter(|a| &a.signing_key == key);
        match (matches.next(), matches.next()) {
            (Some(account), None) => Ok(*account),
            (Some(_), Some(_)) => Err(VerificationError::AmbiguousAccountReference(*key)),
            (None, _) => Err(VerificationError::MissingAccountReference { role }),
        }
    }

    fn require_signers(
        command: &Command,
        account: &AccountInfo,
        role: &str,
    ) -> Result<(), VerificationError> {
        if !command.signers.contains(&account.signing_key) {
            return Err(VerificationError::Unauthorized(format!(
                "The account that is {} the loan must be a required signer",
                role
            )));
        }
        if !command.signers.contains(&account.host.owning_key) {
            return Err(VerificationError::Unauthorized(format!(
                "The hosting party for the account that is {} the loan must be a required signer",
                role
            )));
        }
        Ok(())
    }

    fn verify_transfer_to_account(
        tx: &LedgerTransaction,
        command: &Command,
    ) -> Result<(), VerificationError> {
        let inputs = tx.loan_inputs();
        let outputs = tx.loan_outputs();
        let (input, output) = match (inputs.as_slice(), outputs.as_slice()) {
            ([input], [output]) => (*input, *output),
            ([_], outputs) => {
                return Err(VerificationError::WrongStateCount {
                    command: command.kind.to_string(),
                    role: "output",
                    expected: "exactly one",
                    found: outputs.len(),
                })
            }
            (inputs, _) => {
                return Err(VerificationError::WrongStateCount {
                    command: command.kind.to_string(),
                    role: "input",
                    expected: "exactly one",
                    found: inputs.len(),
                })
            }
        };

        let attached = tx.reference_accounts();
        let output_account =
            Self::attached_account(&attached, output.owning_account.account_key(), "new")?;

        if let Some(input_key) = input.owning_account.account_key() {
            let input_account = Self::attached_account(&attached, Some(input_key), "existing")?;
            Self::require_signers(command, input_account, "selling")?;
        }

        Self::require_signers(command, output_account, "buying")
    }

    fn verify_split(tx: &LedgerTransaction, command: &Command) -> Result<(), VerificationError> {
        let inputs = tx.loan_inputs();
        let outputs = tx.loan_outputs();
        let input = match inputs.as_slice() {
            [input] => *input,
            inputs => {
                return Err(VerificationError::WrongStateCount {
                    command: command.kind.to_string(),
                    role: "input",
                    expected: "exactly one",
                    found: inputs.len(),
                })
            }
        };
        if outputs.is_empty() {
            return Err(VerificationError::WrongStateCount {
                command: command.kind.to_string(),
                role: "output",
                expected: "at least one",
                found: 0,
            });
        }

        let total: u128 = outputs.iter().map(|o| o.value_in_usd as u128).sum();
        if total != input.value_in_usd as u128 {
            return Err(VerificationError::ValueConservation {
                input: input.value_in_usd,
                outputs: total,
            });
        }

        if let Some(stray) = outputs.iter().find(|o| o.deal_id != input.deal_id) {
            return Err(VerificationError::DealIdentity {
                expected: input.deal_id,
                found: stray.deal_id,
            });
        }
        Ok(())
    }
}

impl Contract for LoanBookContract {
    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError> {
        let command = Self::require_single_command(tx)?;

        match &command.kind {
            CommandKind::Issue => {
                let inputs = tx.inputs_of_kind(StateKind::LoanBook).len();
                if inputs != 0 {
                    return Err(VerificationError::NonEmptyInputs(inputs));
                }
                Ok(())
            }
            CommandKind::TransferToAccount => Self::verify_transfer_to_account(tx, command),
            // TODO: holder transfers carry no rules yet; decide whether the
            // current holder's key must sign before enabling them in flows.
            CommandKind::TransferToHolder => Ok(()),
            CommandKind::Split => Self::verify_split(tx, command),
            CommandKind::Unrecognized(tag) => {
                Err(VerificationError::UnrecognizedCommand(tag.clone()))
            }
        }
    }
}

/// Maps each state kind to the contract that governs it.
pub struct ContractRegistry {
    contracts: BTreeMap<StateKind, Box<dyn Contract>>,
}

impl ContractRegistry {
    pub fn empty() -> Self {
        ContractRegistry {
            contracts: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: StateKind, contract: impl Contract + 'static) {
        self.contracts.insert(kind, Box::new(contract));
    }

    /// Run the contract of every state kind consumed or produced by `tx`.
    /// Reference states are read, not transitioned, so they are not verified.
    pub fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError> {
        let kinds: BTreeSet<StateKind> = tx
            .inputs
            .iter()
            .map(|s| s.state.kind())
            .chain(tx.outputs.iter().map(|s| s.kind()))
            .collect();

        for kind in kinds {
            let contract = self
                .contracts
                .get(&kind)
                .ok_or(VerificationError::NoContract(kind))?;
            contract.verify(tx)?;
        }
        Ok(())
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        let mut registry = ContractRegistry::empty();
        registry.register(StateKind::LoanBook, LoanBookContract);
        registry
    }
}

/// Verify with the default registry.
pub fn verify(tx: &LedgerTransaction) -> Result<(), VerificationError> {
    ContractRegistry::default().verify(tx)
}
