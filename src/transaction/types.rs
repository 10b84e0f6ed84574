/// Transaction types for LoanLedger
use crate::crypto::{sha256, DigitalSignature, PublicKey, SecureHash};
use crate::error::{LedgerError, Result};
use crate::identity::{AbstractParty, Party};
use crate::state::{AccountInfo, FungibleLoanState, LedgerState, StateAndRef, StateKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Points at output `index` of transaction `txhash`. Consumed at most once, ledger-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    pub txhash: SecureHash,
    pub index: u32,
}

impl StateRef {
    pub fn new(txhash: SecureHash, index: u32) -> Self {
        StateRef { txhash, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", hex::encode(self.txhash), self.index)
    }
}

/// Loan command family. Wire tags are fixed for interoperability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandKind {
    Issue,
    TransferToAccount,
    TransferToHolder,
    Split,
    /// A tag this node does not understand; kept so the verifier can reject it.
    Unrecognized(String),
}

impl CommandKind {
    pub fn tag(&self) -> &str {
        match self {
            CommandKind::Issue => "MINE",
            CommandKind::TransferToAccount => "ACCOUNT_TRANSFER",
            CommandKind::TransferToHolder => "HOLDER_TRANSFER",
            CommandKind::Split => "SPLIT",
            CommandKind::Unrecognized(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "MINE" => CommandKind::Issue,
            "ACCOUNT_TRANSFER" => CommandKind::TransferToAccount,
            "HOLDER_TRANSFER" => CommandKind::TransferToHolder,
            "SPLIT" => CommandKind::Split,
            other => CommandKind::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for CommandKind {
    fn from(tag: String) -> Self {
        CommandKind::from_tag(&tag)
    }
}

impl From<CommandKind> for String {
    fn from(kind: CommandKind) -> Self {
        kind.tag().to_string()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A command plus the keys that must sign for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    pub signers: BTreeSet<PublicKey>,
}

impl Command {
    pub fn new(kind: CommandKind, signers: impl IntoIterator<Item = PublicKey>) -> Self {
        Command {
            kind,
            signers: signers.into_iter().collect(),
        }
    }
}

/// Wire form of a transaction. Inputs and references are bare pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<StateRef>,
    pub outputs: Vec<LedgerState>,
    pub references: Vec<StateRef>,
    pub commands: Vec<Command>,
    pub notary: Party,
    /// Random salt so that otherwise identical transactions get distinct ids.
    pub nonce: u64,
}

impl Transaction {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Content address: SHA-256 over the bincode encoding.
    pub fn id(&self) -> Result<SecureHash> {
        Ok(sha256(&self.serialize()?))
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<()> {
        let size = self.serialize()?.len();
        if size > MAX_TRANSACTION_SIZE {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                size, MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}

/// A transaction with its inputs and references resolved to the states they point at.
/// This is what contracts verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: SecureHash,
    pub inputs: Vec<StateAndRef>,
    pub outputs: Vec<LedgerState>,
    pub references: Vec<StateAndRef>,
    pub commands: Vec<Command>,
    pub notary: Party,
    pub nonce: u64,
}

impl LedgerTransaction {
    pub fn new(
        inputs: Vec<StateAndRef>,
        outputs: Vec<LedgerState>,
        references: Vec<StateAndRef>,
        commands: Vec<Command>,
        notary: Party,
        nonce: u64,
    ) -> Result<Self> {
        let mut tx = LedgerTransaction {
            id: [0u8; 32],
            inputs,
            outputs,
            references,
            commands,
            notary,
            nonce,
        };
        tx.id = tx.to_wire().id()?;
        Ok(tx)
    }

    pub fn to_wire(&self) -> Transaction {
        Transaction {
            inputs: self.inputs.iter().map(|s| s.state_ref).collect(),
            outputs: self.outputs.clone(),
            references: self.references.iter().map(|s| s.state_ref).collect(),
            commands: self.commands.clone(),
            notary: self.notary.clone(),
            nonce: self.nonce,
        }
    }

    /// Recompute the id from content; a received transaction must match what it claims.
    pub fn check_id(&self) -> Result<()> {
        let actual = self.to_wire().id()?;
        if actual != self.id {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction id {} does not match content hash {}",
                hex::encode(self.id),
                hex::encode(actual)
            )));
        }
        Ok(())
    }

    pub fn validate_size(&self) -> Result<()> {
        self.to_wire().validate_size()
    }

    pub fn inputs_of_kind(&self, kind: StateKind) -> Vec<&StateAndRef> {
        self.inputs.iter().filter(|s| s.state.kind() == kind).collect()
    }

    pub fn loan_inputs(&self) -> Vec<&FungibleLoanState> {
        self.inputs.iter().filter_map(|s| s.state.as_loan_book()).collect()
    }

    pub fn loan_outputs(&self) -> Vec<&FungibleLoanState> {
        self.outputs.iter().filter_map(|s| s.as_loan_book()).collect()
    }

    pub fn reference_accounts(&self) -> Vec<&AccountInfo> {
        self.references.iter().filter_map(|s| s.state.as_account()).collect()
    }

    /// Union of the signer sets of every command.
    pub fn required_signers(&self) -> BTreeSet<PublicKey> {
        self.commands
            .iter()
            .flat_map(|c| c.signers.iter().copied())
            .collect()
    }

    /// Everyone who should hear about this transaction once it is final.
    pub fn participants(&self) -> BTreeSet<AbstractParty> {
        self.inputs
            .iter()
            .map(|s| &s.state)
            .chain(self.outputs.iter())
            .flat_map(|s| s.participants())
            .collect()
    }

    pub fn out_ref(&self, index: usize) -> StateRef {
        StateRef::new(self.id, index as u32)
    }

    pub fn out_refs(&self) -> Vec<StateAndRef> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, state)| StateAndRef {
                state: state.clone(),
                notary: self.notary.clone(),
                state_ref: self.out_ref(i),
            })
            .collect()
    }
}

/// A transaction plus the signatures collected over its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: LedgerTransaction,
    pub sigs: Vec<DigitalSignature>,
}

/// A notarised transaction. Its inputs are consumed for good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTransaction {
    pub signed: SignedTransaction,
    pub notary_signature: DigitalSignature,
}

impl FinalizedTransaction {
    pub fn id(&self) -> SecureHash {
        self.signed.tx.id
    }

    pub fn tx(&self) -> &LedgerTransaction {
        &self.signed.tx
    }

    pub fn out_refs(&self) -> Vec<StateAndRef> {
        self.signed.tx.out_refs()
    }
}
