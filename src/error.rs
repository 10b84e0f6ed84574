//! Error types for LoanLedger

use crate::contract::VerificationError;
use crate::crypto::{PublicKey, SecureHash};
use crate::transaction::StateRef;
use std::fmt;

#[derive(Debug, Clone)]
pub enum LedgerError {
    /// Business-rule violation; never retried with the same content.
    Verification(VerificationError),
    InvalidTransaction(String),
    MissingSignatures(Vec<PublicKey>),
    CryptoError(String),
    UnknownSigner(PublicKey),
    SigningRejected { party: String, reason: String },
    SigningTimeout { party: String },
    /// Inputs already consumed elsewhere. A new transaction may be built, this one is dead.
    NotaryConflict {
        tx_id: SecureHash,
        conflicts: Vec<(StateRef, SecureHash)>,
    },
    /// Submitted to the notary but no answer observed yet.
    FinalityPending(SecureHash),
    NetworkError(String),
    DatabaseError(String),
    SerializationError(String),
    IoError(String),
    ConfigError(String),
    StateNotFound(StateRef),
    CheckpointNotFound(String),
    AccountError(String),
    UnownedState(StateRef),
    UnknownAccount(PublicKey),
    NotHost { account: String, host: String },
    OverSplit { requested: u64, available: u64 },
}

impl LedgerError {
    /// Transient failures that are safe to retry for discovery and broadcast.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::NetworkError(_))
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerError::Verification(e) => write!(f, "Verification failed: {}", e),
            LedgerError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            LedgerError::MissingSignatures(keys) => {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                write!(f, "Missing signatures from: {}", keys.join(", "))
            }
            LedgerError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            LedgerError::UnknownSigner(key) => {
                write!(f, "No known party owns required signing key {}", key)
            }
            LedgerError::SigningRejected { party, reason } => {
                write!(f, "Signing rejected by {}: {}", party, reason)
            }
            LedgerError::SigningTimeout { party } => {
                write!(f, "Timed out waiting for signatures from {}", party)
            }
            LedgerError::NotaryConflict { tx_id, conflicts } => {
                let refs: Vec<String> = conflicts
                    .iter()
                    .map(|(r, by)| format!("{} consumed by {}", r, hex::encode(by)))
                    .collect();
                write!(
                    f,
                    "Notary conflict for transaction {}: {}",
                    hex::encode(tx_id),
                    refs.join(", ")
                )
            }
            LedgerError::FinalityPending(tx_id) => {
                write!(f, "Finality outcome pending for transaction {}", hex::encode(tx_id))
            }
            LedgerError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LedgerError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            LedgerError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            LedgerError::IoError(msg) => write!(f, "IO error: {}", msg),
            LedgerError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            LedgerError::StateNotFound(state_ref) => write!(f, "State not found: {}", state_ref),
            LedgerError::CheckpointNotFound(id) => write!(f, "Checkpoint not found: {}", id),
            LedgerError::AccountError(msg) => write!(f, "Account error: {}", msg),
            LedgerError::UnownedState(state_ref) => {
                write!(f, "Can only split a loan that is already owned ({})", state_ref)
            }
            LedgerError::UnknownAccount(key) => write!(
                f,
                "Attempting to split a loan owned by an account we do not know about ({})",
                key
            ),
            LedgerError::NotHost { account, host } => write!(
                f,
                "Attempting to split a loan owned by account '{}' which is hosted by {}",
                account, host
            ),
            LedgerError::OverSplit {
                requested,
                available,
            } => write!(
                f,
                "Cannot split off {} from a loan worth {}",
                requested, available
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<VerificationError> for LedgerError {
    fn from(err: VerificationError) -> Self {
        LedgerError::Verification(err)
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for LedgerError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LedgerError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::DatabaseError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, LedgerError>;
