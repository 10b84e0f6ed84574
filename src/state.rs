//! Ledger state types.
//!
//! States are immutable. A transfer or split always consumes old states and
//! produces new ones; nothing here is ever mutated in place.

use crate::crypto::{key_hash, PublicKey};
use crate::identity::{AbstractParty, Party};
use crate::transaction::StateRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Namespace for deterministic linear ids.
const LINEAR_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c6f_616e_6c65_6467_6572_5f6c_696e_6561);

/// Who controls a fungible loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// No logical account; whoever holds the state controls it.
    Bearer,
    /// Owned by the account whose signing key this is.
    Account(PublicKey),
}

impl Ownership {
    pub fn account_key(&self) -> Option<&PublicKey> {
        match self {
            Ownership::Bearer => None,
            Ownership::Account(key) => Some(key),
        }
    }

    pub fn is_bearer(&self) -> bool {
        matches!(self, Ownership::Bearer)
    }
}

/// A slice of a loan deal, valued in whole US dollars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FungibleLoanState {
    pub deal_id: Uuid,
    pub value_in_usd: u64,
    pub owning_account: Ownership,
}

impl FungibleLoanState {
    pub fn new(deal_id: Uuid, value_in_usd: u64, owning_account: Ownership) -> Self {
        FungibleLoanState {
            deal_id,
            value_in_usd,
            owning_account,
        }
    }

    pub fn with_value(&self, value_in_usd: u64) -> Self {
        FungibleLoanState {
            value_in_usd,
            ..self.clone()
        }
    }

    pub fn with_owner(&self, owning_account: Ownership) -> Self {
        FungibleLoanState {
            owning_account,
            ..self.clone()
        }
    }

    pub fn participants(&self) -> BTreeSet<AbstractParty> {
        self.owning_account
            .account_key()
            .map(|key| AbstractParty::Anonymous(*key))
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueIdentifier {
    pub external_id: String,
    pub id: Uuid,
}

impl UniqueIdentifier {
    /// Same external id, same id.
    pub fn deterministic(external_id: String) -> Self {
        let id = Uuid::new_v5(&LINEAR_ID_NAMESPACE, external_id.as_bytes());
        UniqueIdentifier { external_id, id }
    }
}

impl fmt::Display for UniqueIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.external_id, self.id)
    }
}

/// Terms of a loan as published by its issuer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearLoanState {
    pub loan_value: u64,
    pub interest_rate: f64,
    pub issuer_ref: String,
    pub issuer: AbstractParty,
    pub linear_id: UniqueIdentifier,
}

impl LinearLoanState {
    pub fn new(loan_value: u64, interest_rate: f64, issuer_ref: String, issuer: AbstractParty) -> Self {
        let external_id = format!(
            "{} issued by {}",
            issuer_ref,
            hex::encode(key_hash(issuer.owning_key()))
        );
        LinearLoanState {
            loan_value,
            interest_rate,
            issuer_ref,
            issuer,
            linear_id: UniqueIdentifier::deterministic(external_id),
        }
    }

    pub fn participants(&self) -> BTreeSet<AbstractParty> {
        BTreeSet::from([self.issuer.clone()])
    }
}

/// A logical account: a signing key hosted by one network party.
///
/// Issued once and never consumed; transactions reference it to prove who
/// controls a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: Uuid,
    pub name: String,
    pub host: Party,
    pub signing_key: PublicKey,
}

impl AccountInfo {
    pub fn participants(&self) -> BTreeSet<AbstractParty> {
        BTreeSet::from([AbstractParty::Party(self.host.clone())])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateKind {
    LoanBook,
    LoanData,
    AccountInfo,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            StateKind::LoanBook => "LoanBook",
            StateKind::LoanData => "LoanData",
            StateKind::AccountInfo => "AccountInfo",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerState {
    LoanBook(FungibleLoanState),
    LoanData(LinearLoanState),
    Account(AccountInfo),
}

impl LedgerState {
    pub fn kind(&self) -> StateKind {
        match self {
            LedgerState::LoanBook(_) => StateKind::LoanBook,
            LedgerState::LoanData(_) => StateKind::LoanData,
            LedgerState::Account(_) => StateKind::AccountInfo,
        }
    }

    /// Parties that should see this state. Used for broadcast, never for authorization.
    pub fn participants(&self) -> BTreeSet<AbstractParty> {
        match self {
            LedgerState::LoanBook(s) => s.participants(),
            LedgerState::LoanData(s) => s.participants(),
            LedgerState::Account(s) => s.participants(),
        }
    }

    pub fn as_loan_book(&self) -> Option<&FungibleLoanState> {
        match self {
            LedgerState::LoanBook(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_account(&self) -> Option<&AccountInfo> {
        match self {
            LedgerState::Account(s) => Some(s),
            _ => None,
        }
    }
}

impl From<FungibleLoanState> for LedgerState {
    fn from(state: FungibleLoanState) -> Self {
        LedgerState::LoanBook(state)
    }
}

impl From<LinearLoanState> for LedgerState {
    fn from(state: LinearLoanState) -> Self {
        LedgerState::LoanData(state)
    }
}

impl From<AccountInfo> for LedgerState {
    fn from(state: AccountInfo) -> Self {
        LedgerState::Account(state)
    }
}

/// A state together with where it was produced and which notary governs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAndRef {
    pub state: LedgerState,
    pub notary: Party,
    pub state_ref: StateRef,
}

impl StateAndRef {
    pub fn loan_book(&self) -> Option<&FungibleLoanState> {
        self.state.as_loan_book()
    }
}

/// Typed view of an [`AccountInfo`] state held in a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub info: AccountInfo,
    pub notary: Party,
    pub state_ref: StateRef,
}

impl AccountRef {
    pub fn from_state(state: &StateAndRef) -> Option<Self> {
        state.state.as_account().map(|info| AccountRef {
            info: info.clone(),
            notary: state.notary.clone(),
            state_ref: state.state_ref,
        })
    }
}

impl From<AccountRef> for StateAndRef {
    fn from(account: AccountRef) -> Self {
        StateAndRef {
            state: LedgerState::Account(account.info),
            notary: account.notary,
            state_ref: account.state_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn key() -> PublicKey {
        KeyPair::generate().unwrap().public_key
    }

    #[test]
    fn test_bearer_loan_has_no_participants() {
        let loan = FungibleLoanState::new(Uuid::new_v4(), 100, Ownership::Bearer);
        assert!(loan.participants().is_empty());
    }

    #[test]
    fn test_account_loan_participant_is_account_key() {
        let account_key = key();
        let loan = FungibleLoanState::new(Uuid::new_v4(), 100, Ownership::Account(account_key));
        let participants = LedgerState::from(loan).participants();
        assert_eq!(participants.len(), 1);
        assert!(participants.contains(&AbstractParty::Anonymous(account_key)));
    }

    #[test]
    fn test_linear_id_is_deterministic() {
        let issuer = AbstractParty::Party(Party::new("Issuer", key()));
        let a = LinearLoanState::new(1_000, 0.05, "REF-1".to_string(), issuer.clone());
        let b = LinearLoanState::new(5_000, 0.07, "REF-1".to_string(), issuer.clone());
        let c = LinearLoanState::new(1_000, 0.05, "REF-2".to_string(), issuer);
        assert_eq!(a.linear_id, b.linear_id);
        assert_ne!(a.linear_id, c.linear_id);
        assert!(a.linear_id.external_id.starts_with("REF-1 issued by "));
    }

    #[test]
    fn test_account_info_participant_is_host() {
        let host = Party::new("Host", key());
        let account = AccountInfo {
            account_id: Uuid::new_v4(),
            name: "alice".to_string(),
            host: host.clone(),
            signing_key: key(),
        };
        assert!(account.participants().contains(&AbstractParty::Party(host)));
    }

    #[test]
    fn test_structural_equality() {
        let deal = Uuid::new_v4();
        let a = FungibleLoanState::new(deal, 40, Ownership::Bearer);
        assert_eq!(a, FungibleLoanState::new(deal, 40, Ownership::Bearer));
        assert_ne!(a, a.with_value(60));
    }
}
