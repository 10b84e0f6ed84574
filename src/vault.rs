//! State store abstraction.
//!
//! The vault is an external collaborator: a node reads states from it through
//! criteria-based queries and records finalized transactions into it.
//! [`InMemoryVault`] is the implementation used by tests and ephemeral nodes.

use crate::crypto::PublicKey;
use crate::error::Result;
use crate::identity::Party;
use crate::state::{AccountRef, LedgerState, StateAndRef, StateKind};
use crate::transaction::{FinalizedTransaction, StateRef};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateStatus {
    Unconsumed,
    Consumed,
    All,
}

/// Field predicates over account info and state-to-account links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPredicate {
    AccountHost(Party),
    AccountName(String),
    AccountId(Uuid),
    /// States with a participant key linked to any of these accounts.
    ExternalIdIn(Vec<Uuid>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCriteria {
    pub kind: Option<StateKind>,
    pub status: StateStatus,
    pub predicates: Vec<FieldPredicate>,
}

impl QueryCriteria {
    pub fn unconsumed(kind: StateKind) -> Self {
        QueryCriteria {
            kind: Some(kind),
            status: StateStatus::Unconsumed,
            predicates: Vec::new(),
        }
    }

    /// Base criteria for account lookups: unconsumed account info states.
    pub fn accounts() -> Self {
        Self::unconsumed(StateKind::AccountInfo)
    }

    pub fn with_status(mut self, status: StateStatus) -> Self {
        self.status = status;
        self
    }

    pub fn and(mut self, predicate: FieldPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn account_host(host: &Party) -> Self {
        Self::accounts().and(FieldPredicate::AccountHost(host.clone()))
    }

    pub fn account_name(name: &str) -> Self {
        Self::accounts().and(FieldPredicate::AccountName(name.to_string()))
    }

    pub fn account_id(id: Uuid) -> Self {
        Self::accounts().and(FieldPredicate::AccountId(id))
    }

    pub fn external_ids(kind: StateKind, ids: Vec<Uuid>) -> Self {
        Self::unconsumed(kind).and(FieldPredicate::ExternalIdIn(ids))
    }
}

pub trait Vault: Send + Sync {
    fn query(&self, criteria: &QueryCriteria) -> Result<Vec<StateAndRef>>;

    fn state(&self, state_ref: &StateRef) -> Result<Option<StateAndRef>>;

    fn is_consumed(&self, state_ref: &StateRef) -> Result<bool>;

    /// Consume the transaction's inputs and store its outputs. Idempotent.
    fn record_transaction(&self, tx: &FinalizedTransaction) -> Result<()>;

    /// Store states learned outside a finalized transaction (account issuance,
    /// shares). Already-known states are left untouched.
    fn record_states(&self, states: &[StateAndRef]) -> Result<()>;

    fn has_transaction(&self, tx_id: &[u8; 32]) -> Result<bool>;

    /// Register `interested` for copies of `account_id`'s states. Returns
    /// `false` when it was already registered.
    fn record_interest(&self, account_id: Uuid, interested: &AccountRef) -> Result<bool>;

    /// Accounts registered for `account_id`, in registration order.
    fn interested_accounts(&self, account_id: Uuid) -> Result<Vec<AccountRef>>;
}

#[derive(Debug)]
struct VaultEntry {
    state: StateAndRef,
    consumed: bool,
}

#[derive(Debug, Default)]
struct VaultInner {
    // BTreeMap keeps query results in a stable order.
    states: BTreeMap<StateRef, VaultEntry>,
    transactions: HashMap<[u8; 32], FinalizedTransaction>,
    key_to_account: HashMap<PublicKey, Uuid>,
    interest: HashMap<Uuid, Vec<AccountRef>>,
}

impl VaultInner {
    fn matches(&self, entry: &VaultEntry, criteria: &QueryCriteria) -> bool {
        if let Some(kind) = criteria.kind {
            if entry.state.state.kind() != kind {
                return false;
            }
        }
        let status_ok = match criteria.status {
            StateStatus::Unconsumed => !entry.consumed,
            StateStatus::Consumed => entry.consumed,
            StateStatus::All => true,
        };
        status_ok && criteria.predicates.iter().all(|p| self.satisfies(&entry.state, p))
    }

    fn satisfies(&self, state: &StateAndRef, predicate: &FieldPredicate) -> bool {
        let account = state.state.as_account();
        match predicate {
            FieldPredicate::AccountHost(host) => account.map_or(false, |a| &a.host == host),
            FieldPredicate::AccountName(name) => account.map_or(false, |a| &a.name == name),
            FieldPredicate::AccountId(id) => account.map_or(false, |a| &a.account_id == id),
            FieldPredicate::ExternalIdIn(ids) => state.state.participants().iter().any(|p| {
                self.key_to_account
                    .get(p.owning_key())
                    .map_or(false, |id| ids.contains(id))
            }),
        }
    }

    fn insert_if_absent(&mut self, state: &StateAndRef) {
        self.states
            .entry(state.state_ref)
            .or_insert_with(|| VaultEntry {
                state: state.clone(),
                consumed: false,
            });
    }
}

/// Simple in-memory vault useful for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryVault {
    inner: RwLock<VaultInner>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Vault for InMemoryVault {
    fn query(&self, criteria: &QueryCriteria) -> Result<Vec<StateAndRef>> {
        let inner = self.inner.read();
        Ok(inner
            .states
            .values()
            .filter(|entry| inner.matches(entry, criteria))
            .map(|entry| entry.state.clone())
            .collect())
    }

    fn state(&self, state_ref: &StateRef) -> Result<Option<StateAndRef>> {
        Ok(self.inner.read().states.get(state_ref).map(|e| e.state.clone()))
    }

    fn is_consumed(&self, state_ref: &StateRef) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .states
            .get(state_ref)
            .map_or(false, |e| e.consumed))
    }

    fn record_transaction(&self, tx: &FinalizedTransaction) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.transactions.contains_key(&tx.id()) {
            return Ok(());
        }

        for input in &tx.tx().inputs {
            inner.insert_if_absent(input);
            if let Some(entry) = inner.states.get_mut(&input.state_ref) {
                entry.consumed = true;
            }
        }
        for state in tx.tx().references.iter().cloned().chain(tx.out_refs()) {
            inner.insert_if_absent(&state);
            if let LedgerState::Account(info) = &state.state {
                inner.key_to_account.insert(info.signing_key, info.account_id);
            }
        }
        inner.transactions.insert(tx.id(), tx.clone());
        Ok(())
    }

    fn record_states(&self, states: &[StateAndRef]) -> Result<()> {
        let mut inner = self.inner.write();
        for state in states {
            inner.insert_if_absent(state);
            if let LedgerState::Account(info) = &state.state {
                inner.key_to_account.insert(info.signing_key, info.account_id);
            }
        }
        Ok(())
    }

    fn has_transaction(&self, tx_id: &[u8; 32]) -> Result<bool> {
        Ok(self.inner.read().transactions.contains_key(tx_id))
    }

    fn record_interest(&self, account_id: Uuid, interested: &AccountRef) -> Result<bool> {
        let mut inner = self.inner.write();
        let entry = inner.interest.entry(account_id).or_default();
        if entry
            .iter()
            .any(|a| a.info.account_id == interested.info.account_id)
        {
            return Ok(false);
        }
        entry.push(interested.clone());
        Ok(true)
    }

    fn interested_accounts(&self, account_id: Uuid) -> Result<Vec<AccountRef>> {
        Ok(self
            .inner
            .read()
            .interest
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Typed account lookups over any vault.
pub fn query_accounts(vault: &dyn Vault, criteria: &QueryCriteria) -> Result<Vec<AccountRef>> {
    Ok(vault
        .query(criteria)?
        .iter()
        .filter_map(AccountRef::from_state)
        .collect())
}
