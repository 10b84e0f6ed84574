//! Account directory.
//!
//! Maps signing keys to logical accounts and tracks which remote accounts
//! want copies of a local account's states. Lookups that find nothing return
//! `Ok(None)`; it is up to the caller (usually the contract) to decide that a
//! missing account is a failure.
//!
//! The service holds no state of its own. Accounts, interest registrations
//! and received copies all live in the vault, so they last as long as it does.

use crate::crypto::PublicKey;
use crate::error::{LedgerError, Result};
use crate::identity::Party;
use crate::keys::KeyManagement;
use crate::messaging::{LedgerMessage, LedgerReply, Messaging};
use crate::state::{AccountInfo, AccountRef, LedgerState, StateAndRef};
use crate::transaction::LedgerTransaction;
use crate::vault::{query_accounts, FieldPredicate, QueryCriteria, Vault};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_ACCOUNT_NAME_LENGTH: usize = 64;

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Exact signing-key match.
    fn account_for_key(&self, key: &PublicKey) -> Result<Option<AccountRef>>;

    fn account_by_id(&self, id: Uuid) -> Result<Option<AccountRef>>;

    fn account_by_name(&self, name: &str, host: &Party) -> Result<Option<AccountRef>>;

    /// Remote accounts that asked for copies of `account_id`'s states.
    fn interested_accounts(&self, account_id: Uuid) -> Result<Vec<AccountRef>>;

    /// Hosts of [`AccountDirectory::interested_accounts`].
    fn interested_parties(&self, account_id: Uuid) -> Result<BTreeSet<Party>> {
        Ok(self
            .interested_accounts(account_id)?
            .into_iter()
            .map(|a| a.info.host)
            .collect())
    }

    /// Deliver `state` to `target`. Redelivery of the same pair has no further effect.
    async fn share_state(&self, target: &AccountInfo, state: &StateAndRef) -> Result<()>;
}

pub struct AccountService {
    me: Party,
    notary: Party,
    vault: Arc<dyn Vault>,
    keys: Arc<dyn KeyManagement>,
    messaging: Arc<dyn Messaging>,
}

impl AccountService {
    pub fn new(
        me: Party,
        notary: Party,
        vault: Arc<dyn Vault>,
        keys: Arc<dyn KeyManagement>,
        messaging: Arc<dyn Messaging>,
    ) -> Self {
        AccountService {
            me,
            notary,
            vault,
            keys,
            messaging,
        }
    }

    /// Issue a new account hosted by this node, under a fresh signing key.
    ///
    /// Account issuance consumes nothing, so it is recorded locally without
    /// notarisation.
    pub fn create_account(&self, name: &str) -> Result<AccountRef> {
        let name = name.trim();
        validate_account_name(name)?;
        if self.account_by_name(name, &self.me)?.is_some() {
            return Err(LedgerError::AccountError(format!(
                "Account '{}' already exists on {}",
                name, self.me
            )));
        }

        let info = AccountInfo {
            account_id: Uuid::new_v4(),
            name: name.to_string(),
            host: self.me.clone(),
            signing_key: self.keys.fresh_key()?,
        };
        let issuance = LedgerTransaction::new(
            Vec::new(),
            vec![LedgerState::from(info.clone())],
            Vec::new(),
            Vec::new(),
            self.notary.clone(),
            rand::random(),
        )?;
        let account = AccountRef {
            info,
            notary: self.notary.clone(),
            state_ref: issuance.out_ref(0),
        };
        self.vault.record_states(&[StateAndRef::from(account.clone())])?;

        info!(
            "Created account '{}' ({}) on {}",
            account.info.name, account.info.account_id, self.me
        );
        Ok(account)
    }

    pub fn accounts_for_host(&self, host: &Party) -> Result<Vec<AccountRef>> {
        query_accounts(self.vault.as_ref(), &QueryCriteria::account_host(host))
    }

    pub fn our_accounts(&self) -> Result<Vec<AccountRef>> {
        self.accounts_for_host(&self.me)
    }

    /// Send an account's info state to `party` so it can resolve the account's key.
    pub async fn share_account_info(&self, account: &AccountRef, party: &Party) -> Result<()> {
        let reply = self
            .messaging
            .send(party, LedgerMessage::ShareAccount(account.clone()))
            .await?;
        expect_ack(party, reply)
    }

    /// Ask the host of `account` to copy its future states to `ours`.
    pub async fn request_interest(&self, account: &AccountRef, ours: &AccountRef) -> Result<()> {
        let host = account.info.host.clone();
        let message = LedgerMessage::RegisterInterest {
            account_id: account.info.account_id,
            interested: ours.clone(),
        };
        let reply = self.messaging.send(&host, message).await?;
        expect_ack(&host, reply)
    }

    /// Receiving side of [`AccountService::share_account_info`].
    pub fn receive_account(&self, account: &AccountRef) -> Result<()> {
        self.vault.record_states(&[StateAndRef::from(account.clone())])
    }

    /// Receiving side of [`AccountService::request_interest`]. Returns `false` on redelivery.
    pub fn record_interest(&self, account_id: Uuid, interested: AccountRef) -> Result<bool> {
        if self.account_by_id(account_id)?.is_none() {
            return Err(LedgerError::AccountError(format!(
                "No account {} on {}",
                account_id, self.me
            )));
        }
        self.receive_account(&interested)?;

        let added = self.vault.record_interest(account_id, &interested)?;
        if added {
            debug!(
                "Account {} now interested in {}",
                interested.info.account_id, account_id
            );
        }
        Ok(added)
    }

    /// Receiving side of [`AccountDirectory::share_state`]. Returns `false` on redelivery.
    pub fn receive_shared_state(&self, target: &AccountInfo, state: &StateAndRef) -> Result<bool> {
        if target.host != self.me {
            return Err(LedgerError::AccountError(format!(
                "Account {} is hosted by {}, not {}",
                target.account_id, target.host, self.me
            )));
        }
        // A copy only counts as received once the vault holds it.
        if self.vault.state(&state.state_ref)?.is_some() {
            return Ok(false);
        }
        self.vault.record_states(std::slice::from_ref(state))?;
        debug!(
            "Account {} received state {}",
            target.account_id, state.state_ref
        );
        Ok(true)
    }

    fn find_account(
        &self,
        criteria: &QueryCriteria,
        key: Option<&PublicKey>,
    ) -> Result<Option<AccountRef>> {
        Ok(query_accounts(self.vault.as_ref(), criteria)?
            .into_iter()
            .find(|a| key.map_or(true, |k| &a.info.signing_key == k)))
    }
}

#[async_trait]
impl AccountDirectory for AccountService {
    fn account_for_key(&self, key: &PublicKey) -> Result<Option<AccountRef>> {
        self.find_account(&QueryCriteria::accounts(), Some(key))
    }

    fn account_by_id(&self, id: Uuid) -> Result<Option<AccountRef>> {
        self.find_account(&QueryCriteria::account_id(id), None)
    }

    fn account_by_name(&self, name: &str, host: &Party) -> Result<Option<AccountRef>> {
        let criteria =
            QueryCriteria::account_name(name).and(FieldPredicate::AccountHost(host.clone()));
        self.find_account(&criteria, None)
    }

    fn interested_accounts(&self, account_id: Uuid) -> Result<Vec<AccountRef>> {
        self.vault.interested_accounts(account_id)
    }

    async fn share_state(&self, target: &AccountInfo, state: &StateAndRef) -> Result<()> {
        if target.host == self.me {
            self.receive_shared_state(target, state)?;
            return Ok(());
        }
        let message = LedgerMessage::ShareState {
            target: target.clone(),
            state: state.clone(),
        };
        let reply = self.messaging.send(&target.host, message).await?;
        expect_ack(&target.host, reply)
    }
}

fn expect_ack(party: &Party, reply: LedgerReply) -> Result<()> {
    match reply {
        LedgerReply::Ack => Ok(()),
        LedgerReply::Rejected(reason) => Err(LedgerError::AccountError(format!(
            "{} refused: {}",
            party, reason
        ))),
        other => Err(LedgerError::NetworkError(format!(
            "Unexpected reply from {}: {:?}",
            party, other
        ))),
    }
}

fn validate_account_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LedgerError::AccountError(
            "Account name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_ACCOUNT_NAME_LENGTH {
        return Err(LedgerError::AccountError(format!(
            "Account name exceeds {} characters",
            MAX_ACCOUNT_NAME_LENGTH
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(LedgerError::AccountError(
            "Account name contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::keys::InMemoryKeyStore;
    use crate::messaging::InMemoryNetwork;
    use crate::state::{FungibleLoanState, Ownership};
    use crate::transaction::{FinalizedTransaction, StateRef};
    use crate::vault::InMemoryVault;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn service_over(vault: Arc<dyn Vault>) -> AccountService {
        let me = Party::new("Bank A", KeyPair::generate().unwrap().public_key);
        let notary = Party::new("Notary", KeyPair::generate().unwrap().public_key);
        let network = InMemoryNetwork::new();
        AccountService::new(
            me.clone(),
            notary,
            vault,
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(network.endpoint(me)),
        )
    }

    fn service() -> (AccountService, Arc<InMemoryVault>) {
        let vault = Arc::new(InMemoryVault::new());
        (service_over(vault.clone()), vault)
    }

    fn remote_account(notary: &Party) -> AccountRef {
        AccountRef {
            info: AccountInfo {
                account_id: Uuid::new_v4(),
                name: "bob".to_string(),
                host: Party::new("Bank B", KeyPair::generate().unwrap().public_key),
                signing_key: KeyPair::generate().unwrap().public_key,
            },
            notary: notary.clone(),
            state_ref: StateRef::new([8u8; 32], 0),
        }
    }

    /// Vault whose `record_states` fails while `failing` is set.
    #[derive(Default)]
    struct FlakyVault {
        inner: InMemoryVault,
        failing: AtomicBool,
    }

    impl Vault for FlakyVault {
        fn query(&self, criteria: &QueryCriteria) -> Result<Vec<StateAndRef>> {
            self.inner.query(criteria)
        }

        fn state(&self, state_ref: &StateRef) -> Result<Option<StateAndRef>> {
            self.inner.state(state_ref)
        }

        fn is_consumed(&self, state_ref: &StateRef) -> Result<bool> {
            self.inner.is_consumed(state_ref)
        }

        fn record_transaction(&self, tx: &FinalizedTransaction) -> Result<()> {
            self.inner.record_transaction(tx)
        }

        fn record_states(&self, states: &[StateAndRef]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::DatabaseError("disk full".to_string()));
            }
            self.inner.record_states(states)
        }

        fn has_transaction(&self, tx_id: &[u8; 32]) -> Result<bool> {
            self.inner.has_transaction(tx_id)
        }

        fn record_interest(&self, account_id: Uuid, interested: &AccountRef) -> Result<bool> {
            self.inner.record_interest(account_id, interested)
        }

        fn interested_accounts(&self, account_id: Uuid) -> Result<Vec<AccountRef>> {
            self.inner.interested_accounts(account_id)
        }
    }

    #[test]
    fn test_create_and_resolve_account() {
        let (service, _) = service();
        let alice = service.create_account("alice").unwrap();

        let by_key = service.account_for_key(&alice.info.signing_key).unwrap();
        assert_eq!(by_key, Some(alice.clone()));
        let by_id = service.account_by_id(alice.info.account_id).unwrap();
        assert_eq!(by_id, Some(alice.clone()));
        let by_name = service.account_by_name("alice", &alice.info.host).unwrap();
        assert_eq!(by_name, Some(alice.clone()));
        assert_eq!(service.our_accounts().unwrap(), vec![alice]);
    }

    #[test]
    fn test_unknown_lookups_return_none() {
        let (service, _) = service();
        let stranger = KeyPair::generate().unwrap().public_key;
        assert_eq!(service.account_for_key(&stranger).unwrap(), None);
        assert_eq!(service.account_by_id(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_duplicate_and_invalid_names_rejected() {
        let (service, _) = service();
        service.create_account("alice").unwrap();
        assert!(service.create_account("  alice ").is_err());
        assert!(service.create_account("").is_err());
        assert!(service.create_account(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_record_interest_is_idempotent() {
        let (service, _) = service();
        let alice = service.create_account("alice").unwrap();
        let remote = remote_account(&alice.notary);

        assert!(service.record_interest(alice.info.account_id, remote.clone()).unwrap());
        assert!(!service.record_interest(alice.info.account_id, remote.clone()).unwrap());
        assert_eq!(
            service.interested_accounts(alice.info.account_id).unwrap(),
            vec![remote.clone()]
        );
        assert_eq!(
            service.interested_parties(alice.info.account_id).unwrap(),
            BTreeSet::from([remote.info.host.clone()])
        );
        // the interested account becomes resolvable locally
        assert!(service.account_for_key(&remote.info.signing_key).unwrap().is_some());

        assert!(service.record_interest(Uuid::new_v4(), remote).is_err());
    }

    #[tokio::test]
    async fn test_local_share_is_idempotent() {
        let (service, vault) = service();
        let alice = service.create_account("alice").unwrap();
        let state = StateAndRef {
            state: FungibleLoanState::new(Uuid::new_v4(), 5, Ownership::Bearer).into(),
            notary: alice.notary.clone(),
            state_ref: StateRef::new([6u8; 32], 0),
        };
        let before = vault.len();

        service.share_state(&alice.info, &state).await.unwrap();
        service.share_state(&alice.info, &state).await.unwrap();
        assert_eq!(vault.len(), before + 1);
        assert!(!service.receive_shared_state(&alice.info, &state).unwrap());
    }

    #[test]
    fn test_interest_outlives_the_service() {
        let vault = Arc::new(InMemoryVault::new());
        let first = service_over(vault.clone());
        let alice = first.create_account("alice").unwrap();
        let remote = remote_account(&alice.notary);
        first.record_interest(alice.info.account_id, remote.clone()).unwrap();
        drop(first);

        // a fresh service over the same vault, as after a node restart
        let restarted = service_over(vault);
        assert_eq!(
            restarted.interested_accounts(alice.info.account_id).unwrap(),
            vec![remote.clone()]
        );
        assert!(!restarted.record_interest(alice.info.account_id, remote).unwrap());
    }

    #[test]
    fn test_failed_store_does_not_swallow_redelivery() {
        let vault = Arc::new(FlakyVault::default());
        let service = service_over(vault.clone());
        let alice = service.create_account("alice").unwrap();
        let state = StateAndRef {
            state: FungibleLoanState::new(Uuid::new_v4(), 5, Ownership::Bearer).into(),
            notary: alice.notary.clone(),
            state_ref: StateRef::new([7u8; 32], 0),
        };

        vault.failing.store(true, Ordering::SeqCst);
        assert!(service.receive_shared_state(&alice.info, &state).is_err());
        assert!(vault.state(&state.state_ref).unwrap().is_none());

        vault.failing.store(false, Ordering::SeqCst);
        assert!(service.receive_shared_state(&alice.info, &state).unwrap());
        assert_eq!(vault.state(&state.state_ref).unwrap(), Some(state.clone()));
        assert!(!service.receive_shared_state(&alice.info, &state).unwrap());
    }
}
