//! Signature collection.
//!
//! The initiator signs with every required key it holds, then asks the host of
//! each remaining key for its signatures. A transaction leaves this module
//! either fully signed or not at all.

use crate::accounts::AccountDirectory;
use crate::contract::ContractRegistry;
use crate::crypto::{DigitalSignature, PublicKey};
use crate::error::{LedgerError, Result};
use crate::identity::{IdentityService, Party};
use crate::keys::KeyManagement;
use crate::messaging::{LedgerMessage, LedgerReply, Messaging};
use crate::transaction::{LedgerTransaction, SignedTransaction};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct SigningCoordinator {
    me: Party,
    keys: Arc<dyn KeyManagement>,
    accounts: Arc<dyn AccountDirectory>,
    identities: Arc<IdentityService>,
    messaging: Arc<dyn Messaging>,
    contracts: Arc<ContractRegistry>,
    timeout: Duration,
}

impl SigningCoordinator {
    pub fn new(
        me: Party,
        keys: Arc<dyn KeyManagement>,
        accounts: Arc<dyn AccountDirectory>,
        identities: Arc<IdentityService>,
        messaging: Arc<dyn Messaging>,
        contracts: Arc<ContractRegistry>,
        timeout: Duration,
    ) -> Self {
        SigningCoordinator {
            me,
            keys,
            accounts,
            identities,
            messaging,
            contracts,
            timeout,
        }
    }

    /// Verify `tx`, sign it locally and gather every remote signature it needs.
    pub async fn collect_signatures(&self, tx: &LedgerTransaction) -> Result<SignedTransaction> {
        tx.check_id()?;
        tx.validate_size()?;
        self.contracts.verify(tx)?;

        let mut signed = SignedTransaction::new(tx.clone());
        let mut remote: BTreeMap<Party, BTreeSet<PublicKey>> = BTreeMap::new();
        for key in tx.required_signers() {
            if self.keys.owns(&key) {
                signed.add_signature(self.keys.sign(&key, &tx.id)?);
            } else {
                let owner = self.owner_of(&key)?;
                remote.entry(owner).or_default().insert(key);
            }
        }

        for (party, keys) in remote {
            for sig in self.request_signatures(&party, tx, keys).await? {
                signed.add_signature(sig);
            }
        }

        signed.verify_required_signatures()?;
        info!(
            "Collected {} signature(s) for {}",
            signed.sigs.len(),
            hex::encode(tx.id)
        );
        Ok(signed)
    }

    /// The party able to sign for `key`: an account's host, else a well-known identity.
    fn owner_of(&self, key: &PublicKey) -> Result<Party> {
        let owner = match self.accounts.account_for_key(key)? {
            Some(account) => Some(account.info.host),
            None => self.identities.party_from_key(key),
        };
        match owner {
            // A key we should hold but do not cannot be signed for by anyone.
            Some(party) if party != self.me => Ok(party),
            _ => Err(LedgerError::UnknownSigner(*key)),
        }
    }

    async fn request_signatures(
        &self,
        party: &Party,
        tx: &LedgerTransaction,
        keys: BTreeSet<PublicKey>,
    ) -> Result<Vec<DigitalSignature>> {
        debug!("Requesting {} signature(s) from {}", keys.len(), party);
        let request = LedgerMessage::SignatureRequest {
            transaction: tx.clone(),
            keys: keys.clone(),
        };
        let reply = tokio::time::timeout(self.timeout, self.messaging.send(party, request))
            .await
            .map_err(|_| {
                warn!("{} did not sign within {:?}", party, self.timeout);
                LedgerError::SigningTimeout {
                    party: party.name.clone(),
                }
            })??;

        let sigs = match reply {
            LedgerReply::Signatures(sigs) => sigs,
            LedgerReply::Rejected(reason) => {
                return Err(LedgerError::SigningRejected {
                    party: party.name.clone(),
                    reason,
                })
            }
            LedgerReply::Ack => {
                return Err(LedgerError::SigningRejected {
                    party: party.name.clone(),
                    reason: "no signatures returned".to_string(),
                })
            }
        };

        let mut covered = BTreeSet::new();
        for sig in &sigs {
            if !keys.contains(&sig.by) || sig.verify(&tx.id).is_err() {
                return Err(LedgerError::SigningRejected {
                    party: party.name.clone(),
                    reason: format!("invalid signature by {}", sig.by),
                });
            }
            covered.insert(sig.by);
        }
        if covered != keys {
            return Err(LedgerError::SigningRejected {
                party: party.name.clone(),
                reason: format!("signed {} of {} keys", covered.len(), keys.len()),
            });
        }
        Ok(sigs)
    }
}

/// Counterparty side of signature collection.
///
/// Re-checks the transaction independently and signs only requested keys that
/// are both required by the transaction and held locally.
pub fn respond_to_signature_request(
    keys: &dyn KeyManagement,
    contracts: &ContractRegistry,
    tx: &LedgerTransaction,
    requested: &BTreeSet<PublicKey>,
) -> LedgerReply {
    if let Err(e) = tx.check_id().and_then(|_| tx.validate_size()) {
        return LedgerReply::Rejected(e.to_string());
    }
    if let Err(e) = contracts.verify(tx) {
        return LedgerReply::Rejected(e.to_string());
    }

    let required = tx.required_signers();
    let mut sigs = Vec::with_capacity(requested.len());
    for key in requested {
        if !required.contains(key) {
            return LedgerReply::Rejected(format!("{} is not a required signer", key));
        }
        if !keys.owns(key) {
            return LedgerReply::Rejected(format!("No private key held for {}", key));
        }
        match keys.sign(key, &tx.id) {
            Ok(sig) => sigs.push(sig),
            Err(e) => return LedgerReply::Rejected(e.to_string()),
        }
    }
    LedgerReply::Signatures(sigs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountService;
    use crate::crypto::KeyPair;
    use crate::keys::InMemoryKeyStore;
    use crate::messaging::{InMemoryNetwork, MessageHandler};
    use crate::state::{FungibleLoanState, Ownership};
    use crate::transaction::{CommandKind, TransactionBuilder};
    use crate::vault::InMemoryVault;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Remote signer that can be told to stall.
    struct Counterparty {
        keys: InMemoryKeyStore,
        contracts: ContractRegistry,
        stall: bool,
    }

    #[async_trait]
    impl MessageHandler for Counterparty {
        async fn handle(&self, _from: &Party, message: LedgerMessage) -> Result<LedgerReply> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            match message {
                LedgerMessage::SignatureRequest { transaction, keys } => Ok(
                    respond_to_signature_request(&self.keys, &self.contracts, &transaction, &keys),
                ),
                _ => Ok(LedgerReply::Ack),
            }
        }
    }

    struct Fixture {
        coordinator: SigningCoordinator,
        local_key: PublicKey,
        remote_key: PublicKey,
        notary: Party,
        _remote: Arc<dyn MessageHandler>,
    }

    fn fixture(stall: bool) -> Fixture {
        let network = InMemoryNetwork::new();
        let notary = Party::new("Notary", KeyPair::generate().unwrap().public_key);
        let keys = Arc::new(InMemoryKeyStore::new());
        let me = Party::new("Bank A", keys.fresh_key().unwrap());
        let local_key = keys.fresh_key().unwrap();

        let remote_keys = InMemoryKeyStore::new();
        let remote_key = remote_keys.fresh_key().unwrap();
        let bank_b = Party::new("Bank B", remote_key);
        let remote: Arc<dyn MessageHandler> = Arc::new(Counterparty {
            keys: remote_keys,
            contracts: ContractRegistry::default(),
            stall,
        });
        network.register(&bank_b, Arc::downgrade(&remote));

        let identities = Arc::new(IdentityService::new());
        identities.register(bank_b);

        let messaging: Arc<dyn Messaging> = Arc::new(network.endpoint(me.clone()));
        let accounts = Arc::new(AccountService::new(
            me.clone(),
            notary.clone(),
            Arc::new(InMemoryVault::new()),
            keys.clone(),
            messaging.clone(),
        ));
        let coordinator = SigningCoordinator::new(
            me,
            keys,
            accounts,
            identities,
            messaging,
            Arc::new(ContractRegistry::default()),
            Duration::from_millis(200),
        );
        Fixture {
            coordinator,
            local_key,
            remote_key,
            notary,
            _remote: remote,
        }
    }

    fn issue(notary: &Party, signers: Vec<PublicKey>) -> LedgerTransaction {
        let mut builder = TransactionBuilder::new(notary.clone());
        builder
            .add_output_state(FungibleLoanState::new(Uuid::new_v4(), 100, Ownership::Bearer))
            .add_command(CommandKind::Issue, signers);
        builder.to_ledger_transaction().unwrap()
    }

    #[tokio::test]
    async fn test_collects_local_and_remote_signatures() {
        let f = fixture(false);
        let tx = issue(&f.notary, vec![f.local_key, f.remote_key]);
        let signed = f.coordinator.collect_signatures(&tx).await.unwrap();
        assert_eq!(signed.signers(), BTreeSet::from([f.local_key, f.remote_key]));
        assert!(signed.verify_required_signatures().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_signer() {
        let f = fixture(false);
        let stranger = KeyPair::generate().unwrap().public_key;
        let tx = issue(&f.notary, vec![f.local_key, stranger]);
        assert!(matches!(
            f.coordinator.collect_signatures(&tx).await,
            Err(LedgerError::UnknownSigner(key)) if key == stranger
        ));
    }

    #[tokio::test]
    async fn test_slow_counterparty_times_out() {
        let f = fixture(true);
        let tx = issue(&f.notary, vec![f.remote_key]);
        assert!(matches!(
            f.coordinator.collect_signatures(&tx).await,
            Err(LedgerError::SigningTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_transaction_never_leaves_the_node() {
        let f = fixture(false);
        let mut builder = TransactionBuilder::new(f.notary.clone());
        builder
            .add_output_state(FungibleLoanState::new(Uuid::new_v4(), 100, Ownership::Bearer))
            .add_command(CommandKind::Issue, [f.remote_key])
            .add_command(CommandKind::Issue, [f.remote_key]);
        let tx = builder.to_ledger_transaction().unwrap();
        assert!(matches!(
            f.coordinator.collect_signatures(&tx).await,
            Err(LedgerError::Verification(_))
        ));
    }

    #[test]
    fn test_counterparty_refuses_keys_it_does_not_hold() {
        let keys = InMemoryKeyStore::new();
        let held = keys.fresh_key().unwrap();
        let other = KeyPair::generate().unwrap().public_key;
        let notary = Party::new("Notary", KeyPair::generate().unwrap().public_key);
        let tx = issue(&notary, vec![held, other]);
        let contracts = ContractRegistry::default();

        let reply = respond_to_signature_request(&keys, &contracts, &tx, &BTreeSet::from([held]));
        assert!(matches!(reply, LedgerReply::Signatures(ref s) if s.len() == 1));

        let reply = respond_to_signature_request(&keys, &contracts, &tx, &BTreeSet::from([other]));
        assert!(matches!(reply, LedgerReply::Rejected(_)));

        // Not required by the transaction at all.
        let extra = keys.fresh_key().unwrap();
        let reply = respond_to_signature_request(&keys, &contracts, &tx, &BTreeSet::from([extra]));
        assert!(matches!(reply, LedgerReply::Rejected(_)));
    }
}
