//! A ledger node: one party's services wired together.

use crate::accounts::AccountService;
use crate::config::NodeConfig;
use crate::contract::ContractRegistry;
use crate::error::{LedgerError, Result};
use crate::finality::FinalityProtocol;
use crate::flows::{run_follow_up, Flow};
use crate::identity::{IdentityService, Party};
use crate::keys::{InMemoryKeyStore, KeyManagement};
use crate::messaging::{InMemoryNetwork, LedgerMessage, LedgerReply, MessageHandler, Messaging};
use crate::notary::NotaryService;
use crate::persistence::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
use crate::signing::{respond_to_signature_request, SigningCoordinator};
use crate::state::{AccountRef, StateAndRef, StateKind};
use crate::transaction::FinalizedTransaction;
use crate::vault::{InMemoryVault, QueryCriteria, Vault};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Node {
    pub config: NodeConfig,
    party: Party,
    notary: Arc<dyn NotaryService>,
    keys: Arc<InMemoryKeyStore>,
    identities: Arc<IdentityService>,
    vault: Arc<InMemoryVault>,
    accounts: Arc<AccountService>,
    contracts: Arc<ContractRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    signing: SigningCoordinator,
    finality: FinalityProtocol,
    /// Flows currently being driven, by `start_flow` or `resume_flows`.
    active: Mutex<HashSet<Uuid>>,
}

impl Node {
    /// Start a node on `network`, opening its checkpoint store from config.
    pub fn join(
        network: &Arc<InMemoryNetwork>,
        identities: Arc<IdentityService>,
        notary: Arc<dyn NotaryService>,
        config: NodeConfig,
    ) -> Result<Arc<Self>> {
        let checkpoints = open_checkpoints(&config);
        Self::join_with_checkpoints(network, identities, notary, config, checkpoints)
    }

    pub fn join_with_checkpoints(
        network: &Arc<InMemoryNetwork>,
        identities: Arc<IdentityService>,
        notary: Arc<dyn NotaryService>,
        config: NodeConfig,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if notary.identity().name != config.notary.name {
            return Err(LedgerError::ConfigError(format!(
                "Configured notary '{}' but was given '{}'",
                config.notary.name,
                notary.identity().name
            )));
        }
        if identities.party_from_name(&config.node.legal_name).is_some() {
            return Err(LedgerError::ConfigError(format!(
                "A party named '{}' is already on the network",
                config.node.legal_name
            )));
        }

        let keys = Arc::new(InMemoryKeyStore::new());
        let party = Party::new(config.node.legal_name.clone(), keys.fresh_key()?);
        identities.register(party.clone());
        identities.register(notary.identity().clone());

        let messaging: Arc<dyn Messaging> = Arc::new(network.endpoint(party.clone()));
        let vault = Arc::new(InMemoryVault::new());
        let contracts = Arc::new(ContractRegistry::default());
        let accounts = Arc::new(AccountService::new(
            party.clone(),
            notary.identity().clone(),
            vault.clone(),
            keys.clone(),
            messaging.clone(),
        ));
        let signing = SigningCoordinator::new(
            party.clone(),
            keys.clone(),
            accounts.clone(),
            identities.clone(),
            messaging.clone(),
            contracts.clone(),
            config.flows.signing_timeout(),
        );
        let finality = FinalityProtocol::new(
            party.clone(),
            vault.clone(),
            notary.clone(),
            messaging,
            accounts.clone(),
            identities.clone(),
            checkpoints.clone(),
            config.flows.broadcast_retries,
        );

        let node = Arc::new(Node {
            config,
            party,
            notary,
            keys,
            identities,
            vault,
            accounts,
            contracts,
            checkpoints,
            signing,
            finality,
            active: Mutex::new(HashSet::new()),
        });
        let handler: Arc<dyn MessageHandler> = node.clone();
        network.register(&node.party, Arc::downgrade(&handler));
        info!("{} joined the network", node.party);
        Ok(node)
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn notary(&self) -> &Party {
        self.notary.identity()
    }

    pub fn keys(&self) -> &dyn KeyManagement {
        self.keys.as_ref()
    }

    pub fn identities(&self) -> &IdentityService {
        &self.identities
    }

    pub fn vault(&self) -> &dyn Vault {
        self.vault.as_ref()
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints.as_ref()
    }

    pub fn signing(&self) -> &SigningCoordinator {
        &self.signing
    }

    pub fn finality(&self) -> &FinalityProtocol {
        &self.finality
    }

    pub fn create_account(&self, name: &str) -> Result<AccountRef> {
        self.accounts.create_account(name)
    }

    /// Unconsumed loan states this node knows about.
    pub fn loans(&self) -> Result<Vec<StateAndRef>> {
        self.vault.query(&QueryCriteria::unconsumed(StateKind::LoanBook))
    }

    /// Unconsumed loan states owned by account `account_id`.
    pub fn loans_for_account(&self, account_id: Uuid) -> Result<Vec<StateAndRef>> {
        self.vault
            .query(&QueryCriteria::external_ids(StateKind::LoanBook, vec![account_id]))
    }

    /// Run `flow` to completion. A flow that ends pending keeps its
    /// checkpoint for [`Node::resume_flows`]; any other outcome clears it.
    pub async fn start_flow<F: Flow>(&self, flow: F) -> Result<F::Output> {
        let flow_id = Uuid::new_v4();
        info!("{} starting {} ({})", self.party, F::NAME, flow_id);
        self.active.lock().insert(flow_id);
        let result = flow.call(self, flow_id).await;
        self.active.lock().remove(&flow_id);
        match &result {
            Err(LedgerError::FinalityPending(tx_id)) => {
                warn!(
                    "{} ({}) pending on {}",
                    F::NAME,
                    flow_id,
                    hex::encode(tx_id)
                );
            }
            Err(e) => {
                warn!("{} ({}) failed: {}", F::NAME, flow_id, e);
                self.checkpoints.remove(flow_id)?;
            }
            Ok(_) => {
                debug!("{} ({}) completed", F::NAME, flow_id);
                self.checkpoints.remove(flow_id)?;
            }
        }
        result
    }

    /// Drive every checkpointed flow as far as it will go, including any
    /// work it owed after finality. Flows still running are left alone.
    pub async fn resume_flows(&self) -> Result<Vec<(Uuid, Result<FinalizedTransaction>)>> {
        let mut outcomes = Vec::new();
        for checkpoint in self.checkpoints.list()? {
            let flow_id = checkpoint.flow_id;
            if !self.active.lock().insert(flow_id) {
                debug!("Flow {} is still running, not resuming it", flow_id);
                continue;
            }
            let outcome = self.resume_flow(checkpoint).await;
            self.active.lock().remove(&flow_id);
            match &outcome {
                Err(LedgerError::FinalityPending(_)) => {}
                _ => self.checkpoints.remove(flow_id)?,
            }
            outcomes.push((flow_id, outcome));
        }
        Ok(outcomes)
    }

    async fn resume_flow(&self, checkpoint: Checkpoint) -> Result<FinalizedTransaction> {
        let finalized = self.finality.resume(checkpoint.flow_id).await?;
        if let Some(follow_up) = &checkpoint.follow_up {
            run_follow_up(self, checkpoint.flow_id, follow_up, &finalized).await?;
        }
        Ok(finalized)
    }

    fn receive_finalized(&self, finalized: &FinalizedTransaction) -> Result<()> {
        let tx = finalized.tx();
        if self.vault.has_transaction(&tx.id)? {
            debug!("{} already has {}", self.party, hex::encode(tx.id));
            return Ok(());
        }
        if &tx.notary != self.notary.identity() {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction {} names untrusted notary {}",
                hex::encode(tx.id),
                tx.notary
            )));
        }
        finalized.verify(&tx.notary.owning_key)?;
        self.contracts.verify(tx)?;
        self.vault.record_transaction(finalized)?;
        debug!("{} recorded {}", self.party, hex::encode(tx.id));
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Node {
    async fn handle(&self, from: &Party, message: LedgerMessage) -> Result<LedgerReply> {
        debug!("{} handling {} from {}", self.party, message.name(), from);
        let outcome = match message {
            LedgerMessage::SignatureRequest { transaction, keys } => {
                return Ok(respond_to_signature_request(
                    self.keys.as_ref(),
                    &self.contracts,
                    &transaction,
                    &keys,
                ))
            }
            LedgerMessage::ShareState { target, state } => self
                .accounts
                .receive_shared_state(&target, &state)
                .map(|_| ()),
            LedgerMessage::ShareAccount(account) => self.accounts.receive_account(&account),
            LedgerMessage::RegisterInterest {
                account_id,
                interested,
            } => self
                .accounts
                .record_interest(account_id, interested)
                .map(|_| ()),
            LedgerMessage::Finalized(finalized) => self.receive_finalized(&finalized),
        };
        Ok(match outcome {
            Ok(()) => LedgerReply::Ack,
            Err(e) => {
                warn!("{} refused message from {}: {}", self.party, from, e);
                LedgerReply::Rejected(e.to_string())
            }
        })
    }
}

/// Open the configured checkpoint store, falling back to memory if it cannot be opened.
fn open_checkpoints(config: &NodeConfig) -> Arc<dyn CheckpointStore> {
    match &config.database.checkpoint_path {
        Some(path) => match SqliteCheckpointStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(
                    "Failed to open checkpoint DB at {}: {}. Falling back to in-memory checkpoints.",
                    path, e
                );
                Arc::new(InMemoryCheckpointStore::new())
            }
        },
        None => Arc::new(InMemoryCheckpointStore::new()),
    }
}

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init_logging(level: &str) {
    let level = level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}
