//! Finality protocol.
//!
//! Takes a fully signed transaction to the notary, records the outcome and
//! tells every participant. The flow's stage is checkpointed before the
//! notary is contacted, so a crash or a silent notary leaves a resumable
//! `Submitted` record rather than an unknown outcome. A flow that still owes
//! work after finality records it as a [`FollowUp`]; its checkpoint then
//! outlives finality until the flow itself clears it.

use crate::accounts::AccountDirectory;
use crate::crypto::SecureHash;
use crate::error::{LedgerError, Result};
use crate::identity::{AbstractParty, IdentityService, Party};
use crate::messaging::{LedgerMessage, LedgerReply, Messaging};
use crate::notary::NotaryService;
use crate::persistence::{Checkpoint, CheckpointStore};
use crate::state::AccountInfo;
use crate::transaction::{FinalizedTransaction, LedgerTransaction, SignedTransaction, StateRef};
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const BROADCAST_BACKOFF_MS: u64 = 50;

/// Where a flow stands. Only `Finalized` states are ever visible as unconsumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowStage {
    Built(LedgerTransaction),
    Signed(SignedTransaction),
    Submitted(SignedTransaction),
    Finalized(FinalizedTransaction),
    Conflicted {
        tx_id: SecureHash,
        conflicts: Vec<(StateRef, SecureHash)>,
    },
}

impl FlowStage {
    pub fn name(&self) -> &'static str {
        match self {
            FlowStage::Built(_) => "built",
            FlowStage::Signed(_) => "signed",
            FlowStage::Submitted(_) => "submitted",
            FlowStage::Finalized(_) => "finalized",
            FlowStage::Conflicted { .. } => "conflicted",
        }
    }

    pub fn tx_id(&self) -> SecureHash {
        match self {
            FlowStage::Built(tx) => tx.id,
            FlowStage::Signed(signed) | FlowStage::Submitted(signed) => signed.tx.id,
            FlowStage::Finalized(finalized) => finalized.id(),
            FlowStage::Conflicted { tx_id, .. } => *tx_id,
        }
    }
}

/// Work a flow still owes once its transaction is final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FollowUp {
    /// Copy the loan outputs to `receivers`, or to every account interested
    /// in `owner` when none were named.
    ShareOutputs {
        owner: Uuid,
        receivers: Option<Vec<AccountInfo>>,
    },
}

pub struct FinalityProtocol {
    me: Party,
    vault: Arc<dyn Vault>,
    notary: Arc<dyn NotaryService>,
    messaging: Arc<dyn Messaging>,
    accounts: Arc<dyn AccountDirectory>,
    identities: Arc<IdentityService>,
    checkpoints: Arc<dyn CheckpointStore>,
    broadcast_retries: u32,
}

impl FinalityProtocol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        me: Party,
        vault: Arc<dyn Vault>,
        notary: Arc<dyn NotaryService>,
        messaging: Arc<dyn Messaging>,
        accounts: Arc<dyn AccountDirectory>,
        identities: Arc<IdentityService>,
        checkpoints: Arc<dyn CheckpointStore>,
        broadcast_retries: u32,
    ) -> Self {
        FinalityProtocol {
            me,
            vault,
            notary,
            messaging,
            accounts,
            identities,
            checkpoints,
            broadcast_retries,
        }
    }

    /// First checkpoint of a flow, carrying whatever it owes after finality.
    pub fn begin(
        &self,
        flow_id: Uuid,
        flow_name: &str,
        tx: LedgerTransaction,
        follow_up: Option<FollowUp>,
    ) -> Result<()> {
        debug!(
            "Flow {} ({}) built {}",
            flow_id,
            flow_name,
            hex::encode(tx.id)
        );
        let checkpoint =
            Checkpoint::new(flow_id, flow_name, FlowStage::Built(tx)).with_follow_up(follow_up);
        self.checkpoints.save(&checkpoint)
    }

    /// Advance the flow's checkpoint, keeping its follow-up.
    pub fn checkpoint(&self, flow_id: Uuid, flow_name: &str, stage: FlowStage) -> Result<()> {
        debug!(
            "Flow {} ({}) -> {} for {}",
            flow_id,
            flow_name,
            stage.name(),
            hex::encode(stage.tx_id())
        );
        let follow_up = self
            .checkpoints
            .load(flow_id)?
            .and_then(|checkpoint| checkpoint.follow_up);
        self.checkpoints
            .save(&Checkpoint::new(flow_id, flow_name, stage).with_follow_up(follow_up))
    }

    /// Drop the checkpoint of a finalized flow unless it still owes a follow-up.
    fn release(&self, flow_id: Uuid) -> Result<()> {
        match self.checkpoints.load(flow_id)? {
            Some(checkpoint) if checkpoint.follow_up.is_some() => Ok(()),
            _ => self.checkpoints.remove(flow_id),
        }
    }

    /// Notarise `signed` and distribute the result.
    ///
    /// Fails with `NotaryConflict` when an input was consumed elsewhere and
    /// with `FinalityPending` when the notary could not be reached; in the
    /// latter case the checkpoint stays for [`FinalityProtocol::resume`].
    pub async fn finalize(
        &self,
        flow_id: Uuid,
        flow_name: &str,
        signed: SignedTransaction,
    ) -> Result<FinalizedTransaction> {
        signed.tx.check_id()?;
        signed.verify_required_signatures()?;
        self.checkpoint(flow_id, flow_name, FlowStage::Submitted(signed.clone()))?;
        self.submit(flow_id, flow_name, signed).await
    }

    /// Continue a flow from its last checkpoint.
    pub async fn resume(&self, flow_id: Uuid) -> Result<FinalizedTransaction> {
        let checkpoint = self
            .checkpoints
            .load(flow_id)?
            .ok_or_else(|| LedgerError::CheckpointNotFound(flow_id.to_string()))?;
        info!(
            "Resuming flow {} ({}) at stage {}",
            flow_id,
            checkpoint.flow_name,
            checkpoint.stage.name()
        );

        match checkpoint.stage {
            FlowStage::Signed(signed) => self.finalize(flow_id, &checkpoint.flow_name, signed).await,
            // The notary may or may not have seen it; resubmission is idempotent.
            FlowStage::Submitted(signed) => self.submit(flow_id, &checkpoint.flow_name, signed).await,
            FlowStage::Finalized(finalized) => {
                self.vault.record_transaction(&finalized)?;
                self.broadcast(&finalized).await;
                self.release(flow_id)?;
                Ok(finalized)
            }
            FlowStage::Conflicted { tx_id, conflicts } => {
                Err(LedgerError::NotaryConflict { tx_id, conflicts })
            }
            FlowStage::Built(tx) => Err(LedgerError::InvalidTransaction(format!(
                "Flow {} stopped before signatures were collected for {}",
                flow_id,
                hex::encode(tx.id)
            ))),
        }
    }

    async fn submit(
        &self,
        flow_id: Uuid,
        flow_name: &str,
        signed: SignedTransaction,
    ) -> Result<FinalizedTransaction> {
        let tx_id = signed.tx.id;
        match self.notary.submit(&signed).await {
            Ok(notary_signature) => {
                let finalized = FinalizedTransaction {
                    signed,
                    notary_signature,
                };
                finalized.verify(&self.notary.identity().owning_key)?;
                self.vault.record_transaction(&finalized)?;
                self.checkpoint(flow_id, flow_name, FlowStage::Finalized(finalized.clone()))?;
                info!("Transaction {} finalized", hex::encode(tx_id));
                self.broadcast(&finalized).await;
                self.release(flow_id)?;
                Ok(finalized)
            }
            Err(LedgerError::NotaryConflict { tx_id, conflicts }) => {
                warn!(
                    "Transaction {} conflicts on {} input(s)",
                    hex::encode(tx_id),
                    conflicts.len()
                );
                self.checkpoint(
                    flow_id,
                    flow_name,
                    FlowStage::Conflicted {
                        tx_id,
                        conflicts: conflicts.clone(),
                    },
                )?;
                Err(LedgerError::NotaryConflict { tx_id, conflicts })
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "Notary unreachable for {}: {}; flow {} left pending",
                    hex::encode(tx_id),
                    e,
                    flow_id
                );
                Err(LedgerError::FinalityPending(tx_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Parties to tell about `tx`: hosts of account participants and
    /// well-known parties, minus ourselves.
    pub fn recipients(&self, tx: &LedgerTransaction) -> BTreeSet<Party> {
        tx.participants()
            .into_iter()
            .filter_map(|participant| match participant {
                AbstractParty::Party(party) => Some(party),
                AbstractParty::Anonymous(key) => match self.accounts.account_for_key(&key) {
                    Ok(Some(account)) => Some(account.info.host),
                    _ => self.identities.party_from_key(&key),
                },
            })
            .filter(|party| party != &self.me)
            .collect()
    }

    /// Best effort: the transaction is already final, so delivery failures are
    /// logged after the retries run out rather than returned.
    async fn broadcast(&self, finalized: &FinalizedTransaction) {
        for party in self.recipients(finalized.tx()) {
            let mut attempt = 0;
            loop {
                let message = LedgerMessage::Finalized(finalized.clone());
                match self.messaging.send(&party, message).await {
                    Ok(LedgerReply::Ack) => break,
                    Ok(other) => {
                        warn!("{} did not accept {}: {:?}", party, hex::encode(finalized.id()), other);
                        break;
                    }
                    Err(e) if e.is_transient() && attempt < self.broadcast_retries => {
                        attempt += 1;
                        debug!("Retrying broadcast to {} ({}/{})", party, attempt, self.broadcast_retries);
                        tokio::time::sleep(Duration::from_millis(BROADCAST_BACKOFF_MS * attempt as u64))
                            .await;
                    }
                    Err(e) => {
                        warn!("Could not deliver {} to {}: {}", hex::encode(finalized.id()), party, e);
                        break;
                    }
                }
            }
        }
    }
}
