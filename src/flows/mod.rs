//! Orchestrations over the node's services.
//!
//! Each flow resolves ownership through the account directory, builds a
//! candidate with [`TransactionBuilder`], self-checks it, collects signatures
//! and finalizes. The stage is checkpointed before every network exchange,
//! together with any [`FollowUp`] the flow still owes after finality, so
//! [`Node::resume_flows`] can finish the job.

pub mod issue;
pub mod share;
pub mod split;
pub mod transfer;

pub use issue::IssueLoanFlow;
pub use share::{GetAllInterestedAccountsFlow, ShareStateWithAccountFlow};
pub use split::SplitLoanFlow;
pub use transfer::TransferLoanToAccountFlow;

use crate::accounts::AccountDirectory;
use crate::error::{LedgerError, Result};
use crate::finality::{FlowStage, FollowUp};
use crate::node::Node;
use crate::state::{AccountRef, StateAndRef};
use crate::transaction::{FinalizedTransaction, TransactionBuilder};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait Flow: Send + Sync {
    type Output: Send;
    const NAME: &'static str;

    /// Run on `node`. Sub-flows share their parent's `flow_id`.
    async fn call(&self, node: &Node, flow_id: Uuid) -> Result<Self::Output>;
}

/// Verify, sign and finalize whatever `builder` holds.
pub(crate) async fn sign_and_finalize(
    node: &Node,
    flow_id: Uuid,
    flow_name: &str,
    builder: &TransactionBuilder,
    follow_up: Option<FollowUp>,
) -> Result<FinalizedTransaction> {
    let tx = builder.to_ledger_transaction()?;
    node.contracts().verify(&tx)?;
    node.finality()
        .begin(flow_id, flow_name, tx.clone(), follow_up)?;

    let signed = node.signing().collect_signatures(&tx).await?;
    node.finality()
        .checkpoint(flow_id, flow_name, FlowStage::Signed(signed.clone()))?;

    node.finality().finalize(flow_id, flow_name, signed).await
}

/// Carry out the post-finality work recorded in a flow's checkpoint.
pub(crate) async fn run_follow_up(
    node: &Node,
    flow_id: Uuid,
    follow_up: &FollowUp,
    finalized: &FinalizedTransaction,
) -> Result<()> {
    match follow_up {
        FollowUp::ShareOutputs { owner, receivers } => {
            split::share_outputs(node, flow_id, *owner, receivers.as_deref(), finalized).await?;
            Ok(())
        }
    }
}

/// The local account that owns `loan`. Fails unless this node can sign for it.
pub(crate) fn hosted_owner(node: &Node, loan: &StateAndRef) -> Result<AccountRef> {
    let state = loan.loan_book().ok_or_else(|| {
        LedgerError::InvalidTransaction(format!("{} is not a loan", loan.state_ref))
    })?;
    let key = state
        .owning_account
        .account_key()
        .ok_or(LedgerError::UnownedState(loan.state_ref))?;
    let account = node
        .accounts()
        .account_for_key(key)?
        .ok_or(LedgerError::UnknownAccount(*key))?;
    if &account.info.host != node.party() {
        return Err(LedgerError::NotHost {
            account: account.info.name.clone(),
            host: account.info.host.name.clone(),
        });
    }
    Ok(account)
}
