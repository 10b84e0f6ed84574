use super::{hosted_owner, sign_and_finalize, Flow, GetAllInterestedAccountsFlow, ShareStateWithAccountFlow};
use crate::error::{LedgerError, Result};
use crate::finality::FollowUp;
use crate::node::Node;
use crate::state::{AccountInfo, StateAndRef};
use crate::transaction::{CommandKind, FinalizedTransaction, TransactionBuilder};
use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

/// Split `amount` off an account-owned loan hosted by this node.
///
/// Returns the two new loans: the split-off part first, then the remainder.
/// Both are copied to `carbon_copy_receivers`, or to every account that
/// registered interest in the owner when no receivers are given.
pub struct SplitLoanFlow {
    pub loan: StateAndRef,
    pub amount: u64,
    pub carbon_copy_receivers: Option<Vec<AccountInfo>>,
}

impl SplitLoanFlow {
    pub fn new(loan: StateAndRef, amount: u64) -> Self {
        SplitLoanFlow {
            loan,
            amount,
            carbon_copy_receivers: None,
        }
    }

    pub fn with_receivers(mut self, receivers: Vec<AccountInfo>) -> Self {
        self.carbon_copy_receivers = Some(receivers);
        self
    }
}

#[async_trait]
impl Flow for SplitLoanFlow {
    type Output = Vec<StateAndRef>;
    const NAME: &'static str = "SplitLoanFlow";

    async fn call(&self, node: &Node, flow_id: Uuid) -> Result<Vec<StateAndRef>> {
        let account = hosted_owner(node, &self.loan)?;
        let loan = self.loan.loan_book().ok_or_else(|| {
            LedgerError::InvalidTransaction(format!("{} is not a loan", self.loan.state_ref))
        })?;
        if self.amount >= loan.value_in_usd {
            return Err(LedgerError::OverSplit {
                requested: self.amount,
                available: loan.value_in_usd,
            });
        }

        let mut builder = TransactionBuilder::new(self.loan.notary.clone());
        builder
            .add_input_state(self.loan.clone())
            .add_output_state(loan.with_value(self.amount))
            .add_output_state(loan.with_value(loan.value_in_usd - self.amount))
            .add_command(
                CommandKind::Split,
                [account.info.signing_key, node.party().owning_key],
            )
            .add_reference_state(account.clone());

        let follow_up = FollowUp::ShareOutputs {
            owner: account.info.account_id,
            receivers: self.carbon_copy_receivers.clone(),
        };
        let finalized =
            sign_and_finalize(node, flow_id, Self::NAME, &builder, Some(follow_up)).await?;
        share_outputs(
            node,
            flow_id,
            account.info.account_id,
            self.carbon_copy_receivers.as_deref(),
            &finalized,
        )
        .await
    }
}

/// Copy the loan outputs of a finished split to `receivers`, or to every
/// account interested in `owner`. Returns the copied loans.
pub(crate) async fn share_outputs(
    node: &Node,
    flow_id: Uuid,
    owner: Uuid,
    receivers: Option<&[AccountInfo]>,
    finalized: &FinalizedTransaction,
) -> Result<Vec<StateAndRef>> {
    let split: Vec<StateAndRef> = finalized
        .out_refs()
        .into_iter()
        .filter(|s| s.loan_book().is_some())
        .collect();

    let receivers = match receivers {
        Some(receivers) => receivers.to_vec(),
        None => {
            GetAllInterestedAccountsFlow { account_id: owner }
                .call(node, flow_id)
                .await?
        }
    };
    for receiver in receivers {
        for state in &split {
            let share = ShareStateWithAccountFlow {
                account: receiver.clone(),
                state: state.clone(),
            };
            // Already final; a failed copy does not undo the split.
            if let Err(e) = share.call(node, flow_id).await {
                warn!(
                    "Could not share {} with account {}: {}",
                    state.state_ref, receiver.account_id, e
                );
            }
        }
    }
    Ok(split)
}
